// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Energy-based voice-activity detector.
//!
//! Classifies incoming PCM16 frames by RMS level and drives a four-state
//! machine `Inactive -> ActivityPending -> Active -> InactivityPending`,
//! emitting one event per completed transition:
//!
//! - [`DetectorEvent::Activity`] after `speech_on` of sustained speech
//!   (the first edge of an utterance),
//! - [`DetectorEvent::Inactivity`] after `silence_timeout` of sustained
//!   silence following speech (end of the utterance),
//! - [`DetectorEvent::NoInput`] when no speech has been observed at all for
//!   `noinput_timeout`.
//!
//! Time is accounted in audio time: each frame contributes its PCM duration
//! at the supplied sample rate, so the detector is deterministic under test.

use std::time::Duration;

use crate::audio::pcm_rms_level;

/// Events emitted by the detector, at most one per processed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorEvent {
    None,
    /// First edge of speech.
    Activity,
    /// End of the utterance.
    Inactivity,
    /// The input timer fired before any speech.
    NoInput,
}

/// Detector tuning.
#[derive(Debug, Clone, Copy)]
pub struct DetectorParams {
    /// Normalised RMS level at or above which a frame counts as speech.
    pub level_threshold: f64,
    /// Sustained speech required to confirm activity.
    pub speech_on: Duration,
    /// Sustained silence after speech that ends the utterance
    /// (MRCP `Speech-Complete-Timeout`).
    pub silence_timeout: Duration,
    /// Silence before any speech that fires the input timer
    /// (MRCP `No-Input-Timeout`).
    pub noinput_timeout: Duration,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            level_threshold: 0.005,
            speech_on: Duration::from_millis(40),
            silence_timeout: Duration::from_millis(200),
            noinput_timeout: Duration::from_millis(5000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetectorState {
    Inactive,
    ActivityPending,
    Active,
    InactivityPending,
}

/// Voice-activity detector state machine.
pub struct ActivityDetector {
    params: DetectorParams,
    state: DetectorState,
    /// Audio time spent in the current transition state, in milliseconds.
    state_ms: u64,
    /// Silence accumulated toward the no-input timer, in milliseconds.
    noinput_ms: u64,
    /// Whether any utterance has been confirmed since the last reset.
    spoke: bool,
}

impl ActivityDetector {
    pub fn new(params: DetectorParams) -> ActivityDetector {
        ActivityDetector {
            params,
            state: DetectorState::Inactive,
            state_ms: 0,
            noinput_ms: 0,
            spoke: false,
        }
    }

    pub fn params(&self) -> &DetectorParams {
        &self.params
    }

    pub fn set_noinput_timeout(&mut self, timeout: Duration) {
        self.params.noinput_timeout = timeout;
    }

    pub fn set_silence_timeout(&mut self, timeout: Duration) {
        self.params.silence_timeout = timeout;
    }

    /// Return to the initial state, clearing all accumulated time.
    pub fn reset(&mut self) {
        self.state = DetectorState::Inactive;
        self.state_ms = 0;
        self.noinput_ms = 0;
        self.spoke = false;
    }

    /// Feed one PCM16 frame and advance the state machine.
    pub fn process(&mut self, frame: &[u8], sample_rate: u32) -> DetectorEvent {
        if sample_rate == 0 || frame.is_empty() {
            return DetectorEvent::None;
        }
        let frame_ms = (frame.len() as u64 / 2) * 1000 / sample_rate as u64;
        let speaking = pcm_rms_level(frame) >= self.params.level_threshold;

        match self.state {
            DetectorState::Inactive => {
                if speaking {
                    self.state = DetectorState::ActivityPending;
                    self.state_ms = frame_ms;
                    if self.state_ms >= self.params.speech_on.as_millis() as u64 {
                        return self.confirm_activity();
                    }
                } else if !self.spoke {
                    self.noinput_ms += frame_ms;
                    if self.noinput_ms >= self.params.noinput_timeout.as_millis() as u64 {
                        self.noinput_ms = 0;
                        return DetectorEvent::NoInput;
                    }
                }
            }
            DetectorState::ActivityPending => {
                if speaking {
                    self.state_ms += frame_ms;
                    if self.state_ms >= self.params.speech_on.as_millis() as u64 {
                        return self.confirm_activity();
                    }
                } else {
                    self.state = DetectorState::Inactive;
                    self.state_ms = 0;
                }
            }
            DetectorState::Active => {
                if !speaking {
                    self.state = DetectorState::InactivityPending;
                    self.state_ms = frame_ms;
                    if self.state_ms >= self.params.silence_timeout.as_millis() as u64 {
                        return self.confirm_inactivity();
                    }
                }
            }
            DetectorState::InactivityPending => {
                if speaking {
                    self.state = DetectorState::Active;
                    self.state_ms = 0;
                } else {
                    self.state_ms += frame_ms;
                    if self.state_ms >= self.params.silence_timeout.as_millis() as u64 {
                        return self.confirm_inactivity();
                    }
                }
            }
        }
        DetectorEvent::None
    }

    fn confirm_activity(&mut self) -> DetectorEvent {
        self.state = DetectorState::Active;
        self.state_ms = 0;
        self.spoke = true;
        DetectorEvent::Activity
    }

    fn confirm_inactivity(&mut self) -> DetectorEvent {
        self.state = DetectorState::Inactive;
        self.state_ms = 0;
        DetectorEvent::Inactivity
    }
}

impl std::fmt::Debug for ActivityDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityDetector")
            .field("state", &self.state)
            .field("state_ms", &self.state_ms)
            .field("noinput_ms", &self.noinput_ms)
            .field("spoke", &self.spoke)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 8000;

    /// 20 ms of silence at 8 kHz.
    fn silence_frame() -> Vec<u8> {
        vec![0u8; 320]
    }

    /// 20 ms of loud audio at 8 kHz.
    fn loud_frame() -> Vec<u8> {
        let mut frame = Vec::with_capacity(320);
        for _ in 0..160 {
            frame.extend_from_slice(&(i16::MAX / 2).to_le_bytes());
        }
        frame
    }

    fn detector() -> ActivityDetector {
        ActivityDetector::new(DetectorParams::default())
    }

    #[test]
    fn test_silence_emits_noinput_after_timeout() {
        let mut det = detector();
        det.set_noinput_timeout(Duration::from_millis(100));
        let mut events = Vec::new();
        for _ in 0..10 {
            events.push(det.process(&silence_frame(), RATE));
        }
        let noinput = events
            .iter()
            .filter(|e| **e == DetectorEvent::NoInput)
            .count();
        // 100 ms of silence = 5 frames; two full windows in 10 frames.
        assert_eq!(noinput, 2);
    }

    #[test]
    fn test_speech_emits_activity_once() {
        let mut det = detector();
        let mut events = Vec::new();
        for _ in 0..10 {
            events.push(det.process(&loud_frame(), RATE));
        }
        let activity = events
            .iter()
            .filter(|e| **e == DetectorEvent::Activity)
            .count();
        assert_eq!(activity, 1);
        // Confirmed on the second 20 ms frame (40 ms speech_on window).
        assert_eq!(events[0], DetectorEvent::None);
        assert_eq!(events[1], DetectorEvent::Activity);
    }

    #[test]
    fn test_silence_after_speech_emits_inactivity() {
        let mut det = detector();
        for _ in 0..5 {
            det.process(&loud_frame(), RATE);
        }
        let mut events = Vec::new();
        for _ in 0..15 {
            events.push(det.process(&silence_frame(), RATE));
        }
        let inactivity = events
            .iter()
            .filter(|e| **e == DetectorEvent::Inactivity)
            .count();
        assert_eq!(inactivity, 1);
        // 200 ms silence_timeout = 10 frames of 20 ms.
        assert_eq!(events[9], DetectorEvent::Inactivity);
    }

    #[test]
    fn test_speech_blip_does_not_confirm() {
        let mut det = detector();
        // One loud frame then silence: never confirmed, no Activity.
        assert_eq!(det.process(&loud_frame(), RATE), DetectorEvent::None);
        for _ in 0..5 {
            assert_ne!(det.process(&silence_frame(), RATE), DetectorEvent::Activity);
        }
    }

    #[test]
    fn test_silence_blip_does_not_end_utterance() {
        let mut det = detector();
        for _ in 0..3 {
            det.process(&loud_frame(), RATE);
        }
        // Short silence below silence_timeout, then speech again.
        for _ in 0..3 {
            assert_eq!(det.process(&silence_frame(), RATE), DetectorEvent::None);
        }
        assert_eq!(det.process(&loud_frame(), RATE), DetectorEvent::None);
        // A full silence window afterwards still ends the utterance.
        let mut saw_inactivity = false;
        for _ in 0..12 {
            if det.process(&silence_frame(), RATE) == DetectorEvent::Inactivity {
                saw_inactivity = true;
            }
        }
        assert!(saw_inactivity);
    }

    #[test]
    fn test_no_noinput_after_speech() {
        let mut det = detector();
        det.set_noinput_timeout(Duration::from_millis(100));
        for _ in 0..5 {
            det.process(&loud_frame(), RATE);
        }
        for _ in 0..50 {
            assert_ne!(det.process(&silence_frame(), RATE), DetectorEvent::NoInput);
        }
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let mut det = detector();
        for _ in 0..5 {
            det.process(&loud_frame(), RATE);
        }
        det.reset();
        det.set_noinput_timeout(Duration::from_millis(40));
        assert_eq!(det.process(&silence_frame(), RATE), DetectorEvent::None);
        assert_eq!(det.process(&silence_frame(), RATE), DetectorEvent::NoInput);
    }

    #[test]
    fn test_timeout_setters() {
        let mut det = detector();
        det.set_noinput_timeout(Duration::from_millis(1234));
        det.set_silence_timeout(Duration::from_millis(321));
        assert_eq!(det.params().noinput_timeout, Duration::from_millis(1234));
        assert_eq!(det.params().silence_timeout, Duration::from_millis(321));
    }

    #[test]
    fn test_zero_rate_is_ignored() {
        let mut det = detector();
        assert_eq!(det.process(&loud_frame(), 0), DetectorEvent::None);
    }
}
