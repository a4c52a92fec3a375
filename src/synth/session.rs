// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Synthesizer per-session state machine.
//!
//! Lifecycle: `Idle -> Speaking -> (Completing | Cancelling) -> Idle`, with
//! `Paused` a sub-state of `Speaking` that suppresses the audio drain while
//! the buffer keeps filling. Host callbacks (`process_request`,
//! `stream_read`) never block; everything that can touch the network runs in
//! the engine's background task via the message handlers at the bottom of
//! this file.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::audio::{AudioBuffer, ReadOutcome};
use crate::mrcp::{
    ChannelMessage, ChannelSink, CodecDescriptor, CompletionCause, Event, Response, SynthMethod,
    SynthRequest,
};
use crate::synth::protocol::{is_completion_marker, TtsRequest};
use crate::synth::SynthTaskMessage;
use crate::task::TaskSender;
use crate::ws::{Opcode, WsClient};

/// Upper bound on a single synthesis.
pub(crate) const MAX_SPEAK_DURATION: Duration = Duration::from_secs(300);
/// Consecutive empty receive polls tolerated before the session gives up
/// (about five seconds at the default 100 ms poll interval).
pub(crate) const MAX_IDLE_POLLS: u32 = 50;

#[derive(Default)]
struct SynthState {
    /// The active SPEAK; a speak is in flight while this is set.
    speak_request: Option<SynthRequest>,
    /// STOP/BARGE-IN response deferred to the next audio tick.
    stop_response: Option<Response>,
    paused: bool,
    /// Whether the task should keep polling for inbound audio.
    receiving: bool,
    speak_start: Option<Instant>,
    idle_polls: u32,
}

/// One synthesizer channel: owns its WebSocket client and audio buffer.
pub struct SynthSession {
    self_ref: Weak<SynthSession>,
    sink: Arc<dyn ChannelSink>,
    task: TaskSender<SynthTaskMessage>,
    ws: WsClient,
    audio: AudioBuffer,
    codec: Mutex<Option<CodecDescriptor>>,
    state: Mutex<SynthState>,
}

impl SynthSession {
    pub(crate) fn create(
        sink: Arc<dyn ChannelSink>,
        task: TaskSender<SynthTaskMessage>,
        ws: WsClient,
        audio: AudioBuffer,
    ) -> Arc<SynthSession> {
        Arc::new_cyclic(|self_ref| SynthSession {
            self_ref: self_ref.clone(),
            sink,
            task,
            ws,
            audio,
            codec: Mutex::new(None),
            state: Mutex::new(SynthState::default()),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, SynthState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Post a task message addressed to this session.
    fn post(&self, make: impl FnOnce(Arc<SynthSession>) -> SynthTaskMessage) -> bool {
        match self.self_ref.upgrade() {
            Some(session) => self.task.post(make(session)),
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Host-facing surface (never blocks)
    // -----------------------------------------------------------------------

    /// Open the channel; the task answers with `open_respond`.
    pub fn open(&self) -> bool {
        self.post(SynthTaskMessage::OpenChannel)
    }

    /// Close the channel; the task disconnects and answers `close_respond`.
    pub fn close(&self) -> bool {
        self.post(SynthTaskMessage::CloseChannel)
    }

    /// Hand a request to the background task for dispatch.
    pub fn process_request(&self, request: SynthRequest) -> bool {
        self.post(|session| SynthTaskMessage::RequestDispatch(session, request))
    }

    /// Record the codec negotiated for the source stream.
    pub fn bind_codec(&self, codec: CodecDescriptor) {
        if !codec.is_supported() {
            tracing::warn!(sample_rate = codec.sample_rate, "unadvertised sample rate");
        }
        *self.codec.lock().unwrap_or_else(PoisonError::into_inner) = Some(codec);
    }

    /// Snapshot of the bound codec.
    pub fn codec(&self) -> Option<CodecDescriptor> {
        *self.codec.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fill one outbound audio frame. Called from the host media thread on
    /// every tick; must not block and never fails.
    pub fn stream_read(&self, frame: &mut [u8]) {
        // A pending STOP wins over everything: flush the stored response,
        // zero the speak state, hand back silence.
        let flushed = {
            let mut state = self.lock_state();
            state.stop_response.take().map(|response| {
                state.speak_request = None;
                state.paused = false;
                state.receiving = false;
                state.speak_start = None;
                state.idle_polls = 0;
                response
            })
        };
        if let Some(response) = flushed {
            self.audio.clear();
            frame.fill(0);
            self.sink.message_send(ChannelMessage::Response(response));
            return;
        }

        let deliverable = {
            let state = self.lock_state();
            state.speak_request.is_some() && !state.paused
        };
        if !deliverable {
            frame.fill(0);
            return;
        }

        let (available, complete) = self.audio.status();
        if available >= frame.len() {
            self.audio.read(frame);
        } else if complete && available == 0 {
            frame.fill(0);
            self.speak_complete(CompletionCause::Normal);
        } else if complete {
            // Drain the tail and pad with silence; the next read completes.
            let result = self.audio.read(frame);
            if let ReadOutcome::Partial(copied) = result.outcome {
                frame[copied..].fill(0);
            }
        } else {
            // Underrun while audio is still arriving: silence, leave the
            // buffered tail for a contiguous later read.
            frame.fill(0);
        }
    }

    /// Emit SPEAK-COMPLETE exactly once for the active request.
    fn speak_complete(&self, cause: CompletionCause) {
        let request = {
            let mut state = self.lock_state();
            state.receiving = false;
            state.speak_request.take()
        };
        let Some(request) = request else {
            return;
        };
        tracing::info!(request_id = request.id, ?cause, "SPEAK complete");
        self.sink
            .message_send(ChannelMessage::Event(Event::SpeakComplete {
                request_id: request.id,
                cause,
            }));
    }

    // -----------------------------------------------------------------------
    // Background-task handlers
    // -----------------------------------------------------------------------

    pub(crate) async fn handle_open(&self) {
        tracing::info!("synth channel open");
        self.sink.open_respond(true);
    }

    pub(crate) async fn handle_close(&self) {
        tracing::info!("synth channel close");
        self.ws.disconnect(true).await;
        self.sink.close_respond();
    }

    pub(crate) async fn handle_request(&self, request: SynthRequest) {
        match request.method {
            SynthMethod::SetParams => self.set_params(request),
            SynthMethod::GetParams => self.get_params(request),
            SynthMethod::Speak => self.speak(request),
            SynthMethod::Stop | SynthMethod::BargeInOccurred => self.stop(request),
            SynthMethod::Pause => self.pause(request),
            SynthMethod::Resume => self.resume(request),
        }
    }

    /// Parameters are reported for introspection only; the JSON envelope is
    /// built from the headers of each SPEAK itself.
    fn set_params(&self, request: SynthRequest) {
        if let Some(voice) = request.headers.voice_name.as_deref() {
            tracing::info!(voice, "set voice");
        }
        self.sink
            .message_send(ChannelMessage::Response(Response::success(request.id)));
    }

    fn get_params(&self, request: SynthRequest) {
        let mut response = Response::success(request.id);
        if request.headers.voice_name.is_some() {
            response = response.with_header("Voice-Name", "websocket-tts");
        }
        self.sink.message_send(ChannelMessage::Response(response));
    }

    fn speak(&self, request: SynthRequest) {
        let Some(codec) = self.codec() else {
            tracing::warn!(request_id = request.id, "SPEAK without a negotiated codec");
            self.sink.message_send(ChannelMessage::Response(
                Response::method_failed(request.id),
            ));
            return;
        };
        tracing::info!(
            request_id = request.id,
            sample_rate = codec.sample_rate,
            text_len = request.body.len(),
            "SPEAK"
        );

        self.audio.clear();
        {
            let mut state = self.lock_state();
            state.paused = false;
            state.receiving = true;
            state.speak_start = Some(Instant::now());
            state.idle_polls = 0;
        }
        self.sink
            .message_send(ChannelMessage::Response(Response::in_progress(request.id)));
        {
            self.lock_state().speak_request = Some(request.clone());
        }
        self.post(|session| SynthTaskMessage::SpeakStart(session, request));
    }

    /// The STOP response is deferred: the next `stream_read` flushes it and
    /// zeroes the session.
    fn stop(&self, request: SynthRequest) {
        tracing::info!(request_id = request.id, "STOP");
        let mut state = self.lock_state();
        state.stop_response = Some(Response::success(request.id));
        state.receiving = false;
    }

    fn pause(&self, request: SynthRequest) {
        tracing::info!(request_id = request.id, "PAUSE");
        self.lock_state().paused = true;
        self.sink
            .message_send(ChannelMessage::Response(Response::success(request.id)));
    }

    fn resume(&self, request: SynthRequest) {
        tracing::info!(request_id = request.id, "RESUME");
        self.lock_state().paused = false;
        self.sink
            .message_send(ChannelMessage::Response(Response::success(request.id)));
    }

    /// Connect, send the TTS envelope, and start the receive-poll loop.
    pub(crate) async fn handle_speak_start(&self, request: SynthRequest) {
        if !self.ws.ensure_connected().await {
            tracing::error!(request_id = request.id, "unable to reach the TTS server");
            self.speak_complete(CompletionCause::Error);
            return;
        }
        if request.body.is_empty() {
            tracing::warn!(request_id = request.id, "empty text in SPEAK request");
            self.speak_complete(CompletionCause::Error);
            return;
        }

        let sample_rate = self.codec().map(|c| c.sample_rate).unwrap_or(8000);
        let headers = &request.headers;
        let envelope = TtsRequest {
            text: &request.body,
            voice: headers.voice_name.as_deref().unwrap_or("default"),
            speed: headers.prosody_rate.unwrap_or(1.0),
            pitch: headers.prosody_pitch.unwrap_or(1.0),
            volume: headers.prosody_volume.unwrap_or(1.0),
            sample_rate,
            session_id: &request.session_id,
        };
        let json = envelope.to_json();
        tracing::debug!(request_id = request.id, payload = %json, "TTS request");

        if let Err(e) = self.ws.send_text(json.as_bytes()).await {
            tracing::error!(request_id = request.id, error = %e, "failed to send TTS request");
            self.speak_complete(CompletionCause::Error);
            return;
        }
        self.post(SynthTaskMessage::RecvPoll);
    }

    /// One receive-poll tick. Re-posts itself while the speak is live.
    pub(crate) async fn handle_recv_poll(&self, cancel: &CancellationToken) {
        if cancel.is_cancelled() {
            return;
        }
        {
            let state = self.lock_state();
            if state.stop_response.is_some() || !state.receiving {
                return;
            }
            if let Some(start) = state.speak_start {
                if start.elapsed() > MAX_SPEAK_DURATION {
                    drop(state);
                    tracing::warn!("max speak duration exceeded");
                    self.audio.mark_complete();
                    return;
                }
            }
        }

        match self.ws.receive_frame().await {
            Ok(Some(frame)) => match frame.opcode {
                Opcode::Binary | Opcode::Continuation => {
                    self.audio.write(&frame.payload);
                    self.lock_state().idle_polls = 0;
                    tracing::trace!(
                        bytes = frame.payload.len(),
                        buffered = self.audio.bytes_written(),
                        "audio chunk"
                    );
                }
                Opcode::Text => {
                    tracing::debug!(payload = %frame.payload_str(), "status message");
                    if is_completion_marker(&frame.payload) {
                        tracing::info!("synthesis complete");
                        self.audio.mark_complete();
                        return;
                    }
                }
                Opcode::Close => {
                    tracing::info!("TTS server closed the connection");
                    self.audio.mark_complete();
                    return;
                }
                Opcode::Ping | Opcode::Pong => {}
            },
            Ok(None) => {
                let exhausted = {
                    let mut state = self.lock_state();
                    state.idle_polls += 1;
                    state.idle_polls > MAX_IDLE_POLLS
                };
                if exhausted {
                    if self.audio.bytes_written() > 0 {
                        tracing::info!("idle timeout with buffered audio, marking complete");
                        self.audio.mark_complete();
                    } else {
                        tracing::error!("no audio received before idle timeout");
                        self.speak_complete(CompletionCause::Error);
                    }
                    return;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "receive failed");
                if self.audio.bytes_written() > 0 {
                    self.audio.mark_complete();
                } else {
                    self.speak_complete(CompletionCause::Error);
                }
                return;
            }
        }

        let keep_polling = {
            let state = self.lock_state();
            state.receiving && state.stop_response.is_none()
        };
        if keep_polling && !cancel.is_cancelled() {
            self.post(SynthTaskMessage::RecvPoll);
        }
    }

    /// Terminal answer for a request caught in engine shutdown.
    pub(crate) fn reject_at_shutdown(&self, request: SynthRequest) {
        self.sink.message_send(ChannelMessage::Response(
            Response::method_failed(request.id),
        ));
    }
}
