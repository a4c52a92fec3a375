// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Recognizer per-session state machine.
//!
//! Lifecycle: `Idle -> Listening -> (Recognising | Cancelling) -> Idle`.
//! `Listening` begins at RECOGNIZE; the detector's Activity edge moves the
//! session to `Recognising` (START-OF-INPUT), and Inactivity, a timeout, or
//! STOP reach the terminal state. The host feeds audio through
//! [`RecogSession::stream_write`], which must not block: it runs the
//! detector, buffers the frame, and posts task messages for everything that
//! touches the network.
//!
//! Both batch and streaming mode funnel the end of the utterance through the
//! `SendAudioBatch` handler (streaming subtracts the already-streamed bytes),
//! so there is a single path into RECOGNITION-COMPLETE.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::audio::{ActivityDetector, AudioBuffer, DetectorEvent};
use crate::mrcp::{
    ChannelMessage, ChannelSink, CodecDescriptor, CompletionCause, Event, RecogMethod,
    RecogRequest, Response, NLSML_CONTENT_TYPE,
};
use crate::recog::RecogTaskMessage;
use crate::task::TaskSender;
use crate::ws::{Opcode, WsClient};

/// Upper bound on one recognition, RECOGNIZE to completion.
pub(crate) const MAX_RECOGNIZE_DURATION: Duration = Duration::from_secs(60);
/// Streaming-mode chunk size: 200 ms at 8 kHz, 16-bit mono.
pub(crate) const STREAM_CHUNK_SIZE: usize = 3200;

#[derive(Default)]
struct RecogState {
    /// The active RECOGNIZE; a recognition is in flight while this is set.
    recog_request: Option<RecogRequest>,
    /// STOP response deferred to the next audio tick.
    stop_response: Option<Response>,
    timers_started: bool,
    /// Whether START-OF-INPUT has fired for this request.
    speech_started: bool,
    /// Whether the task is polling for the recognition result.
    waiting_result: bool,
    /// Bytes already shipped in streaming mode.
    stream_pos: usize,
    recognize_start: Option<Instant>,
}

/// One recognizer channel: owns its WebSocket client, audio buffer, and
/// activity detector.
pub struct RecogSession {
    self_ref: Weak<RecogSession>,
    sink: Arc<dyn ChannelSink>,
    task: TaskSender<RecogTaskMessage>,
    ws: WsClient,
    audio: AudioBuffer,
    detector: Mutex<ActivityDetector>,
    codec: Mutex<Option<CodecDescriptor>>,
    state: Mutex<RecogState>,
    streaming_enabled: bool,
}

impl RecogSession {
    pub(crate) fn create(
        sink: Arc<dyn ChannelSink>,
        task: TaskSender<RecogTaskMessage>,
        ws: WsClient,
        audio: AudioBuffer,
        detector: ActivityDetector,
        streaming_enabled: bool,
    ) -> Arc<RecogSession> {
        Arc::new_cyclic(|self_ref| RecogSession {
            self_ref: self_ref.clone(),
            sink,
            task,
            ws,
            audio,
            detector: Mutex::new(detector),
            codec: Mutex::new(None),
            state: Mutex::new(RecogState::default()),
            streaming_enabled,
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, RecogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Post a task message addressed to this session.
    fn post(&self, make: impl FnOnce(Arc<RecogSession>) -> RecogTaskMessage) -> bool {
        match self.self_ref.upgrade() {
            Some(session) => self.task.post(make(session)),
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Host-facing surface (never blocks)
    // -----------------------------------------------------------------------

    pub fn open(&self) -> bool {
        self.post(RecogTaskMessage::OpenChannel)
    }

    pub fn close(&self) -> bool {
        self.post(RecogTaskMessage::CloseChannel)
    }

    pub fn process_request(&self, request: RecogRequest) -> bool {
        self.post(|session| RecogTaskMessage::RequestDispatch(session, request))
    }

    /// Record the codec negotiated for the sink stream.
    pub fn bind_codec(&self, codec: CodecDescriptor) {
        if !codec.is_supported() {
            tracing::warn!(sample_rate = codec.sample_rate, "unadvertised sample rate");
        }
        *self.codec.lock().unwrap_or_else(PoisonError::into_inner) = Some(codec);
    }

    pub fn codec(&self) -> Option<CodecDescriptor> {
        *self.codec.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accept one inbound audio frame from the host media thread. Must not
    /// block and never fails.
    pub fn stream_write(&self, frame: &[u8]) {
        // A pending STOP wins: flush the stored response and zero the state.
        let flushed = {
            let mut state = self.lock_state();
            state.stop_response.take().map(|response| {
                state.recog_request = None;
                state.speech_started = false;
                state.waiting_result = false;
                state.stream_pos = 0;
                state.recognize_start = None;
                response
            })
        };
        if let Some(response) = flushed {
            self.audio.clear();
            self.sink.message_send(ChannelMessage::Response(response));
            return;
        }

        let request_id = {
            let state = self.lock_state();
            match state.recog_request.as_ref() {
                Some(request) => request.id,
                None => return,
            }
        };
        if !self.ws.is_connected() {
            return;
        }

        let sample_rate = self.codec().map(|c| c.sample_rate).unwrap_or(8000);
        let event = {
            let mut detector = self
                .detector
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            detector.process(frame, sample_rate)
        };
        match event {
            DetectorEvent::Activity => {
                tracing::info!(request_id, "voice activity detected");
                self.lock_state().speech_started = true;
                self.sink
                    .message_send(ChannelMessage::Event(Event::StartOfInput { request_id }));
            }
            DetectorEvent::Inactivity => {
                tracing::info!(request_id, "voice inactivity detected");
                if self.audio.bytes_written() > 0 {
                    self.post(RecogTaskMessage::SendAudioBatch);
                } else {
                    self.recognition_complete(CompletionCause::Normal, None);
                }
            }
            DetectorEvent::NoInput => {
                let timers_started = self.lock_state().timers_started;
                if timers_started {
                    tracing::info!(request_id, "no-input timeout");
                    self.recognition_complete(CompletionCause::NoInputTimeout, None);
                }
            }
            DetectorEvent::None => {}
        }

        // Buffer the frame for transmission (drop-tail on overflow).
        self.audio.write(frame);

        if self.streaming_enabled {
            let speech_started = self.lock_state().speech_started;
            if speech_started {
                loop {
                    let stream_pos = self.lock_state().stream_pos;
                    if self.audio.bytes_written() < stream_pos + STREAM_CHUNK_SIZE {
                        break;
                    }
                    let Some(chunk) = self.audio.copy_range(stream_pos, STREAM_CHUNK_SIZE) else {
                        break;
                    };
                    self.lock_state().stream_pos = stream_pos + STREAM_CHUNK_SIZE;
                    self.post(|session| RecogTaskMessage::StreamAudioChunk(session, chunk));
                }
            }
        }
    }

    /// Emit RECOGNITION-COMPLETE exactly once for the active request.
    fn recognition_complete(&self, cause: CompletionCause, body: Option<String>) {
        let request = {
            let mut state = self.lock_state();
            state.waiting_result = false;
            state.speech_started = false;
            state.stream_pos = 0;
            state.recognize_start = None;
            state.recog_request.take()
        };
        let Some(request) = request else {
            return;
        };
        let content_type = body.as_ref().map(|_| NLSML_CONTENT_TYPE.to_string());
        tracing::info!(request_id = request.id, ?cause, "RECOGNITION complete");
        self.sink
            .message_send(ChannelMessage::Event(Event::RecognitionComplete {
                request_id: request.id,
                cause,
                body,
                content_type,
            }));
    }

    // -----------------------------------------------------------------------
    // Background-task handlers
    // -----------------------------------------------------------------------

    pub(crate) async fn handle_open(&self) {
        tracing::info!("recog channel open");
        self.sink.open_respond(true);
    }

    pub(crate) async fn handle_close(&self) {
        tracing::info!("recog channel close");
        self.ws.disconnect(true).await;
        self.sink.close_respond();
    }

    pub(crate) async fn handle_request(&self, request: RecogRequest) {
        match request.method {
            RecogMethod::Recognize => self.recognize(request).await,
            RecogMethod::Stop => self.stop(request),
            RecogMethod::StartInputTimers => self.timers_start(request),
            RecogMethod::SetParams
            | RecogMethod::GetParams
            | RecogMethod::DefineGrammar
            | RecogMethod::GetResult => self.default_respond(request),
        }
    }

    async fn recognize(&self, request: RecogRequest) {
        let Some(codec) = self.codec() else {
            tracing::warn!(
                request_id = request.id,
                "RECOGNIZE without a negotiated codec"
            );
            self.sink.message_send(ChannelMessage::Response(
                Response::method_failed(request.id),
            ));
            return;
        };

        {
            let mut detector = self
                .detector
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(ms) = request.headers.no_input_timeout {
                detector.set_noinput_timeout(Duration::from_millis(ms));
            }
            if let Some(ms) = request.headers.speech_complete_timeout {
                detector.set_silence_timeout(Duration::from_millis(ms));
            }
            detector.reset();
        }

        if !self.ws.ensure_connected().await {
            tracing::error!(request_id = request.id, "unable to reach the ASR server");
            self.sink.message_send(ChannelMessage::Response(
                Response::method_failed(request.id),
            ));
            return;
        }

        tracing::info!(
            request_id = request.id,
            sample_rate = codec.sample_rate,
            streaming = self.streaming_enabled,
            "RECOGNIZE"
        );
        self.audio.clear();
        {
            let mut state = self.lock_state();
            state.timers_started = request.headers.start_input_timers.unwrap_or(true);
            state.speech_started = false;
            state.waiting_result = false;
            state.stream_pos = 0;
            state.recognize_start = Some(Instant::now());
        }
        self.sink
            .message_send(ChannelMessage::Response(Response::in_progress(request.id)));
        self.lock_state().recog_request = Some(request);
    }

    /// The STOP response is deferred: the next `stream_write` flushes it.
    fn stop(&self, request: RecogRequest) {
        tracing::info!(request_id = request.id, "STOP");
        let mut state = self.lock_state();
        state.stop_response = Some(Response::success(request.id));
        state.waiting_result = false;
    }

    fn timers_start(&self, request: RecogRequest) {
        tracing::info!(request_id = request.id, "START-INPUT-TIMERS");
        self.lock_state().timers_started = true;
        self.sink
            .message_send(ChannelMessage::Response(Response::success(request.id)));
    }

    /// SET-PARAMS/GET-PARAMS/DEFINE-GRAMMAR/GET-RESULT: accepted as-is; the
    /// external recognizer needs no grammar handed over.
    fn default_respond(&self, request: RecogRequest) {
        tracing::debug!(request_id = request.id, method = ?request.method, "accepted");
        self.sink
            .message_send(ChannelMessage::Response(Response::success(request.id)));
    }

    /// Ship the un-streamed tail of the utterance and start polling for the
    /// result. The buffer and stream position are reset no matter what.
    pub(crate) async fn handle_send_audio_batch(&self) {
        let (stream_pos, active) = {
            let state = self.lock_state();
            (state.stream_pos, state.recog_request.is_some())
        };
        let tail = self.audio.drain_from(stream_pos);
        self.lock_state().stream_pos = 0;
        if !active {
            return;
        }

        if !self.ws.is_connected() {
            tracing::error!("ASR connection lost before the utterance was sent");
            self.recognition_complete(CompletionCause::Error, None);
            return;
        }
        if !tail.is_empty() {
            tracing::debug!(bytes = tail.len(), "sending utterance audio");
            if let Err(e) = self.ws.send_binary(&tail).await {
                tracing::error!(error = %e, "failed to send utterance audio");
                self.recognition_complete(CompletionCause::Error, None);
                return;
            }
        }
        self.lock_state().waiting_result = true;
        self.post(RecogTaskMessage::RecvResult);
    }

    /// Ship one streaming chunk. Mid-utterance send failures are absorbed;
    /// the final batch path reports persistent trouble.
    pub(crate) async fn handle_stream_chunk(&self, chunk: Vec<u8>) {
        if !self.ws.is_connected() {
            return;
        }
        match self.ws.send_binary(&chunk).await {
            Ok(()) => tracing::trace!(bytes = chunk.len(), "stream chunk sent"),
            Err(e) => tracing::warn!(error = %e, "stream chunk send failed"),
        }
    }

    /// One result-poll tick. Re-posts itself until the result arrives or the
    /// recognition dies.
    pub(crate) async fn handle_recv_result(&self, cancel: &CancellationToken) {
        if cancel.is_cancelled() {
            return;
        }
        {
            let state = self.lock_state();
            if !state.waiting_result || state.recog_request.is_none() {
                return;
            }
            if let Some(start) = state.recognize_start {
                if start.elapsed() > MAX_RECOGNIZE_DURATION {
                    drop(state);
                    tracing::warn!("max recognize duration exceeded");
                    self.recognition_complete(CompletionCause::Error, None);
                    return;
                }
            }
        }

        match self.ws.receive_frame().await {
            Ok(Some(frame)) => match frame.opcode {
                Opcode::Text if !frame.payload.is_empty() => {
                    tracing::debug!(bytes = frame.payload.len(), "recognition result");
                    let body = String::from_utf8_lossy(&frame.payload).into_owned();
                    self.recognition_complete(CompletionCause::Normal, Some(body));
                    return;
                }
                Opcode::Close => {
                    tracing::warn!("ASR server closed before sending a result");
                    self.recognition_complete(CompletionCause::Error, None);
                    return;
                }
                _ => {}
            },
            Ok(None) => {}
            Err(e) => {
                tracing::error!(error = %e, "receive failed while awaiting result");
                self.recognition_complete(CompletionCause::Error, None);
                return;
            }
        }

        if !cancel.is_cancelled() {
            self.post(RecogTaskMessage::RecvResult);
        }
    }

    /// Terminal answer for a request caught in engine shutdown.
    pub(crate) fn reject_at_shutdown(&self, request: RecogRequest) {
        self.sink.message_send(ChannelMessage::Response(
            Response::method_failed(request.id),
        ));
    }
}
