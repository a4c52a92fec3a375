// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Recognizer engine: LPCM audio in, recognition text out.
//!
//! The engine owns one background task shared by all of its channels. Each
//! channel is a [`RecogSession`] with its own WebSocket client, audio buffer,
//! and voice-activity detector; the host feeds captured audio through
//! [`RecogSession::stream_write`] one codec frame at a time. Utterance audio
//! is shipped either as one binary frame per utterance (batch mode) or in
//! 200 ms chunks as it arrives (`streaming = "true"`).

pub mod session;

pub use session::RecogSession;

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use crate::audio::{ActivityDetector, AudioBuffer, DetectorParams};
use crate::config::{
    audio_size_from_params, streaming_from_params, ws_config_from_params, ConfigError,
    EngineParams, RECOG_DEFAULT_AUDIO_SIZE,
};
use crate::mrcp::{ChannelSink, EngineSink, RecogRequest};
use crate::task::TaskQueue;
use crate::ws::WsClient;

/// Default handshake path for the ASR server.
pub const DEFAULT_ASR_PATH: &str = "/asr";

/// Messages serviced by the recognizer background task, FIFO.
pub(crate) enum RecogTaskMessage {
    OpenChannel(Arc<RecogSession>),
    CloseChannel(Arc<RecogSession>),
    RequestDispatch(Arc<RecogSession>, RecogRequest),
    /// Ship the utterance tail and start polling for the result.
    SendAudioBatch(Arc<RecogSession>),
    /// Ship one 200 ms chunk (streaming mode).
    StreamAudioChunk(Arc<RecogSession>, Vec<u8>),
    /// One result-poll tick; re-posted by the handler while waiting.
    RecvResult(Arc<RecogSession>),
}

/// Recognizer engine.
pub struct RecogEngine {
    params: EngineParams,
    task: TaskQueue<RecogTaskMessage>,
}

impl RecogEngine {
    /// Create the engine and spawn its background task.
    pub fn new(params: EngineParams) -> std::io::Result<RecogEngine> {
        let task = TaskQueue::spawn("ws-recog-engine", run_task)?;
        tracing::info!("recognizer engine created");
        Ok(RecogEngine { params, task })
    }

    pub fn open(&self, sink: &dyn EngineSink) {
        tracing::info!("recognizer engine open");
        sink.open_respond(true);
    }

    /// Stop the background task (drain, then join) and answer the host.
    pub fn close(&self, sink: &dyn EngineSink) {
        tracing::info!("recognizer engine close");
        self.task.shutdown();
        sink.close_respond();
    }

    /// Create one channel. Parameter problems surface here as
    /// [`ConfigError`].
    pub fn create_channel(
        &self,
        sink: Arc<dyn ChannelSink>,
    ) -> Result<Arc<RecogSession>, ConfigError> {
        let mut ws_config = ws_config_from_params(&self.params, DEFAULT_ASR_PATH)?;
        let buffer_size = audio_size_from_params(&self.params, RECOG_DEFAULT_AUDIO_SIZE)?;
        ws_config.max_frame_size = buffer_size;
        let streaming = streaming_from_params(&self.params);
        tracing::info!(
            host = %ws_config.host,
            port = ws_config.port,
            path = %ws_config.path,
            buffer_size,
            streaming,
            "recog channel created"
        );
        Ok(RecogSession::create(
            sink,
            self.task.sender(),
            WsClient::new(ws_config),
            AudioBuffer::new(buffer_size),
            ActivityDetector::new(DetectorParams::default()),
            streaming,
        ))
    }
}

/// The engine's message loop: strict FIFO, one message at a time, the only
/// place WebSocket I/O happens.
async fn run_task(mut rx: UnboundedReceiver<RecogTaskMessage>, cancel: CancellationToken) {
    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };
        dispatch(message, &cancel).await;
    }
    // Drain after cancellation: lifecycle messages still get their answers,
    // requests caught mid-shutdown get a terminal failure, polls stop.
    while let Ok(message) = rx.try_recv() {
        match message {
            RecogTaskMessage::OpenChannel(session) => session.handle_open().await,
            RecogTaskMessage::CloseChannel(session) => session.handle_close().await,
            RecogTaskMessage::RequestDispatch(session, request) => {
                session.reject_at_shutdown(request)
            }
            RecogTaskMessage::SendAudioBatch(..)
            | RecogTaskMessage::StreamAudioChunk(..)
            | RecogTaskMessage::RecvResult(..) => {}
        }
    }
}

async fn dispatch(message: RecogTaskMessage, cancel: &CancellationToken) {
    match message {
        RecogTaskMessage::OpenChannel(session) => session.handle_open().await,
        RecogTaskMessage::CloseChannel(session) => session.handle_close().await,
        RecogTaskMessage::RequestDispatch(session, request) => {
            session.handle_request(request).await
        }
        RecogTaskMessage::SendAudioBatch(session) => session.handle_send_audio_batch().await,
        RecogTaskMessage::StreamAudioChunk(session, chunk) => {
            session.handle_stream_chunk(chunk).await
        }
        RecogTaskMessage::RecvResult(session) => session.handle_recv_result(cancel).await,
    }
}
