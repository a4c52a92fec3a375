// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Synthesizer engine: text in, LPCM audio out.
//!
//! The engine owns one background task shared by all of its channels. Each
//! channel is a [`SynthSession`] with its own WebSocket client and audio
//! buffer; the host drains synthesized audio through
//! [`SynthSession::stream_read`] one codec frame at a time.

pub mod protocol;
pub mod session;

pub use session::SynthSession;

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use crate::audio::AudioBuffer;
use crate::config::{
    audio_size_from_params, ws_config_from_params, ConfigError, EngineParams,
    SYNTH_DEFAULT_AUDIO_SIZE,
};
use crate::mrcp::{ChannelSink, EngineSink, SynthRequest};
use crate::task::TaskQueue;
use crate::ws::WsClient;

/// Default handshake path for the TTS server.
pub const DEFAULT_TTS_PATH: &str = "/tts";

/// Messages serviced by the synthesizer background task, FIFO.
pub(crate) enum SynthTaskMessage {
    OpenChannel(Arc<SynthSession>),
    CloseChannel(Arc<SynthSession>),
    RequestDispatch(Arc<SynthSession>, SynthRequest),
    /// Connect and send the TTS envelope for the stored SPEAK.
    SpeakStart(Arc<SynthSession>, SynthRequest),
    /// One receive-poll tick; re-posted by the handler while the speak lives.
    RecvPoll(Arc<SynthSession>),
}

/// Synthesizer engine.
pub struct SynthEngine {
    params: EngineParams,
    task: TaskQueue<SynthTaskMessage>,
}

impl SynthEngine {
    /// Create the engine and spawn its background task.
    pub fn new(params: EngineParams) -> std::io::Result<SynthEngine> {
        let task = TaskQueue::spawn("ws-synth-engine", run_task)?;
        tracing::info!("synthesizer engine created");
        Ok(SynthEngine { params, task })
    }

    pub fn open(&self, sink: &dyn EngineSink) {
        tracing::info!("synthesizer engine open");
        sink.open_respond(true);
    }

    /// Stop the background task (drain, then join) and answer the host.
    pub fn close(&self, sink: &dyn EngineSink) {
        tracing::info!("synthesizer engine close");
        self.task.shutdown();
        sink.close_respond();
    }

    /// Create one channel. Parameter problems surface here as
    /// [`ConfigError`].
    pub fn create_channel(
        &self,
        sink: Arc<dyn ChannelSink>,
    ) -> Result<Arc<SynthSession>, ConfigError> {
        let mut ws_config = ws_config_from_params(&self.params, DEFAULT_TTS_PATH)?;
        let buffer_size = audio_size_from_params(&self.params, SYNTH_DEFAULT_AUDIO_SIZE)?;
        // A single inbound frame can at most fill the audio buffer.
        ws_config.max_frame_size = buffer_size;
        tracing::info!(
            host = %ws_config.host,
            port = ws_config.port,
            path = %ws_config.path,
            buffer_size,
            "synth channel created"
        );
        Ok(SynthSession::create(
            sink,
            self.task.sender(),
            WsClient::new(ws_config),
            AudioBuffer::new(buffer_size),
        ))
    }
}

/// The engine's message loop: strict FIFO, one message at a time, the only
/// place WebSocket I/O happens.
async fn run_task(mut rx: UnboundedReceiver<SynthTaskMessage>, cancel: CancellationToken) {
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
            SynthTaskMessage::OpenChannel(session) => session.handle_open().await,
            SynthTaskMessage::CloseChannel(session) => session.handle_close().await,
            SynthTaskMessage::RequestDispatch(session, request) => {
                session.reject_at_shutdown(request)
            }
            SynthTaskMessage::SpeakStart(..) | SynthTaskMessage::RecvPoll(..) => {}
        }
    }
}

async fn dispatch(message: SynthTaskMessage, cancel: &CancellationToken) {
    match message {
        SynthTaskMessage::OpenChannel(session) => session.handle_open().await,
        SynthTaskMessage::CloseChannel(session) => session.handle_close().await,
        SynthTaskMessage::RequestDispatch(session, request) => {
            session.handle_request(request).await
        }
        SynthTaskMessage::SpeakStart(session, request) => {
            session.handle_speak_start(request).await
        }
        SynthTaskMessage::RecvPoll(session) => session.handle_recv_poll(cancel).await,
    }
}
