// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Host plugin contract: the in-process message model and the sink traits.
//!
//! The MRCP codec, transport, and signalling live in the host media server.
//! The host maps inbound MRCP messages onto the request structures here and
//! implements the sink traits; the engines answer through them. Two rules
//! bind both sides:
//!
//! - every received request produces exactly one [`Response`];
//! - events ([`Event::StartOfInput`], [`Event::SpeakComplete`],
//!   [`Event::RecognitionComplete`]) are separate messages, and a completion
//!   event is sent exactly once per active request.
//!
//! Sink methods may be called from the engine's background task and from the
//! host's media threads; implementations must not block.

/// Sample rates the plugins advertise for LPCM audio.
pub const SUPPORTED_SAMPLE_RATES: [u32; 2] = [8000, 16000];

/// Content type of recognition result bodies, forwarded verbatim.
pub const NLSML_CONTENT_TYPE: &str = "application/x-nlsml";

/// Identifies a request within a channel.
pub type RequestId = u64;

/// Negotiated codec parameters for a media stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecDescriptor {
    pub sample_rate: u32,
    /// Bytes per host media frame.
    pub frame_size: usize,
}

impl CodecDescriptor {
    /// LPCM descriptor with the conventional 20 ms frame (16-bit mono).
    pub fn lpcm(sample_rate: u32) -> CodecDescriptor {
        CodecDescriptor {
            sample_rate,
            frame_size: (sample_rate as usize / 50) * 2,
        }
    }

    pub fn is_supported(&self) -> bool {
        SUPPORTED_SAMPLE_RATES.contains(&self.sample_rate)
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Synthesizer methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthMethod {
    SetParams,
    GetParams,
    Speak,
    Stop,
    Pause,
    Resume,
    BargeInOccurred,
}

/// Synthesizer request headers the core reads.
#[derive(Debug, Clone, Default)]
pub struct SynthHeaders {
    pub voice_name: Option<String>,
    pub prosody_rate: Option<f32>,
    pub prosody_pitch: Option<f32>,
    pub prosody_volume: Option<f32>,
}

/// A synthesizer request as handed over by the host.
#[derive(Debug, Clone)]
pub struct SynthRequest {
    pub id: RequestId,
    pub method: SynthMethod,
    pub headers: SynthHeaders,
    /// Message body; the text to speak for SPEAK.
    pub body: String,
    pub session_id: String,
}

impl SynthRequest {
    pub fn new(id: RequestId, method: SynthMethod) -> SynthRequest {
        SynthRequest {
            id,
            method,
            headers: SynthHeaders::default(),
            body: String::new(),
            session_id: String::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> SynthRequest {
        self.body = body.into();
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> SynthRequest {
        self.session_id = session_id.into();
        self
    }

    pub fn with_voice_name(mut self, voice_name: impl Into<String>) -> SynthRequest {
        self.headers.voice_name = Some(voice_name.into());
        self
    }
}

/// Recognizer methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecogMethod {
    SetParams,
    GetParams,
    DefineGrammar,
    Recognize,
    GetResult,
    StartInputTimers,
    Stop,
}

/// Recognizer request headers the core reads.
#[derive(Debug, Clone, Default)]
pub struct RecogHeaders {
    /// `Start-Input-Timers`; defaults to true when absent.
    pub start_input_timers: Option<bool>,
    /// `No-Input-Timeout` in milliseconds.
    pub no_input_timeout: Option<u64>,
    /// `Speech-Complete-Timeout` in milliseconds.
    pub speech_complete_timeout: Option<u64>,
}

/// A recognizer request as handed over by the host.
#[derive(Debug, Clone)]
pub struct RecogRequest {
    pub id: RequestId,
    pub method: RecogMethod,
    pub headers: RecogHeaders,
    /// Message body; grammar content for DEFINE-GRAMMAR (ignored by the
    /// core, the external recognizer is ambient).
    pub body: String,
    pub session_id: String,
}

impl RecogRequest {
    pub fn new(id: RequestId, method: RecogMethod) -> RecogRequest {
        RecogRequest {
            id,
            method,
            headers: RecogHeaders::default(),
            body: String::new(),
            session_id: String::new(),
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> RecogRequest {
        self.session_id = session_id.into();
        self
    }
}

// ---------------------------------------------------------------------------
// Responses and events
// ---------------------------------------------------------------------------

/// Response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Success,
    MethodFailed,
}

/// Request state carried on responses and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    InProgress,
    Complete,
}

/// The single response sent for a request.
#[derive(Debug, Clone)]
pub struct Response {
    pub request_id: RequestId,
    pub status: StatusCode,
    pub state: RequestState,
    /// Free-form response headers (e.g. reported parameters).
    pub headers: Vec<(String, String)>,
}

impl Response {
    /// Successful terminal response.
    pub fn success(request_id: RequestId) -> Response {
        Response {
            request_id,
            status: StatusCode::Success,
            state: RequestState::Complete,
            headers: Vec::new(),
        }
    }

    /// Successful response leaving the request in progress.
    pub fn in_progress(request_id: RequestId) -> Response {
        Response {
            request_id,
            status: StatusCode::Success,
            state: RequestState::InProgress,
            headers: Vec::new(),
        }
    }

    /// Terminal failure response.
    pub fn method_failed(request_id: RequestId) -> Response {
        Response {
            request_id,
            status: StatusCode::MethodFailed,
            state: RequestState::Complete,
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Response {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Why a request completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionCause {
    Normal,
    Error,
    NoInputTimeout,
    TooMuchSpeech,
}

/// Events the host forwards to MRCP clients.
#[derive(Debug, Clone)]
pub enum Event {
    SpeakComplete {
        request_id: RequestId,
        cause: CompletionCause,
    },
    StartOfInput {
        request_id: RequestId,
    },
    RecognitionComplete {
        request_id: RequestId,
        cause: CompletionCause,
        body: Option<String>,
        content_type: Option<String>,
    },
}

impl Event {
    pub fn request_id(&self) -> RequestId {
        match self {
            Event::SpeakComplete { request_id, .. }
            | Event::StartOfInput { request_id }
            | Event::RecognitionComplete { request_id, .. } => *request_id,
        }
    }

    /// Request state the event carries: START-OF-INPUT leaves the request in
    /// progress, completions are terminal.
    pub fn request_state(&self) -> RequestState {
        match self {
            Event::StartOfInput { .. } => RequestState::InProgress,
            Event::SpeakComplete { .. } | Event::RecognitionComplete { .. } => {
                RequestState::Complete
            }
        }
    }
}

/// A message dispatched to the host for a channel.
#[derive(Debug, Clone)]
pub enum ChannelMessage {
    Response(Response),
    Event(Event),
}

// ---------------------------------------------------------------------------
// Sink traits
// ---------------------------------------------------------------------------

/// Host side of an engine channel.
pub trait ChannelSink: Send + Sync {
    /// Dispatch a response or event toward the MRCP client.
    fn message_send(&self, message: ChannelMessage) -> bool;
    /// Asynchronous answer to a channel open.
    fn open_respond(&self, ok: bool);
    /// Asynchronous answer to a channel close.
    fn close_respond(&self);
}

/// Host side of an engine.
pub trait EngineSink: Send + Sync {
    fn open_respond(&self, ok: bool);
    fn close_respond(&self);
}
