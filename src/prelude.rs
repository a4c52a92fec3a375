// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Common re-exports for convenient use of the speechgate plugins.
//!
//! ```
//! use speechgate::prelude::*;
//! ```

pub use std::sync::Arc;

pub use crate::audio::{ActivityDetector, AudioBuffer, DetectorEvent, DetectorParams};
pub use crate::config::{ConfigError, EngineParams};
pub use crate::mrcp::{
    ChannelMessage, ChannelSink, CodecDescriptor, CompletionCause, EngineSink, Event,
    RecogHeaders, RecogMethod, RecogRequest, RequestId, RequestState, Response, StatusCode,
    SynthHeaders, SynthMethod, SynthRequest,
};
pub use crate::recog::{RecogEngine, RecogSession};
pub use crate::synth::{SynthEngine, SynthSession};
pub use crate::ws::{Frame, Opcode, WsClient, WsConfig, WsError, WsState};
