// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Engine configuration surface.
//!
//! Engines are configured through a flat string parameter map supplied by the
//! host (`ws-host`, `ws-port`, `ws-path`, `max-audio-size`, `streaming`).
//! Values are parsed per channel; anything unparsable or out of range is a
//! [`ConfigError`] surfaced from `create_channel`. No environment variables
//! and no on-disk state.

use std::collections::HashMap;

use crate::ws::WsConfig;

/// Parameter key for the WebSocket server host.
pub const PARAM_WS_HOST: &str = "ws-host";
/// Parameter key for the WebSocket server port.
pub const PARAM_WS_PORT: &str = "ws-port";
/// Parameter key for the handshake path.
pub const PARAM_WS_PATH: &str = "ws-path";
/// Parameter key for the audio buffer capacity in bytes.
pub const PARAM_MAX_AUDIO_SIZE: &str = "max-audio-size";
/// Parameter key enabling chunked audio streaming (recognizer only).
pub const PARAM_STREAMING: &str = "streaming";

/// Hard ceiling on the audio buffer capacity.
pub const MAX_AUDIO_SIZE_CEILING: usize = 50 * 1024 * 1024;
/// Default synthesizer audio buffer capacity.
pub const SYNTH_DEFAULT_AUDIO_SIZE: usize = 2 * 1024 * 1024;
/// Default recognizer audio buffer capacity.
pub const RECOG_DEFAULT_AUDIO_SIZE: usize = 512 * 1024;

/// Flat engine parameter map.
#[derive(Debug, Clone, Default)]
pub struct EngineParams {
    entries: HashMap<String, String>,
}

impl EngineParams {
    pub fn new() -> EngineParams {
        EngineParams::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Builder-style setter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> EngineParams {
        self.set(key, value);
        self
    }
}

impl FromIterator<(String, String)> for EngineParams {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> EngineParams {
        EngineParams {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Invalid engine parameter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {PARAM_WS_PORT} value {0:?}")]
    InvalidPort(String),
    #[error(
        "invalid {PARAM_MAX_AUDIO_SIZE} value {0:?} (expected 1..={MAX_AUDIO_SIZE_CEILING} bytes)"
    )]
    InvalidAudioSize(String),
}

/// Build the per-session WebSocket configuration from engine parameters.
pub fn ws_config_from_params(
    params: &EngineParams,
    default_path: &str,
) -> Result<WsConfig, ConfigError> {
    let mut config = WsConfig::default();
    if let Some(host) = params.get(PARAM_WS_HOST) {
        config.host = host.to_string();
    }
    if let Some(port) = params.get(PARAM_WS_PORT) {
        config.port = port
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| ConfigError::InvalidPort(port.to_string()))?;
    }
    config.path = params.get(PARAM_WS_PATH).unwrap_or(default_path).to_string();
    Ok(config)
}

/// Resolve the audio buffer capacity from engine parameters.
pub fn audio_size_from_params(
    params: &EngineParams,
    default: usize,
) -> Result<usize, ConfigError> {
    match params.get(PARAM_MAX_AUDIO_SIZE) {
        None => Ok(default),
        Some(value) => value
            .parse::<usize>()
            .ok()
            .filter(|size| *size > 0 && *size <= MAX_AUDIO_SIZE_CEILING)
            .ok_or_else(|| ConfigError::InvalidAudioSize(value.to_string())),
    }
}

/// Whether chunked streaming is enabled (`streaming = "true"`, exact).
pub fn streaming_from_params(params: &EngineParams) -> bool {
    params.get(PARAM_STREAMING) == Some("true")
}
