// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Wire protocol toward the TTS server.
//!
//! One minified JSON TEXT frame per SPEAK, answered by binary LPCM chunks and
//! a final status TEXT frame. The envelope is formatted by hand: the field
//! order is fixed and the prosody floats always carry two decimals
//! (`"speed":1.00`), which a generic serializer would not preserve.

use std::fmt::Write;

/// Substrings that mark the final status message of a synthesis
/// (case-sensitive, matched anywhere in the TEXT payload).
pub const COMPLETION_MARKERS: [&str; 3] = ["complete", "end", "done"];

/// Whether a TEXT payload announces the end of synthesis.
pub fn is_completion_marker(payload: &[u8]) -> bool {
    let text = String::from_utf8_lossy(payload);
    COMPLETION_MARKERS.iter().any(|marker| text.contains(marker))
}

/// Escape a string for embedding in a JSON string literal.
///
/// `"` and `\` get a backslash, the usual control shorthands (`\b \f \n \r
/// \t`) are used, any other byte below 0x20 becomes `\u00xx` (lowercase hex),
/// and everything else is emitted verbatim (input is UTF-8 already).
pub fn json_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 8);
    for c in input.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{0008}' => out.push_str("\\b"),
            '\u{000C}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// The JSON envelope sent for one SPEAK.
#[derive(Debug, Clone)]
pub struct TtsRequest<'a> {
    pub text: &'a str,
    pub voice: &'a str,
    pub speed: f32,
    pub pitch: f32,
    pub volume: f32,
    pub sample_rate: u32,
    pub session_id: &'a str,
}

impl<'a> TtsRequest<'a> {
    /// Envelope with default prosody and voice.
    pub fn new(text: &'a str, sample_rate: u32) -> TtsRequest<'a> {
        TtsRequest {
            text,
            voice: "default",
            speed: 1.0,
            pitch: 1.0,
            volume: 1.0,
            sample_rate,
            session_id: "",
        }
    }

    /// Minified JSON, fixed field order, two-decimal floats.
    pub fn to_json(&self) -> String {
        format!(
            "{{\"action\":\"tts\",\"text\":\"{}\",\"voice\":\"{}\",\"speed\":{:.2},\"pitch\":{:.2},\"volume\":{:.2},\"sample_rate\":{},\"format\":\"pcm\",\"session_id\":\"{}\"}}",
            json_escape(self.text),
            json_escape(self.voice),
            self.speed,
            self.pitch,
            self.volume,
            self.sample_rate,
            json_escape(self.session_id),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_exact_bytes() {
        let mut request = TtsRequest::new("hi", 8000);
        request.session_id = "sid";
        assert_eq!(
            request.to_json(),
            "{\"action\":\"tts\",\"text\":\"hi\",\"voice\":\"default\",\"speed\":1.00,\
             \"pitch\":1.00,\"volume\":1.00,\"sample_rate\":8000,\"format\":\"pcm\",\
             \"session_id\":\"sid\"}"
        );
    }

    #[test]
    fn test_envelope_prosody_formatting() {
        let request = TtsRequest {
            speed: 0.5,
            pitch: 1.25,
            volume: 2.0,
            ..TtsRequest::new("x", 16000)
        };
        let json = request.to_json();
        assert!(json.contains("\"speed\":0.50"));
        assert!(json.contains("\"pitch\":1.25"));
        assert!(json.contains("\"volume\":2.00"));
        assert!(json.contains("\"sample_rate\":16000"));
    }

    #[test]
    fn test_escape_hostile_text() {
        // Quote, backslash, newline: six bytes between the enclosing quotes.
        assert_eq!(json_escape("\"\\\n"), "\\\"\\\\\\n");
        let request = TtsRequest::new("\"\\\n", 8000);
        assert!(request.to_json().contains("\"text\":\"\\\"\\\\\\n\""));
    }

    #[test]
    fn test_escape_control_shorthands() {
        assert_eq!(
            json_escape("a\u{0008}b\u{000C}c\nd\re\tf"),
            "a\\bb\\fc\\nd\\re\\tf"
        );
    }

    #[test]
    fn test_escape_bare_control_chars_lowercase_hex() {
        assert_eq!(json_escape("\u{0001}"), "\\u0001");
        assert_eq!(json_escape("\u{001f}"), "\\u001f");
        assert_eq!(json_escape("\u{001b}"), "\\u001b");
    }

    #[test]
    fn test_escape_passes_utf8_verbatim() {
        assert_eq!(json_escape("grüß dich 🌍"), "grüß dich 🌍");
    }

    #[test]
    fn test_escape_roundtrips_through_json_parser() {
        let hostile = "line\nbreak \"quoted\" back\\slash \t \u{0001} ünïcode";
        let literal = format!("\"{}\"", json_escape(hostile));
        let parsed: String = serde_json::from_str(&literal).expect("valid JSON literal");
        assert_eq!(parsed, hostile);
    }

    #[test]
    fn test_envelope_parses_as_json() {
        let mut request = TtsRequest::new("hello \"world\"", 16000);
        request.session_id = "s-1";
        let value: serde_json::Value =
            serde_json::from_str(&request.to_json()).expect("valid JSON");
        assert_eq!(value["action"], "tts");
        assert_eq!(value["text"], "hello \"world\"");
        assert_eq!(value["voice"], "default");
        assert_eq!(value["speed"], 1.0);
        assert_eq!(value["sample_rate"], 16000);
        assert_eq!(value["format"], "pcm");
        assert_eq!(value["session_id"], "s-1");
    }

    #[test]
    fn test_completion_markers() {
        assert!(is_completion_marker(b"{\"status\":\"complete\"}"));
        assert!(is_completion_marker(b"synthesis end"));
        assert!(is_completion_marker(b"all done"));
        assert!(!is_completion_marker(b"{\"status\":\"streaming\"}"));
        // Case-sensitive on purpose.
        assert!(!is_completion_marker(b"COMPLETE"));
        assert!(!is_completion_marker(b""));
    }
}
