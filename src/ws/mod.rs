// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! WebSocket transport: RFC 6455 framing codec and the client built on it.

pub mod client;
pub mod frame;

pub use client::{WsClient, WsConfig, WsError, WsState};
pub use frame::{apply_mask, decode_frame, encode_frame, Frame, FrameError, Opcode};
