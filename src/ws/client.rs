// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! WebSocket client over a plain TCP stream.
//!
//! One client per session, one operation at a time: the stream sits behind a
//! mutex so the handshake, sends, and receives never interleave. All I/O
//! happens on the engine's background task; host threads only read the
//! connection-state snapshot, which is mirrored in an atomic.
//!
//! Receives are polled: [`WsClient::receive_frame`] waits at most
//! `recv_poll_timeout` for the first header byte and returns `Ok(None)` when
//! the peer is idle. Once a frame has started, the remainder is read under an
//! extended deadline. Inbound PINGs are answered with a masked PONG before
//! the frame is handed to the caller.
//!
//! The opening handshake accepts any response whose status line contains
//! `101`; `Sec-WebSocket-Accept` is not validated.

use std::io;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::time::Duration;

use base64::Engine;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::ws::frame::{
    apply_mask, encode_frame, Frame, FrameError, Opcode, FIN_BIT, MASK_BIT, PAYLOAD_LEN_16,
    PAYLOAD_LEN_64, PAYLOAD_LEN_MASK, RSV_MASK,
};

/// Client configuration, all fields defaulted.
#[derive(Debug, Clone, PartialEq)]
pub struct WsConfig {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub connect_timeout: Duration,
    /// How long a single `receive_frame` call waits for data.
    pub recv_poll_timeout: Duration,
    pub send_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Upper bound on a single frame payload, both directions.
    pub max_frame_size: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            path: "/".to_string(),
            connect_timeout: Duration::from_secs(30),
            recv_poll_timeout: Duration::from_millis(100),
            send_timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            max_frame_size: 1024 * 1024,
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WsState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Closing = 3,
    Error = 4,
}

impl WsState {
    fn from_u8(value: u8) -> WsState {
        match value {
            1 => WsState::Connecting,
            2 => WsState::Connected,
            3 => WsState::Closing,
            4 => WsState::Error,
            _ => WsState::Disconnected,
        }
    }

    /// Human-readable state description for logs.
    pub fn description(self) -> &'static str {
        match self {
            WsState::Disconnected => "disconnected",
            WsState::Connecting => "connecting",
            WsState::Connected => "connected",
            WsState::Closing => "connection closing",
            WsState::Error => "connection error",
        }
    }
}

/// Client errors.
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("not connected")]
    NotConnected,
    #[error("socket error: {0}")]
    Socket(#[from] io::Error),
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("payload of {size} bytes exceeds the {limit}-byte frame limit")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("all {attempts} connection attempts failed")]
    RetriesExhausted { attempts: u32 },
}

struct Inner {
    stream: Option<TcpStream>,
    last_activity: Option<std::time::Instant>,
}

/// WebSocket client owning one TCP connection.
pub struct WsClient {
    config: WsConfig,
    inner: tokio::sync::Mutex<Inner>,
    state: AtomicU8,
    retry_count: AtomicU32,
}

impl WsClient {
    pub fn new(config: WsConfig) -> WsClient {
        WsClient {
            config,
            inner: tokio::sync::Mutex::new(Inner {
                stream: None,
                last_activity: None,
            }),
            state: AtomicU8::new(WsState::Disconnected as u8),
            retry_count: AtomicU32::new(0),
        }
    }

    pub fn config(&self) -> &WsConfig {
        &self.config
    }

    /// Current state snapshot. Callable from any thread without suspending.
    pub fn state(&self) -> WsState {
        WsState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == WsState::Connected
    }

    /// Number of failed attempts in the most recent retry cycle.
    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::Relaxed)
    }

    /// Timestamp of the last successful send or receive.
    pub async fn last_activity(&self) -> Option<std::time::Instant> {
        self.inner.lock().await.last_activity
    }

    fn set_state(&self, state: WsState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Open the TCP connection and run the upgrade handshake.
    pub async fn connect(&self) -> Result<(), WsError> {
        let mut inner = self.inner.lock().await;
        if self.state() == WsState::Connected {
            return Ok(());
        }
        self.set_state(WsState::Connecting);
        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            path = %self.config.path,
            "connecting"
        );

        let addr = (self.config.host.as_str(), self.config.port);
        let mut stream = match timeout(self.config.connect_timeout, TcpStream::connect(addr)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.set_state(WsState::Error);
                return Err(WsError::Socket(e));
            }
            Err(_) => {
                self.set_state(WsState::Error);
                return Err(WsError::Socket(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "connect timed out",
                )));
            }
        };
        let _ = stream.set_nodelay(true);

        if let Err(e) = self.handshake(&mut stream).await {
            self.set_state(WsState::Error);
            return Err(e);
        }

        inner.stream = Some(stream);
        inner.last_activity = Some(std::time::Instant::now());
        self.retry_count.store(0, Ordering::Relaxed);
        self.set_state(WsState::Connected);
        tracing::info!(host = %self.config.host, port = self.config.port, "connected");
        Ok(())
    }

    /// Send the HTTP upgrade request and wait for the status line.
    async fn handshake(&self, stream: &mut TcpStream) -> Result<(), WsError> {
        let key_bytes: [u8; 16] = rand::random();
        let key = base64::engine::general_purpose::STANDARD.encode(key_bytes);
        let request = format!(
            "GET {path} HTTP/1.1\r\n\
             Host: {host}:{port}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {key}\r\n\
             Sec-WebSocket-Version: 13\r\n\
             \r\n",
            path = self.config.path,
            host = self.config.host,
            port = self.config.port,
        );

        match timeout(self.config.connect_timeout, stream.write_all(request.as_bytes())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(WsError::Socket(e)),
            Err(_) => {
                return Err(WsError::HandshakeFailed(
                    "timed out sending upgrade request".to_string(),
                ))
            }
        }

        // Read up to the header terminator (or 4 KiB) within the connect
        // timeout; acceptance is decided by the status line alone.
        let deadline = tokio::time::Instant::now() + self.config.connect_timeout;
        let mut response = Vec::with_capacity(1024);
        let mut chunk = [0u8; 512];
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(WsError::HandshakeFailed(
                    "timed out waiting for upgrade response".to_string(),
                ));
            }
            let n = match timeout(remaining, stream.read(&mut chunk)).await {
                Ok(Ok(0)) => {
                    return Err(WsError::HandshakeFailed(
                        "connection closed during handshake".to_string(),
                    ))
                }
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(WsError::Socket(e)),
                Err(_) => {
                    return Err(WsError::HandshakeFailed(
                        "timed out waiting for upgrade response".to_string(),
                    ))
                }
            };
            response.extend_from_slice(&chunk[..n]);
            if response.windows(4).any(|w| w == b"\r\n\r\n") || response.len() >= 4096 {
                break;
            }
        }

        let text = String::from_utf8_lossy(&response);
        if !text.contains("101") {
            let status_line = text.lines().next().unwrap_or("").to_string();
            tracing::error!(status = %status_line, "handshake rejected");
            return Err(WsError::HandshakeFailed(status_line));
        }
        Ok(())
    }

    /// Connect with up to `max_retries + 1` attempts, sleeping `retry_delay`
    /// between failures.
    pub async fn connect_with_retry(&self) -> Result<(), WsError> {
        for attempt in 0..=self.config.max_retries {
            match self.connect().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    self.retry_count.store(attempt + 1, Ordering::Relaxed);
                    if attempt < self.config.max_retries {
                        tracing::warn!(
                            attempt = attempt + 1,
                            max_retries = self.config.max_retries,
                            error = %e,
                            "connection failed, retrying"
                        );
                        tokio::time::sleep(self.config.retry_delay).await;
                    } else {
                        tracing::error!(error = %e, "all connection retries exhausted");
                    }
                }
            }
        }
        Err(WsError::RetriesExhausted {
            attempts: self.config.max_retries + 1,
        })
    }

    /// True iff the client is connected after at most one retry cycle.
    pub async fn ensure_connected(&self) -> bool {
        if self.is_connected() {
            return true;
        }
        self.connect_with_retry().await.is_ok()
    }

    /// Send one masked TEXT frame.
    pub async fn send_text(&self, data: &[u8]) -> Result<(), WsError> {
        self.send_frame(Opcode::Text, data).await
    }

    /// Send one masked BINARY frame.
    pub async fn send_binary(&self, data: &[u8]) -> Result<(), WsError> {
        self.send_frame(Opcode::Binary, data).await
    }

    /// Send a masked PING with an empty payload.
    pub async fn send_ping(&self) -> Result<(), WsError> {
        self.send_frame(Opcode::Ping, &[]).await
    }

    /// Send a masked CLOSE with a status code and reason.
    pub async fn send_close(&self, code: u16, reason: &str) -> Result<(), WsError> {
        let frame = Frame::close(code, reason);
        self.send_frame(Opcode::Close, &frame.payload).await
    }

    async fn send_frame(&self, opcode: Opcode, payload: &[u8]) -> Result<(), WsError> {
        let mut inner = self.inner.lock().await;
        if self.state() != WsState::Connected {
            return Err(WsError::NotConnected);
        }
        if payload.len() > self.config.max_frame_size {
            tracing::error!(
                size = payload.len(),
                limit = self.config.max_frame_size,
                "payload exceeds frame limit"
            );
            return Err(WsError::PayloadTooLarge {
                size: payload.len(),
                limit: self.config.max_frame_size,
            });
        }
        let Some(stream) = inner.stream.as_mut() else {
            return Err(WsError::NotConnected);
        };

        let mask: [u8; 4] = rand::random();
        let wire = encode_frame(opcode, payload, mask);
        let result = timeout(self.config.send_timeout, stream.write_all(&wire)).await;
        match result {
            Ok(Ok(())) => {
                inner.last_activity = Some(std::time::Instant::now());
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "socket send failed");
                inner.stream = None;
                self.set_state(WsState::Error);
                Err(WsError::Socket(e))
            }
            Err(_) => {
                tracing::error!("socket send timed out");
                inner.stream = None;
                self.set_state(WsState::Error);
                Err(WsError::Socket(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "send timed out",
                )))
            }
        }
    }

    /// Receive one frame if available.
    ///
    /// `Ok(None)` means nothing arrived within `recv_poll_timeout`; callers
    /// poll again. Hard errors drop the socket and set the `Error` state.
    pub async fn receive_frame(&self) -> Result<Option<Frame>, WsError> {
        let mut inner = self.inner.lock().await;
        if self.state() != WsState::Connected {
            return Err(WsError::NotConnected);
        }
        let Some(mut stream) = inner.stream.take() else {
            return Err(WsError::NotConnected);
        };

        let mut first = [0u8; 1];
        match timeout(self.config.recv_poll_timeout, stream.read(&mut first)).await {
            Err(_) => {
                inner.stream = Some(stream);
                return Ok(None);
            }
            Ok(Ok(0)) => {
                self.set_state(WsState::Error);
                return Err(WsError::Socket(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by peer",
                )));
            }
            Ok(Ok(_)) => {}
            Ok(Err(e))
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
            {
                inner.stream = Some(stream);
                return Ok(None);
            }
            Ok(Err(e)) => {
                self.set_state(WsState::Error);
                return Err(WsError::Socket(e));
            }
        }

        // A frame has started; finish it under an extended deadline.
        let deadline = tokio::time::Instant::now() + self.config.recv_poll_timeout * 10;
        let frame = match self.read_frame_rest(&mut stream, first[0], deadline).await {
            Ok(frame) => frame,
            Err(e) => {
                self.set_state(WsState::Error);
                return Err(e);
            }
        };
        inner.last_activity = Some(std::time::Instant::now());

        match frame.opcode {
            Opcode::Close => {
                tracing::info!("close frame received");
                self.set_state(WsState::Closing);
            }
            Opcode::Ping => {
                // Answer before handing the frame up; best effort.
                let mask: [u8; 4] = rand::random();
                let pong = encode_frame(Opcode::Pong, &frame.payload, mask);
                let _ = timeout(self.config.send_timeout, stream.write_all(&pong)).await;
            }
            _ => {}
        }
        inner.stream = Some(stream);
        Ok(Some(frame))
    }

    async fn read_frame_rest(
        &self,
        stream: &mut TcpStream,
        b0: u8,
        deadline: tokio::time::Instant,
    ) -> Result<Frame, WsError> {
        if b0 & RSV_MASK != 0 {
            return Err(FrameError::MaskProtocol("reserved bits set").into());
        }
        let opcode =
            Opcode::from_u8(b0 & 0x0F).ok_or(FrameError::MaskProtocol("unknown opcode"))?;
        let fin = b0 & FIN_BIT != 0;

        let mut b1 = [0u8; 1];
        read_exact_deadline(stream, &mut b1, deadline).await?;
        let masked = b1[0] & MASK_BIT != 0;

        let payload_len: u64 = match b1[0] & PAYLOAD_LEN_MASK {
            PAYLOAD_LEN_16 => {
                let mut ext = [0u8; 2];
                read_exact_deadline(stream, &mut ext, deadline).await?;
                u16::from_be_bytes(ext) as u64
            }
            PAYLOAD_LEN_64 => {
                let mut ext = [0u8; 8];
                read_exact_deadline(stream, &mut ext, deadline).await?;
                u64::from_be_bytes(ext)
            }
            len7 => len7 as u64,
        };
        if payload_len > self.config.max_frame_size as u64 {
            tracing::error!(
                size = payload_len,
                limit = self.config.max_frame_size,
                "inbound frame exceeds size limit"
            );
            return Err(FrameError::FrameTooLarge {
                size: payload_len,
                limit: self.config.max_frame_size as u64,
            }
            .into());
        }

        let mask = if masked {
            let mut mask = [0u8; 4];
            read_exact_deadline(stream, &mut mask, deadline).await?;
            Some(mask)
        } else {
            None
        };

        let mut payload = vec![0u8; payload_len as usize];
        if !payload.is_empty() {
            read_exact_deadline(stream, &mut payload, deadline).await?;
        }
        if let Some(mask) = mask {
            apply_mask(&mut payload, mask);
        }

        Ok(Frame {
            fin,
            opcode,
            payload,
            masked,
        })
    }

    /// True iff data is readable within `wait`.
    pub async fn poll(&self, wait: Duration) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(stream) = inner.stream.as_mut() else {
            return false;
        };
        let mut probe = [0u8; 1];
        matches!(timeout(wait, stream.peek(&mut probe)).await, Ok(Ok(n)) if n > 0)
    }

    /// Close the connection, optionally sending a best-effort CLOSE frame.
    pub async fn disconnect(&self, send_close: bool) {
        let mut inner = self.inner.lock().await;
        if let Some(mut stream) = inner.stream.take() {
            if send_close && self.state() == WsState::Connected {
                let mask: [u8; 4] = rand::random();
                let close = encode_frame(Opcode::Close, &[], mask);
                let _ = timeout(self.config.send_timeout, stream.write_all(&close)).await;
            }
            let _ = stream.shutdown().await;
        }
        self.set_state(WsState::Disconnected);
        tracing::info!(host = %self.config.host, port = self.config.port, "disconnected");
    }
}

/// Read exactly `buf.len()` bytes before `deadline`; expiry is a short read.
async fn read_exact_deadline(
    stream: &mut TcpStream,
    buf: &mut [u8],
    deadline: tokio::time::Instant,
) -> Result<(), WsError> {
    let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
    match timeout(remaining, stream.read_exact(buf)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Err(WsError::Frame(FrameError::ShortRead))
        }
        Ok(Err(e)) => Err(WsError::Socket(e)),
        Err(_) => {
            tracing::warn!(bytes = buf.len(), "timed out waiting for frame data");
            Err(WsError::Frame(FrameError::ShortRead))
        }
    }
}
