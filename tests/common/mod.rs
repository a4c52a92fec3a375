// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Shared test fixtures: an in-process mock WebSocket speech server with its
//! own server-side frame codec, plus recording host sinks.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use speechgate::config::EngineParams;
use speechgate::mrcp::{
    ChannelMessage, ChannelSink, CompletionCause, EngineSink, Event, Response,
};

/// Install a `RUST_LOG`-driven test subscriber once; later calls no-op.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// ---------------------------------------------------------------------------
// Mock WebSocket server
// ---------------------------------------------------------------------------

/// A decoded frame as seen by the server.
pub struct ServerFrame {
    pub opcode: u8,
    pub payload: Vec<u8>,
    pub masked: bool,
    /// Header bytes on the wire, including the mask key if present.
    pub header_len: usize,
}

/// Server side of one accepted WebSocket connection.
pub struct ServerConn {
    stream: TcpStream,
    /// The raw HTTP upgrade request the client sent.
    pub handshake_request: String,
}

impl ServerConn {
    fn new(stream: TcpStream) -> ServerConn {
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("read timeout");
        ServerConn {
            stream,
            handshake_request: String::new(),
        }
    }

    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.stream
            .set_read_timeout(Some(timeout))
            .expect("read timeout");
    }

    fn read_handshake(&mut self) {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
            match self.stream.read(&mut byte) {
                Ok(0) | Err(_) => break,
                Ok(_) => buf.push(byte[0]),
            }
            if buf.len() > 16384 {
                break;
            }
        }
        self.handshake_request = String::from_utf8_lossy(&buf).into_owned();
    }

    fn write_raw(&mut self, bytes: &[u8]) {
        let _ = self.stream.write_all(bytes);
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Option<()> {
        self.stream.read_exact(buf).ok()
    }

    /// Read one client frame, unmasking the payload. `None` on timeout or a
    /// closed connection.
    pub fn read_frame(&mut self) -> Option<ServerFrame> {
        let mut header = [0u8; 2];
        self.read_bytes(&mut header)?;
        let masked = header[1] & 0x80 != 0;
        let mut header_len = 2usize;
        let len = match header[1] & 0x7F {
            126 => {
                let mut ext = [0u8; 2];
                self.read_bytes(&mut ext)?;
                header_len += 2;
                u16::from_be_bytes(ext) as usize
            }
            127 => {
                let mut ext = [0u8; 8];
                self.read_bytes(&mut ext)?;
                header_len += 8;
                u64::from_be_bytes(ext) as usize
            }
            len7 => len7 as usize,
        };
        let mask = if masked {
            let mut mask = [0u8; 4];
            self.read_bytes(&mut mask)?;
            header_len += 4;
            Some(mask)
        } else {
            None
        };
        let mut payload = vec![0u8; len];
        if len > 0 {
            self.read_bytes(&mut payload)?;
        }
        if let Some(mask) = mask {
            for (i, byte) in payload.iter_mut().enumerate() {
                *byte ^= mask[i % 4];
            }
        }
        Some(ServerFrame {
            opcode: header[0] & 0x0F,
            payload,
            masked,
            header_len,
        })
    }

    /// Send one unmasked server frame.
    pub fn send_frame(&mut self, opcode: u8, payload: &[u8]) {
        let mut out = Vec::with_capacity(payload.len() + 10);
        out.push(0x80 | opcode);
        if payload.len() < 126 {
            out.push(payload.len() as u8);
        } else if payload.len() < 65536 {
            out.push(126);
            out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        } else {
            out.push(127);
            out.extend_from_slice(&(payload.len() as u64).to_be_bytes());
        }
        out.extend_from_slice(payload);
        self.write_raw(&out);
    }

    pub fn send_text(&mut self, text: &str) {
        self.send_frame(0x1, text.as_bytes());
    }

    pub fn send_binary(&mut self, data: &[u8]) {
        self.send_frame(0x2, data);
    }

    pub fn send_ping(&mut self, payload: &[u8]) {
        self.send_frame(0x9, payload);
    }

    pub fn send_close(&mut self) {
        self.send_frame(0x8, &[]);
    }
}

/// One-connection mock speech server on an ephemeral port.
pub struct MockServer {
    pub port: u16,
    handle: Option<JoinHandle<()>>,
}

impl MockServer {
    /// Accept one connection, complete the upgrade, then run `behavior`.
    pub fn spawn<F>(behavior: F) -> MockServer
    where
        F: FnOnce(&mut ServerConn) + Send + 'static,
    {
        MockServer::spawn_inner(true, behavior)
    }

    /// Accept one connection and reject the upgrade with a 400.
    pub fn spawn_rejecting() -> MockServer {
        MockServer::spawn_inner(false, |_| {})
    }

    fn spawn_inner<F>(accept: bool, behavior: F) -> MockServer
    where
        F: FnOnce(&mut ServerConn) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        let handle = thread::spawn(move || {
            let Ok((stream, _)) = listener.accept() else {
                return;
            };
            let mut conn = ServerConn::new(stream);
            conn.read_handshake();
            if accept {
                conn.write_raw(
                    b"HTTP/1.1 101 Switching Protocols\r\n\
                      Upgrade: websocket\r\n\
                      Connection: Upgrade\r\n\
                      Sec-WebSocket-Accept: dGhlIHNhbXBsZSBub25jZQ==\r\n\
                      \r\n",
                );
                behavior(&mut conn);
            } else {
                conn.write_raw(b"HTTP/1.1 400 Bad Request\r\n\r\n");
            }
        });
        MockServer {
            port,
            handle: Some(handle),
        }
    }

    /// Wait for the server thread, propagating any assertion failure in the
    /// behavior closure.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.join().expect("mock server panicked");
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Engine parameters pointing at a local mock server.
pub fn params_for_port(port: u16) -> EngineParams {
    EngineParams::new()
        .with("ws-host", "127.0.0.1")
        .with("ws-port", port.to_string())
}

// ---------------------------------------------------------------------------
// Recording sinks
// ---------------------------------------------------------------------------

/// Channel sink recording every message for later assertions.
pub struct TestChannelSink {
    messages: Mutex<Vec<ChannelMessage>>,
    opened: Mutex<Option<bool>>,
    closed: AtomicBool,
}

impl TestChannelSink {
    pub fn new() -> Arc<TestChannelSink> {
        Arc::new(TestChannelSink {
            messages: Mutex::new(Vec::new()),
            opened: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn messages(&self) -> Vec<ChannelMessage> {
        self.messages.lock().expect("sink lock").clone()
    }

    pub fn responses(&self) -> Vec<Response> {
        self.messages()
            .into_iter()
            .filter_map(|m| match m {
                ChannelMessage::Response(response) => Some(response),
                _ => None,
            })
            .collect()
    }

    pub fn events(&self) -> Vec<Event> {
        self.messages()
            .into_iter()
            .filter_map(|m| match m {
                ChannelMessage::Event(event) => Some(event),
                _ => None,
            })
            .collect()
    }

    pub fn speak_completes(&self) -> Vec<CompletionCause> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::SpeakComplete { cause, .. } => Some(cause),
                _ => None,
            })
            .collect()
    }

    pub fn recognition_completes(&self) -> Vec<(CompletionCause, Option<String>, Option<String>)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::RecognitionComplete {
                    cause,
                    body,
                    content_type,
                    ..
                } => Some((cause, body, content_type)),
                _ => None,
            })
            .collect()
    }

    pub fn start_of_input_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::StartOfInput { .. }))
            .count()
    }

    /// Poll the recorded messages until `predicate` holds or `timeout` runs
    /// out.
    pub fn wait_for<F>(&self, predicate: F, timeout: Duration) -> bool
    where
        F: Fn(&[ChannelMessage]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if predicate(&self.messages()) {
                return true;
            }
            if Instant::now() > deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    pub fn wait_opened(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.opened.lock().expect("sink lock").is_some() {
                return true;
            }
            if Instant::now() > deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ChannelSink for TestChannelSink {
    fn message_send(&self, message: ChannelMessage) -> bool {
        self.messages.lock().expect("sink lock").push(message);
        true
    }

    fn open_respond(&self, ok: bool) {
        *self.opened.lock().expect("sink lock") = Some(ok);
    }

    fn close_respond(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Engine sink recording open/close answers.
pub struct TestEngineSink {
    pub opened: Mutex<Option<bool>>,
    pub closed: AtomicBool,
}

impl TestEngineSink {
    pub fn new() -> TestEngineSink {
        TestEngineSink {
            opened: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }
}

impl EngineSink for TestEngineSink {
    fn open_respond(&self, ok: bool) {
        *self.opened.lock().expect("sink lock") = Some(ok);
    }

    fn close_respond(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Audio fixtures
// ---------------------------------------------------------------------------

/// 20 ms of silence at 8 kHz (320 bytes).
pub fn silence_frame() -> Vec<u8> {
    vec![0u8; 320]
}

/// 20 ms of loud audio at 8 kHz (320 bytes).
pub fn loud_frame() -> Vec<u8> {
    let mut frame = Vec::with_capacity(320);
    for _ in 0..160 {
        frame.extend_from_slice(&(i16::MAX / 2).to_le_bytes());
    }
    frame
}
