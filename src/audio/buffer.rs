// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Bounded linear audio buffer shared between a producer and a consumer.
//!
//! One producer appends whole payloads, one consumer drains in frame-sized
//! slices; both sides take the internal lock only long enough to move
//! positions and memcpy. The buffer is linear and never wraps: a write that
//! does not fit in the remaining capacity is dropped whole with a warning.
//! There is no signalling - callers poll.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Result of a single read against the requested length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The full requested length was copied.
    Full,
    /// Only this many bytes were available and copied.
    Partial(usize),
    /// Nothing was available.
    Empty,
}

/// Outcome of a read plus the completion flag, taken as one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadResult {
    pub outcome: ReadOutcome,
    pub complete: bool,
}

impl ReadResult {
    /// Bytes actually copied by the read.
    pub fn copied(&self, requested: usize) -> usize {
        match self.outcome {
            ReadOutcome::Full => requested,
            ReadOutcome::Partial(n) => n,
            ReadOutcome::Empty => 0,
        }
    }
}

struct Positions {
    data: Box<[u8]>,
    write_pos: usize,
    read_pos: usize,
    complete: bool,
}

/// Fixed-capacity audio byte buffer.
pub struct AudioBuffer {
    capacity: usize,
    inner: Mutex<Positions>,
}

impl AudioBuffer {
    pub fn new(capacity: usize) -> AudioBuffer {
        AudioBuffer {
            capacity,
            inner: Mutex::new(Positions {
                data: vec![0u8; capacity].into_boxed_slice(),
                write_pos: 0,
                read_pos: 0,
                complete: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Positions> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a payload. Drops the whole payload with a warning when it does
    /// not fit in the remaining capacity; `write_pos` is not advanced.
    pub fn write(&self, bytes: &[u8]) -> bool {
        let mut inner = self.lock();
        let space = self.capacity - inner.write_pos;
        if bytes.len() > space {
            tracing::warn!(
                dropped = bytes.len(),
                buffered = inner.write_pos,
                capacity = self.capacity,
                "audio buffer overflow, dropping payload"
            );
            return false;
        }
        let write_pos = inner.write_pos;
        inner.data[write_pos..write_pos + bytes.len()].copy_from_slice(bytes);
        inner.write_pos += bytes.len();
        true
    }

    /// Copy up to `out.len()` bytes from the read position, advancing by the
    /// copied count. The completion flag is sampled under the same lock.
    pub fn read(&self, out: &mut [u8]) -> ReadResult {
        let mut inner = self.lock();
        let available = inner.write_pos - inner.read_pos;
        let count = available.min(out.len());
        let read_pos = inner.read_pos;
        out[..count].copy_from_slice(&inner.data[read_pos..read_pos + count]);
        inner.read_pos += count;
        let outcome = if count == out.len() {
            ReadOutcome::Full
        } else if count == 0 {
            ReadOutcome::Empty
        } else {
            ReadOutcome::Partial(count)
        };
        ReadResult {
            outcome,
            complete: inner.complete,
        }
    }

    /// `(available, complete)` as one snapshot.
    pub fn status(&self) -> (usize, bool) {
        let inner = self.lock();
        (inner.write_pos - inner.read_pos, inner.complete)
    }

    /// Unread byte count.
    pub fn available(&self) -> usize {
        let inner = self.lock();
        inner.write_pos - inner.read_pos
    }

    /// Total bytes ever written since the last clear (read or not).
    pub fn bytes_written(&self) -> usize {
        self.lock().write_pos
    }

    pub fn is_complete(&self) -> bool {
        self.lock().complete
    }

    /// Flag that the producer will append nothing further.
    pub fn mark_complete(&self) {
        self.lock().complete = true;
    }

    /// Reset positions and the completion flag.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.write_pos = 0;
        inner.read_pos = 0;
        inner.complete = false;
    }

    /// Copy of `len` bytes starting at `start`, if that range has been
    /// written. Positions are not advanced.
    pub fn copy_range(&self, start: usize, len: usize) -> Option<Vec<u8>> {
        let inner = self.lock();
        if start + len > inner.write_pos {
            return None;
        }
        Some(inner.data[start..start + len].to_vec())
    }

    /// Snapshot everything written from `start` on, then reset the buffer.
    /// The reset happens regardless of how much (if anything) is returned.
    pub fn drain_from(&self, start: usize) -> Vec<u8> {
        let mut inner = self.lock();
        let tail = if start < inner.write_pos {
            inner.data[start..inner.write_pos].to_vec()
        } else {
            Vec::new()
        };
        inner.write_pos = 0;
        inner.read_pos = 0;
        inner.complete = false;
        tail
    }
}
