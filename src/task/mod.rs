// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Per-engine background task.
//!
//! A [`TaskQueue`] is a dedicated OS thread driving a single-threaded tokio
//! runtime whose only job is the engine's message loop: messages are serviced
//! strictly in FIFO order, one at a time, and the loop is the only place
//! network I/O is allowed to suspend. Host threads interact through
//! [`TaskSender::post`], which never blocks (the channel is unbounded), and
//! handlers post messages to themselves for next-tick work.
//!
//! Shutdown is cooperative: [`TaskQueue::shutdown`] cancels the loop's token,
//! the loop drains messages already queued (self-posted polls observe the
//! token and stop re-posting), and the thread is joined.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::thread;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Posting half of a task queue. Cheap to clone; sessions keep one.
pub struct TaskSender<M> {
    tx: mpsc::UnboundedSender<M>,
}

impl<M> Clone for TaskSender<M> {
    fn clone(&self) -> Self {
        TaskSender {
            tx: self.tx.clone(),
        }
    }
}

impl<M> TaskSender<M> {
    /// Enqueue a message without blocking. A post to a stopped queue is
    /// dropped; self-posted poll messages are idempotent by design, so this
    /// only warrants a debug log.
    pub fn post(&self, message: M) -> bool {
        match self.tx.send(message) {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!("task message dropped, queue is stopped");
                false
            }
        }
    }

    /// Sender wired to a receiver the caller keeps. Lets unit tests build
    /// sessions without spinning up an engine thread.
    #[cfg(test)]
    pub(crate) fn detached() -> (TaskSender<M>, mpsc::UnboundedReceiver<M>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TaskSender { tx }, rx)
    }
}

/// A background task: thread + current-thread runtime + FIFO message queue.
pub struct TaskQueue<M> {
    tx: mpsc::UnboundedSender<M>,
    cancel: CancellationToken,
    join: Mutex<Option<thread::JoinHandle<()>>>,
}

impl<M: Send + 'static> TaskQueue<M> {
    /// Spawn the task thread. `run` receives the message channel and the
    /// cancellation token and is expected to loop until cancelled, then drain.
    pub fn spawn<F, Fut>(name: &str, run: F) -> std::io::Result<TaskQueue<M>>
    where
        F: FnOnce(mpsc::UnboundedReceiver<M>, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()>,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                runtime.block_on(run(rx, token));
            })?;
        Ok(TaskQueue {
            tx,
            cancel,
            join: Mutex::new(Some(join)),
        })
    }

    /// Posting handle for sessions.
    pub fn sender(&self) -> TaskSender<M> {
        TaskSender {
            tx: self.tx.clone(),
        }
    }

    /// Enqueue a message without blocking.
    pub fn post(&self, message: M) -> bool {
        self.sender().post(message)
    }

    /// Cancel the loop, let it drain, and join the thread.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self
            .join
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("background task panicked during shutdown");
            }
        }
    }
}

impl<M> Drop for TaskQueue<M> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
