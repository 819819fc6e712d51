//! Bounded, lossy-but-correct handoff to the worker.
//!
//! `spec.md` §4.6/§9 is explicit that dropping intermediate states is safe
//! because every message is self-contained and carries the *current*
//! active set — there is no history to lose. A plain
//! `std::sync::mpsc::sync_channel` with `try_send` gives exactly that:
//! non-blocking, FIFO, and capacity-bounded.
//!
//! The worker itself is modeled as a dedicated OS thread rather than a
//! forked process (see DESIGN.md) — the real filter command-line tool is
//! explicitly out of scope, so a true process boundary would add
//! complexity (serialization across a pipe, supervising a child) without
//! exercising any additional logic; the channel's backpressure and FIFO
//! semantics are identical either way.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};

use super::message::FilterMessage;
use crate::config::defaults::WORKER_QUEUE_CAPACITY;
use crate::error::WorkerError;

pub struct WorkerSender {
    inner: SyncSender<FilterMessage>,
}

impl WorkerSender {
    /// Non-blocking send. Per `spec.md` §4.6, a full channel is not an
    /// error worth surfacing to the caller beyond `synced := false` — the
    /// pool will retry on the next change or tick.
    pub fn try_send(&self, message: FilterMessage) -> Result<(), WorkerError> {
        match self.inner.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(WorkerError::ChannelFull {
                pool: String::new(),
            }),
            Err(TrySendError::Disconnected(_)) => Err(WorkerError::Lost),
        }
    }
}

pub fn worker_channel() -> (WorkerSender, Receiver<FilterMessage>) {
    let (tx, rx) = sync_channel(WORKER_QUEUE_CAPACITY);
    (WorkerSender { inner: tx }, rx)
}
