//! Progress sinks: where the engine hands events off.
//!
//! `emit` must never block the debate loop; a sink whose consumer is
//! gone simply drops events.

use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::trace;

use super::types::ProgressEvent;

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Feeds the streaming transport over an unbounded channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        trace!(event_type = event.event_type(), "emit");
        // A closed receiver means the caller disconnected; the debate
        // task is cancelled separately, so dropped events are fine.
        let _ = self.tx.send(event);
    }
}

/// Accumulates events in memory for the buffered transport and tests.
#[derive(Default)]
pub struct BufferSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<ProgressEvent> {
        match self.events.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl ProgressSink for BufferSink {
    fn emit(&self, event: ProgressEvent) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push(event);
        }
    }
}

/// Discards everything.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}
