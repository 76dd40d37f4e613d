//! Logging sink for lock events
//!
//! The capture path hands every [`LockEvent`] to a [`LockEventSink`]. With
//! the `event-log` feature the crate ships [`EventLogger`], which appends
//! events to a JSON-lines file from a background thread, and [`EventLog`],
//! which reads such a file back for offline resolution.

#[cfg(feature = "event-log")]
mod event_logger;
#[cfg(feature = "event-log")]
mod reader;

#[cfg(feature = "event-log")]
pub use event_logger::{EventLogger, LogEntry, LogRecord, get_current_log_file};
#[cfg(feature = "event-log")]
pub use reader::EventLog;

use crate::core::types::{LockEvent, ThreadId};
use anyhow::Result;

/// Receiver of captured lock events
///
/// Called once per observed transition, on the thread that performed it and
/// in that thread's program order.
pub trait LockEventSink: Send + Sync {
    fn on_lock_event(&self, thread_id: ThreadId, event: &LockEvent);

    /// Make everything received so far durable
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

impl<F> LockEventSink for F
where
    F: Fn(ThreadId, &LockEvent) + Send + Sync,
{
    fn on_lock_event(&self, thread_id: ThreadId, event: &LockEvent) {
        self(thread_id, event)
    }
}
