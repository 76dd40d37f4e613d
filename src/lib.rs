//! # Lockcard
//!
//! Lock-event capture for lock-order analysis.
//!
//! Lockcard observes lock acquire/release events across threads and turns
//! them into compact records for an offline analyzer looking for
//! inconsistent lock ordering. Lock objects and call sites are interned into
//! small integer ids; the interning never keeps a lock object alive.
//!
//! ## Features
//!
//! - Identity-keyed weak registry for lock objects
//! - Drop-in [`Monitor`] lock that reports its transitions
//! - Load-time instrumentation through [`instrument::TransformLoader`]
//! - JSON-lines event log with offline id resolution (`event-log` feature)

mod core;
pub use core::{
    Lockcard,
    contexts::{ContextError, ContextMemoryStorage, ContextReader, ContextWriter},
    emitter::{
        EventEmitter, LockObject, global_emitter, init_emitter, on_monitor_enter, on_monitor_exit,
    },
    logger::LockEventSink,
    monitor::{Monitor, MonitorGuard},
    registry::{DEFAULT_PURGE_INTERVAL, IdentityWeakMap},
    types::{
        ContextId, Lock, LockEvent, LockEventType, LockId, LockingContext, ThreadId,
        get_current_thread_id,
    },
};

#[cfg(feature = "event-log")]
pub use core::logger::{EventLog, EventLogger, LogEntry, LogRecord, get_current_log_file};

pub mod instrument;
