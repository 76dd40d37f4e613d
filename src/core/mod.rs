// Core types
pub mod types;

// Identity interning
pub mod registry;

// Descriptor storage and resolution
pub mod contexts;

// Logging sink
pub mod logger;

// Event emission path
pub mod emitter;

// Instrumented lock wrapper
pub mod monitor;

use crate::core::emitter::{EventEmitter, init_emitter};
use crate::core::logger::LockEventSink;
use anyhow::Result;
#[cfg(feature = "event-log")]
use anyhow::Context;
use std::sync::Arc;

/// Lockcard configuration struct
///
/// Builds the global [`EventEmitter`] that monitors and instrumented code
/// report to.
#[derive(Default)]
pub struct Lockcard {
    #[cfg(feature = "event-log")]
    log_path: Option<String>,
    sink: Option<Box<dyn LockEventSink>>,
}

impl Lockcard {
    /// Create a new Lockcard with default settings
    ///
    /// By default events are interned but not delivered anywhere.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write captured events to a JSON-lines log file
    ///
    /// # Arguments
    /// * `path` - Path to the log file. If the path contains "{timestamp}",
    ///   it will be replaced with the current timestamp.
    ///
    /// Overrides any sink set with [`Lockcard::sink`].
    #[cfg(feature = "event-log")]
    pub fn with_log<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.log_path = Some(path.as_ref().to_string_lossy().into_owned());
        self
    }

    /// Deliver captured events to a custom sink
    pub fn sink<S>(mut self, sink: S) -> Self
    where
        S: LockEventSink + 'static,
    {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Install the global emitter with the configured settings
    ///
    /// Returns the installed emitter, which can be used to resolve ids or to
    /// flush the sink.
    ///
    /// # Errors
    /// Returns an error if the event log cannot be created
    pub fn start(self) -> Result<Arc<EventEmitter>> {
        #[allow(unused_mut)]
        let mut sink = self.sink;

        #[cfg(feature = "event-log")]
        if let Some(log_path) = self.log_path {
            let logger = logger::EventLogger::with_file(&log_path)
                .context("Failed to initialize event log")?;
            sink = Some(Box::new(logger));
        }

        let emitter = init_emitter(EventEmitter::new(sink));
        tracing::info!("lockcard capture started");
        Ok(emitter)
    }
}
