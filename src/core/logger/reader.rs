use super::event_logger::{LogEntry, LogRecord};
use crate::core::contexts::{ContextError, ContextMemoryStorage, ContextReader};
use crate::core::types::{ContextId, Lock, LockEvent, LockId, LockingContext};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// An event log loaded back from disk
///
/// Descriptors found in the file are restored into a
/// [`ContextMemoryStorage`], so the log itself can answer
/// [`ContextReader`] queries for the ids its events carry.
#[derive(Debug, Default)]
pub struct EventLog {
    entries: Vec<LogEntry>,
    contexts: ContextMemoryStorage,
}

impl EventLog {
    /// Read a JSON-lines log written by `EventLogger`
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, a line is not a valid
    /// record, or two records disagree about the same id
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).with_context(|| format!("Failed to open log file {}", path.display()))?;

        let mut log = EventLog::default();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.context("Failed to read log file")?;
            if line.trim().is_empty() {
                continue;
            }
            let record: LogRecord = serde_json::from_str(&line)
                .with_context(|| format!("Invalid log record on line {}", index + 1))?;
            log.push(record)
                .with_context(|| format!("Inconsistent log record on line {}", index + 1))?;
        }
        Ok(log)
    }

    fn push(&mut self, record: LogRecord) -> Result<(), ContextError> {
        match record {
            LogRecord::Lock(lock) => self.contexts.insert_lock(lock),
            LogRecord::Context(context) => self.contexts.insert_context(context),
            LogRecord::Event(entry) => {
                self.entries.push(entry);
                Ok(())
            }
        }
    }

    /// Captured events in file order
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Turn a logged entry back into a full event
    pub fn resolve(&self, entry: &LogEntry) -> Result<LockEvent, ContextError> {
        Ok(LockEvent::new(
            entry.event,
            self.read_lock(entry.lock_id)?,
            self.read_context(entry.context_id)?,
        ))
    }

    pub fn lock_count(&self) -> usize {
        self.contexts.lock_count()
    }

    pub fn context_count(&self) -> usize {
        self.contexts.context_count()
    }
}

impl ContextReader for EventLog {
    fn read_lock(&self, id: LockId) -> Result<Lock, ContextError> {
        self.contexts.read_lock(id)
    }

    fn read_context(&self, id: ContextId) -> Result<LockingContext, ContextError> {
        self.contexts.read_context(id)
    }
}
