//! Asynchronous JSON-lines event log
//!
//! Events are sent over a channel to a dedicated writer thread so that the
//! capturing thread never blocks on file I/O. The writer emits each lock and
//! context descriptor once, right before the first event that refers to it,
//! which keeps the file self-contained for offline resolution.

use super::LockEventSink;
use crate::core::types::{
    ContextId, Lock, LockEvent, LockEventType, LockId, LockingContext, ThreadId,
};
use anyhow::{Context, Result};
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, unbounded};
use fxhash::FxHashSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// A single captured transition, descriptors replaced by their ids
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Thread that performed the operation
    pub thread_id: ThreadId,
    /// Acquire or release
    pub event: LockEventType,
    pub lock_id: LockId,
    pub context_id: ContextId,
    /// Absolute timestamp of when the event occurred (seconds since Unix Epoch)
    pub timestamp: f64,
}

/// One line of the event log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum LogRecord {
    Lock(Lock),
    Context(LockingContext),
    Event(LogEntry),
}

/// Commands for controlling the async logger thread
#[derive(Debug)]
enum LoggerCommand {
    /// Write an event (and any descriptors not yet written)
    Event {
        thread_id: ThreadId,
        event: LockEvent,
        timestamp: f64,
    },
    /// Flush all pending entries to disk and signal completion
    Flush(Sender<()>),
}

/// Event logger writing lock events to a file
///
/// The EventLogger provides asynchronous file I/O and uses a background
/// thread to handle file writes.
pub struct EventLogger {
    /// Channel sender for async communication with logger thread
    sender: Sender<LoggerCommand>,
    /// Flag indicating if a flush operation is in progress
    flushing: Arc<AtomicBool>,
}

impl Drop for EventLogger {
    fn drop(&mut self) {
        // Logs must not be lost if the program exits right after capture
        if let Err(e) = self.flush() {
            tracing::warn!("failed to flush event log on drop: {e:?}");
        }
    }
}

impl EventLogger {
    /// Create a new logger that writes to the specified file asynchronously
    ///
    /// # Arguments
    /// * `path` - Path to the log file. If the filename contains "{timestamp}",
    ///   it will be replaced with the current timestamp.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The directory containing the log file could not be created
    /// - The log file could not be opened for writing
    pub fn with_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_buf = path.as_ref().to_path_buf();

        // Create directory if needed
        if let Some(parent) = path_buf.parent()
            && parent.to_string_lossy() != ""
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
        }

        // Replace timestamp placeholder if present
        #[allow(clippy::literal_string_with_formatting_args)]
        let file_path = if path_buf.to_string_lossy().contains("{timestamp}") {
            let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
            PathBuf::from(
                path_buf
                    .to_string_lossy()
                    .replace("{timestamp}", &timestamp.to_string()),
            )
        } else {
            path_buf
        };

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&file_path)
            .with_context(|| format!("Failed to open log file {}", file_path.display()))?;

        CURRENT_LOG_FILE.lock().replace(file_path);

        let (tx, rx) = unbounded::<LoggerCommand>();
        let flushing = Arc::new(AtomicBool::new(false));

        thread::Builder::new()
            .name("lockcard-logger".to_string())
            .spawn(move || async_logger_thread(file, rx))
            .context("Failed to spawn logger thread")?;

        Ok(EventLogger {
            sender: tx,
            flushing,
        })
    }

    /// Queue one event for writing
    ///
    /// Non-blocking; a closed channel is reported and the event dropped.
    pub fn log_event(&self, thread_id: ThreadId, event: &LockEvent) {
        let now = Utc::now();
        let timestamp = now.timestamp() as f64 + now.timestamp_subsec_micros() as f64 / 1_000_000.0;

        if let Err(e) = self.sender.send(LoggerCommand::Event {
            thread_id,
            event: event.clone(),
            timestamp,
        }) {
            tracing::warn!("failed to send log entry: {e:?}");
        }
    }

    /// Force flush all pending log entries to disk
    ///
    /// Blocks until the writer thread confirms the flush.
    ///
    /// # Errors
    /// Returns an error if the flush request could not be delivered or was
    /// not confirmed in time
    pub fn flush(&self) -> Result<()> {
        // Use atomic CAS to prevent multiple simultaneous flushes
        let already_flushing = self
            .flushing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err();

        if already_flushing {
            return Ok(());
        }

        let result = (|| {
            let (flush_tx, flush_rx) = crossbeam_channel::bounded(1);
            self.sender
                .send(LoggerCommand::Flush(flush_tx))
                .map_err(|_| anyhow::anyhow!("Logger thread is gone"))?;

            flush_rx
                .recv_timeout(Duration::from_secs(10))
                .map_err(|_| anyhow::anyhow!("Flush operation timed out"))
        })();

        self.flushing.store(false, Ordering::SeqCst);
        result
    }
}

impl LockEventSink for EventLogger {
    fn on_lock_event(&self, thread_id: ThreadId, event: &LockEvent) {
        self.log_event(thread_id, event);
    }

    fn flush(&self) -> Result<()> {
        EventLogger::flush(self)
    }
}

/// Writer thread state: which descriptors have already been written
#[derive(Default)]
struct WrittenDescriptors {
    locks: FxHashSet<LockId>,
    contexts: FxHashSet<ContextId>,
}

fn write_record(writer: &mut BufWriter<File>, record: &LogRecord) {
    match serde_json::to_string(record) {
        Ok(json) => {
            if let Err(e) = writeln!(writer, "{json}") {
                tracing::warn!("event log write error: {e:?}");
            }
        }
        Err(e) => tracing::warn!("failed to serialize log record: {e:?}"),
    }
}

/// Async logger thread
///
/// Runs until every sender is gone, then performs a final flush.
fn async_logger_thread(file: File, rx: Receiver<LoggerCommand>) {
    let mut writer = BufWriter::new(file);
    let mut written = WrittenDescriptors::default();

    while let Ok(cmd) = rx.recv() {
        match cmd {
            LoggerCommand::Event {
                thread_id,
                event,
                timestamp,
            } => {
                if written.locks.insert(event.lock().id()) {
                    write_record(&mut writer, &LogRecord::Lock(event.lock().clone()));
                }
                if written.contexts.insert(event.context().id()) {
                    write_record(&mut writer, &LogRecord::Context(event.context().clone()));
                }
                write_record(
                    &mut writer,
                    &LogRecord::Event(LogEntry {
                        thread_id,
                        event: event.event_type(),
                        lock_id: event.lock().id(),
                        context_id: event.context().id(),
                        timestamp,
                    }),
                );
            }
            LoggerCommand::Flush(responder) => {
                if let Err(e) = writer.flush() {
                    tracing::warn!("event log flush error: {e:?}");
                }
                let _ = responder.send(());
            }
        }
    }

    if let Err(e) = writer.flush() {
        tracing::warn!("event log final flush error: {e:?}");
    }
}

lazy_static::lazy_static! {
    static ref CURRENT_LOG_FILE: Mutex<Option<PathBuf>> = Mutex::new(None);
}

/// Path of the most recently opened event log
pub fn get_current_log_file() -> Option<PathBuf> {
    CURRENT_LOG_FILE.lock().clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn event(event_type: LockEventType, lock: LockId, ctx: ContextId) -> LockEvent {
        LockEvent::new(
            event_type,
            Lock::new(lock, "Account"),
            LockingContext::new(ctx, "main", "this", "Bank::transfer"),
        )
    }

    #[test]
    fn test_basic_logging() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("basic.log");

        let logger = EventLogger::with_file(&log_path).unwrap();
        logger.log_event(1, &event(LockEventType::Acquire, 10, 0));
        logger.log_event(1, &event(LockEventType::Release, 10, 0));
        logger.flush().unwrap();

        let contents = std::fs::read_to_string(&log_path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();

        // lock descriptor, context descriptor, two events
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("\"record\":\"lock\""));
        assert!(lines[1].contains("\"record\":\"context\""));
        assert!(lines[2].contains("\"event\":\"Acquire\""));
        assert!(lines[3].contains("\"event\":\"Release\""));
    }

    #[test]
    fn test_descriptors_written_once() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("once.log");

        let logger = EventLogger::with_file(&log_path).unwrap();
        for _ in 0..5 {
            logger.log_event(1, &event(LockEventType::Acquire, 3, 4));
        }
        logger.flush().unwrap();

        let contents = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(contents.matches("\"record\":\"lock\"").count(), 1);
        assert_eq!(contents.matches("\"record\":\"context\"").count(), 1);
        assert_eq!(contents.matches("\"record\":\"event\"").count(), 5);
    }

    #[test]
    fn test_flush_idempotence() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("flush_test.log");

        let logger = EventLogger::with_file(&log_path).unwrap();
        logger.log_event(2, &event(LockEventType::Acquire, 1, 1));

        logger.flush().unwrap();
        logger.flush().unwrap();
        logger.flush().unwrap();

        let contents = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(contents.lines().count(), 3);
    }

    #[test]
    fn test_timestamp_placeholder_and_directories() {
        let temp_dir = TempDir::new().unwrap();
        let pattern = temp_dir.path().join("nested/dir/run_{timestamp}.log");

        let logger = EventLogger::with_file(&pattern).unwrap();
        logger.flush().unwrap();

        let names: Vec<String> = std::fs::read_dir(temp_dir.path().join("nested/dir"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("run_"));
        assert!(!names[0].contains("{timestamp}"));
        assert!(get_current_log_file().is_some());
    }

    #[test]
    fn test_logger_drop_flushes() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("drop_test.log");

        {
            let logger = EventLogger::with_file(&log_path).unwrap();
            logger.log_event(1, &event(LockEventType::Acquire, 1, 1));
        }

        std::thread::sleep(Duration::from_millis(100));

        let contents = std::fs::read_to_string(&log_path).unwrap();
        assert!(contents.contains("\"thread_id\":1"));
    }
}
