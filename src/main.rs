use anyhow::Result;
use clap::Parser;
use fxhash::FxHashMap;
use lockcard::{ContextReader, EventLog, LockEventType, LockId};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Lockcard - Print the lock events captured in an event log"
)]
struct Cli {
    /// Path to the log file
    log_file: PathBuf,

    /// Only print per-lock totals
    #[arg(short, long)]
    summary: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let log = EventLog::read(&cli.log_file)?;
    tracing::info!(
        events = log.entries().len(),
        locks = log.lock_count(),
        contexts = log.context_count(),
        "loaded {}",
        cli.log_file.display()
    );

    let mut acquires: FxHashMap<LockId, usize> = FxHashMap::default();
    for entry in log.entries() {
        let event = log.resolve(entry)?;
        if event.event_type() == LockEventType::Acquire {
            *acquires.entry(event.lock().id()).or_default() += 1;
        }
        if !cli.summary {
            println!("[{:.6}] thread {} {event}", entry.timestamp, entry.thread_id);
        }
    }

    let mut totals: Vec<_> = acquires.into_iter().collect();
    totals.sort_unstable();
    if !cli.summary && !totals.is_empty() {
        println!();
    }
    for (lock_id, count) in totals {
        let lock = log.read_lock(lock_id)?;
        println!("{lock}: {count} acquisitions");
    }
    Ok(())
}
