use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Result, TableError};

/// Outcome of one compaction run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompactionReport {
    /// Table that was compacted.
    pub table: String,
    /// File length before the rewrite.
    pub bytes_before: u64,
    /// File length after the rewrite.
    pub bytes_after: u64,
    /// Bytes of deleted blocks dropped by the rewrite.
    pub reclaimed_bytes: u64,
    /// Live rows carried over.
    pub rows: u64,
    /// Wall time spent, in milliseconds.
    pub duration_ms: f64,
}

/// A table the background worker can compact.
pub trait Compactable: Send + Sync {
    /// Table name used in logs.
    fn table_name(&self) -> &str;

    /// Compacts when enough space is reclaimable; `None` when skipped.
    fn compact_if_needed(&self) -> Result<Option<CompactionReport>>;
}

enum CompactionMessage {
    Trigger,
    Shutdown,
}

/// Background thread that periodically compacts one table.
///
/// The worker holds the table weakly and stops once the table is gone,
/// when asked to, or when the worker itself is dropped.
pub struct CompactionWorker {
    sender: Sender<CompactionMessage>,
    thread: Option<JoinHandle<()>>,
}

impl CompactionWorker {
    /// Starts a worker checking `target` every `interval`.
    pub fn spawn(target: Weak<dyn Compactable>, interval: Duration) -> Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("rowfile-compaction".into())
            .spawn(move || compaction_loop(target, receiver, interval))?;
        Ok(Self {
            sender,
            thread: Some(thread),
        })
    }

    /// Requests an immediate check.
    pub fn trigger(&self) -> Result<()> {
        self.sender
            .send(CompactionMessage::Trigger)
            .map_err(|_| worker_stopped())
    }

    /// Stops the worker and waits for it to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.sender.send(CompactionMessage::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("compaction.worker.panicked");
            }
        }
    }
}

impl Drop for CompactionWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_stopped() -> TableError {
    TableError::Io(io::Error::new(
        io::ErrorKind::BrokenPipe,
        "compaction worker has stopped",
    ))
}

fn compaction_loop(
    target: Weak<dyn Compactable>,
    receiver: Receiver<CompactionMessage>,
    interval: Duration,
) {
    loop {
        match receiver.recv_timeout(interval) {
            Ok(CompactionMessage::Trigger) | Err(mpsc::RecvTimeoutError::Timeout) => {
                let Some(table) = target.upgrade() else {
                    debug!("compaction.worker.table_gone");
                    break;
                };
                match table.compact_if_needed() {
                    Ok(Some(report)) => info!(
                        table = table.table_name(),
                        reclaimed = report.reclaimed_bytes,
                        "compaction.worker.compacted"
                    ),
                    Ok(None) => {}
                    Err(TableError::Disposed(_)) => break,
                    Err(err) => warn!(
                        table = table.table_name(),
                        error = %err,
                        "compaction.worker.failed"
                    ),
                }
            }
            Ok(CompactionMessage::Shutdown) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("compaction.worker.stopped");
}
