use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

/// Running counters owned by one operation.
///
/// Counters are atomics because worker-pool stages update them from the
/// stage worker while the process reads them for progress reporting.
#[derive(Debug, Default)]
pub struct OperationStatistics {
    rows_read: AtomicU64,
    rows_written: AtomicU64,
    started: Mutex<Option<Instant>>,
    finished: Mutex<Option<Instant>>,
}

/// Point-in-time copy of [`OperationStatistics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatisticsSnapshot {
    /// Rows pulled from the operation's input.
    pub rows_read: u64,
    /// Rows emitted by the operation.
    pub rows_written: u64,
    /// Time between the first pull and exhaustion, once finished.
    pub duration: Option<Duration>,
}

impl OperationStatistics {
    pub(crate) fn add_read(&self) {
        self.rows_read.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_reads(&self, rows: u64) {
        self.rows_read.fetch_add(rows, Ordering::Relaxed);
    }

    pub(crate) fn add_written(&self) -> u64 {
        self.rows_written.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn mark_started(&self) {
        let mut started = self.started.lock();
        if started.is_none() {
            *started = Some(Instant::now());
        }
    }

    pub(crate) fn mark_finished(&self) {
        let mut finished = self.finished.lock();
        if finished.is_none() {
            *finished = Some(Instant::now());
        }
    }

    /// Rows pulled from the input so far.
    pub fn rows_read(&self) -> u64 {
        self.rows_read.load(Ordering::Relaxed)
    }

    /// Rows emitted so far.
    pub fn rows_written(&self) -> u64 {
        self.rows_written.load(Ordering::Relaxed)
    }

    /// Copies the counters.
    pub fn snapshot(&self) -> StatisticsSnapshot {
        let duration = match (*self.started.lock(), *self.finished.lock()) {
            (Some(start), Some(end)) => Some(end.saturating_duration_since(start)),
            _ => None,
        };
        StatisticsSnapshot {
            rows_read: self.rows_read(),
            rows_written: self.rows_written(),
            duration,
        }
    }
}
