//! Per-invocation progress reporting for the parallel phases.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Tracks completion of a batch of parallel work.
///
/// Workers bump the counters; a report line is emitted whenever progress
/// crosses another tenth of the total payload, so large conversions stay
/// observable without per-stream log spam.
pub(crate) struct ProgressLog {
    label: &'static str,
    total_items: u64,
    total_bytes: u64,
    items_done: AtomicU64,
    bytes_done: AtomicU64,
    started: Instant,
}

impl ProgressLog {
    pub(crate) fn new(label: &'static str, total_items: u64, total_bytes: u64) -> Self {
        tracing::debug!("{label}: {total_items} streams, {total_bytes} bytes");
        ProgressLog {
            label,
            total_items,
            total_bytes,
            items_done: AtomicU64::new(0),
            bytes_done: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    /// Records one finished item of `bytes` payload bytes.
    pub(crate) fn update(&self, bytes: u64) {
        let items = self.items_done.fetch_add(1, Ordering::Relaxed) + 1;
        let done = self.bytes_done.fetch_add(bytes, Ordering::Relaxed) + bytes;
        if self.total_bytes == 0 {
            return;
        }

        let decile = done * 10 / self.total_bytes;
        let previous = (done - bytes) * 10 / self.total_bytes;
        if decile > previous {
            tracing::debug!(
                "{}: {}% ({items}/{} streams)",
                self.label,
                decile * 10,
                self.total_items
            );
        }
    }

    /// Logs the elapsed wall-clock time for the whole batch.
    pub(crate) fn finish(self) {
        tracing::debug!(
            "{}: done in {:.2?}",
            self.label,
            self.started.elapsed()
        );
    }
}
