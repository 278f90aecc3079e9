//! Dispatch queue statistics tracking

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
    time::{Duration, Instant},
};

/// Counters for one dispatch queue
#[derive(Debug, Default)]
pub struct DispatchStats {
    /// Items accepted by `enqueue`
    pub received: AtomicU64,
    /// Items evicted because the queue was full
    pub dropped: AtomicU64,
    /// Items handed to the handler
    pub processed: AtomicU64,
    /// Items refused because the queue was stopped
    pub rejected: AtomicU64,
    /// Last time the drop ratio was logged
    last_logged: Mutex<Option<Instant>>,
}

/// Point-in-time copy of [`DispatchStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStatsSnapshot {
    pub received: u64,
    pub dropped: u64,
    pub processed: u64,
    pub rejected: u64,
}

impl DispatchStats {
    /// Publishes every drop recorded before it to readers of `received`
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Release);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Fraction of received items that were dropped (0.0 to 1.0)
    pub fn drop_rate(&self) -> f64 {
        let received = self.received.load(Ordering::Relaxed);
        if received == 0 {
            return 0.0;
        }
        self.dropped.load(Ordering::Relaxed) as f64 / received as f64
    }

    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            received: self.received.load(Ordering::Acquire),
            dropped: self.dropped.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    /// Log the drop ratio, at most once per `interval`
    pub fn maybe_log(&self, subscriber: &str, type_name: &str, interval: Duration) {
        let mut last = match self.last_logged.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let due = last.map_or(true, |at| at.elapsed() >= interval);
        if !due {
            return;
        }
        *last = Some(Instant::now());
        drop(last);

        let snapshot = self.snapshot();
        log::debug!(
            "{} dropped {} {} / {} ({:.1} %)",
            subscriber,
            type_name,
            snapshot.dropped,
            snapshot.received,
            self.drop_rate() * 100.0
        );
    }
}
