//! Buffer pool statistics tracking

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Snapshot of buffer pool counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferPoolStats {
    /// Number of buffers owned by the pool
    pub total_buffers: usize,
    /// Buffers currently checked out
    pub in_flight: usize,
    /// Peak number of buffers checked out simultaneously
    pub peak_in_flight: usize,
    /// Successful checkouts
    pub checkouts: u64,
    /// Buffers given back
    pub returns: u64,
    /// Checkouts that found no available buffer
    pub exhausted: u64,
}

impl BufferPoolStats {
    /// Fraction of checkout attempts that got a buffer (0.0 to 1.0)
    pub fn success_rate(&self) -> f64 {
        let attempts = self.checkouts + self.exhausted;
        if attempts == 0 {
            return 1.0;
        }
        self.checkouts as f64 / attempts as f64
    }

    /// Fraction of buffers currently checked out (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        if self.total_buffers == 0 {
            return 0.0;
        }
        self.in_flight as f64 / self.total_buffers as f64
    }

    /// Get a summary string of the statistics
    pub fn summary(&self) -> String {
        format!(
            "BufferPoolStats {{ buffers: {}, in_flight: {}, peak: {}, \
             checkouts: {}, returns: {}, exhausted: {}, success_rate: {:.2}% }}",
            self.total_buffers,
            self.in_flight,
            self.peak_in_flight,
            self.checkouts,
            self.returns,
            self.exhausted,
            self.success_rate() * 100.0
        )
    }
}

/// Thread-safe statistics for buffer pools
#[derive(Debug, Default)]
pub struct AtomicBufferPoolStats {
    pub total_buffers: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
    pub checkouts: AtomicU64,
    pub returns: AtomicU64,
    pub exhausted: AtomicU64,
}

impl AtomicBufferPoolStats {
    pub fn new(total_buffers: usize) -> Self {
        Self {
            total_buffers: AtomicUsize::new(total_buffers),
            ..Default::default()
        }
    }

    /// Record a successful checkout
    pub fn record_checkout(&self) {
        self.checkouts.fetch_add(1, Ordering::Relaxed);
        let now = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::Relaxed);
    }

    /// Record a buffer coming back
    pub fn record_return(&self) {
        self.returns.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a checkout on an empty pool
    pub fn record_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current statistics snapshot
    pub fn snapshot(&self) -> BufferPoolStats {
        BufferPoolStats {
            total_buffers: self.total_buffers.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            peak_in_flight: self.peak_in_flight.load(Ordering::Relaxed),
            checkouts: self.checkouts.load(Ordering::Relaxed),
            returns: self.returns.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }
}
