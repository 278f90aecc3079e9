//! Completion tracking for published shared buffers

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    thread,
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    buffers::BufferId,
    config::COMPLETION_TIMEOUT,
    error::{IpcBusError, Result},
};

use super::{countdown::Countdown, handle::CompletionHandle};

/// How a tracked buffer finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Every subscriber acknowledged
    AllAcknowledged,
    /// The timeout elapsed with `missing` acknowledgments outstanding
    TimedOut { missing: usize },
}

/// Completion tracker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// How long to wait for all acknowledgments
    pub timeout: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            timeout: COMPLETION_TIMEOUT,
        }
    }
}

impl TrackerConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(IpcBusError::invalid_parameter(
                "timeout",
                "Completion timeout must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Snapshot of tracker counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerStats {
    pub tracked: u64,
    pub acknowledged: u64,
    pub timed_out: u64,
}

#[derive(Debug, Default)]
struct AtomicTrackerStats {
    tracked: AtomicU64,
    acknowledged: AtomicU64,
    timed_out: AtomicU64,
}

#[derive(Debug)]
struct TrackerInner {
    config: TrackerConfig,
    entries: Mutex<HashMap<BufferId, Arc<Countdown>>>,
    stats: AtomicTrackerStats,
}

impl TrackerInner {
    fn lock_entries(&self) -> MutexGuard<'_, HashMap<BufferId, Arc<Countdown>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Waits, per published buffer, for every subscriber to acknowledge
///
/// Each tracked buffer gets its own waiter thread, so one slow subscriber
/// only delays the buffers it holds. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CompletionTracker {
    inner: Arc<TrackerInner>,
}

impl CompletionTracker {
    pub fn new(config: TrackerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(TrackerInner {
                config,
                entries: Mutex::new(HashMap::new()),
                stats: AtomicTrackerStats::default(),
            }),
        })
    }

    /// Start tracking `buffer_id` until `expected` acknowledgments arrive
    ///
    /// Returns one handle per expected acknowledgment. `on_all_done` runs
    /// exactly once on the waiter thread, after the entry has been removed, so
    /// it may hand the buffer out again immediately.
    pub fn track<F>(
        &self,
        buffer_id: BufferId,
        expected: usize,
        on_all_done: F,
    ) -> Result<Vec<CompletionHandle>>
    where
        F: FnOnce(BufferId, CompletionOutcome) + Send + 'static,
    {
        let countdown = Arc::new(Countdown::new(expected));
        {
            let mut entries = self.inner.lock_entries();
            if entries.contains_key(&buffer_id) {
                return Err(IpcBusError::AlreadyTracked {
                    buffer_id: buffer_id.as_u64(),
                });
            }
            entries.insert(buffer_id, Arc::clone(&countdown));
        }
        self.inner.stats.tracked.fetch_add(1, Ordering::Relaxed);

        let handles = (0..expected)
            .map(|_| CompletionHandle::new(buffer_id, Arc::clone(&countdown)))
            .collect();

        let inner = Arc::clone(&self.inner);
        let waiter = thread::Builder::new()
            .name("buffer-done-waiter".to_string())
            .spawn(move || {
                let missing = countdown.wait_timeout(inner.config.timeout);
                inner.lock_entries().remove(&buffer_id);

                let outcome = if missing == 0 {
                    inner.stats.acknowledged.fetch_add(1, Ordering::Relaxed);
                    CompletionOutcome::AllAcknowledged
                } else {
                    inner.stats.timed_out.fetch_add(1, Ordering::Relaxed);
                    log::warn!(
                        "Buffer {} timed out with {} acknowledgments missing",
                        buffer_id,
                        missing
                    );
                    CompletionOutcome::TimedOut { missing }
                };
                on_all_done(buffer_id, outcome);
            });

        if let Err(e) = waiter {
            self.inner.lock_entries().remove(&buffer_id);
            return Err(IpcBusError::from_io(e, "Failed to spawn buffer-done-waiter"));
        }

        Ok(handles)
    }

    /// Whether `buffer_id` is still waiting for acknowledgments
    pub fn is_tracked(&self, buffer_id: BufferId) -> bool {
        self.inner.lock_entries().contains_key(&buffer_id)
    }

    /// Acknowledgments still missing for `buffer_id`
    pub fn pending(&self, buffer_id: BufferId) -> Option<usize> {
        self.inner
            .lock_entries()
            .get(&buffer_id)
            .map(|countdown| countdown.remaining())
    }

    /// Number of buffers currently tracked
    pub fn in_flight(&self) -> usize {
        self.inner.lock_entries().len()
    }

    pub fn timeout(&self) -> Duration {
        self.inner.config.timeout
    }

    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            tracked: self.inner.stats.tracked.load(Ordering::Relaxed),
            acknowledged: self.inner.stats.acknowledged.load(Ordering::Relaxed),
            timed_out: self.inner.stats.timed_out.load(Ordering::Relaxed),
        }
    }
}

impl Default for CompletionTracker {
    fn default() -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                config: TrackerConfig::default(),
                entries: Mutex::new(HashMap::new()),
                stats: AtomicTrackerStats::default(),
            }),
        }
    }
}
