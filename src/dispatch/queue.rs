//! Bounded drop-oldest queue with a dedicated consumer thread

use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex, MutexGuard},
    thread::{self, JoinHandle, ThreadId},
};

use crate::{
    config::STATS_LOG_INTERVAL,
    error::{IpcBusError, Result},
};

use super::{handler::DispatchHandler, stats::DispatchStats};

/// Outcome of [`DispatchQueue::enqueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Appended without evicting anything
    Accepted,
    /// Appended after evicting the oldest queued item
    Evicted,
    /// Queue already stopped; the item went straight to `on_discarded`
    Rejected,
}

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    running: bool,
}

struct QueueShared<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
    capacity: usize,
    stats: DispatchStats,
    /// Subscriber name, enables the periodic drop log
    name: Option<String>,
    type_name: String,
}

impl<T> QueueShared<T> {
    fn lock_state(&self) -> MutexGuard<'_, QueueState<T>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Bounded FIFO drained by one consumer thread
///
/// `enqueue` never blocks and never fails. Items are handed to the handler
/// strictly in arrival order; a slow handler only delays its own queue.
pub struct DispatchQueue<T: Send + 'static> {
    shared: Arc<QueueShared<T>>,
    handler: Arc<dyn DispatchHandler<T>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    consumer_id: ThreadId,
}

impl<T: Send + 'static> DispatchQueue<T> {
    /// Create the queue and start its consumer thread
    pub fn spawn(
        name: Option<String>,
        type_name: impl Into<String>,
        capacity: usize,
        handler: Arc<dyn DispatchHandler<T>>,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(IpcBusError::invalid_parameter(
                "capacity",
                "Dispatch queue capacity must be greater than 0",
            ));
        }

        let type_name = type_name.into();
        let shared = Arc::new(QueueShared {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                running: true,
            }),
            available: Condvar::new(),
            capacity,
            stats: DispatchStats::default(),
            name,
            type_name: type_name.clone(),
        });

        let consumer = {
            let shared = Arc::clone(&shared);
            let handler = Arc::clone(&handler);
            thread::Builder::new()
                .name(format!("ipc-sub: {}", type_name))
                .spawn(move || run_consumer(shared, handler))
                .map_err(|e| IpcBusError::from_io(e, "Failed to spawn dispatch consumer"))?
        };
        let consumer_id = consumer.thread().id();

        Ok(Self {
            shared,
            handler,
            consumer: Mutex::new(Some(consumer)),
            consumer_id,
        })
    }

    /// Append an item, evicting the oldest one if the queue is full
    pub fn enqueue(&self, item: T) -> Enqueued {
        let evicted = {
            let mut state = self.shared.lock_state();
            if !state.running {
                drop(state);
                self.shared.stats.record_rejected();
                self.handler.on_discarded(item);
                return Enqueued::Rejected;
            }

            // Counted before the push so received never runs ahead of dropped
            let evicted = if state.items.len() >= self.shared.capacity {
                self.shared.stats.record_dropped();
                state.items.pop_front()
            } else {
                None
            };
            self.shared.stats.record_received();
            state.items.push_back(item);
            evicted
        };
        self.shared.available.notify_one();

        match evicted {
            Some(old) => {
                self.handler.on_discarded(old);
                Enqueued::Evicted
            }
            None => Enqueued::Accepted,
        }
    }

    /// Stop the consumer, join it and hand leftover items to `on_drained`
    ///
    /// An item currently being handled runs to completion. Returns the number
    /// of drained items. Calling `stop` again is a no-op.
    pub fn stop(&self) -> usize {
        {
            let mut state = self.shared.lock_state();
            state.running = false;
        }
        self.shared.available.notify_all();

        let consumer = match self.consumer.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(consumer) = consumer else {
            return 0;
        };

        if thread::current().id() == self.consumer_id {
            // Stopped from inside the handler: the loop exits after this item
            log::debug!("{} consumer stopped from its own thread", self.shared.type_name);
        } else if consumer.join().is_err() {
            log::error!("{} consumer thread panicked", self.shared.type_name);
        }

        let remaining: Vec<T> = self.shared.lock_state().items.drain(..).collect();
        let drained = remaining.len();
        if drained > 0 {
            self.handler.on_drained(remaining);
        }
        drained
    }

    /// Number of items waiting for the consumer
    pub fn len(&self) -> usize {
        self.shared.lock_state().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock_state().running
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.shared.stats
    }
}

impl<T: Send + 'static> Drop for DispatchQueue<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<T: Send + 'static> std::fmt::Debug for DispatchQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("type_name", &self.shared.type_name)
            .field("capacity", &self.shared.capacity)
            .field("stats", &self.shared.stats.snapshot())
            .finish()
    }
}

fn run_consumer<T: Send + 'static>(shared: Arc<QueueShared<T>>, handler: Arc<dyn DispatchHandler<T>>) {
    loop {
        let item = {
            let mut state = shared.lock_state();
            loop {
                if !state.running {
                    return;
                }
                if let Some(item) = state.items.pop_front() {
                    break item;
                }
                state = match shared.available.wait(state) {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
            }
        };

        if let Some(name) = &shared.name {
            shared
                .stats
                .maybe_log(name, &shared.type_name, STATS_LOG_INTERVAL);
        }
        handler.on_item(item);
        shared.stats.record_processed();
    }
}
