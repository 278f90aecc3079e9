//! Countdown latch used to wait for subscriber acknowledgments

use std::{
    sync::{Condvar, Mutex, MutexGuard},
    time::{Duration, Instant},
};

/// Counter that releases waiters when it reaches zero
#[derive(Debug)]
pub struct Countdown {
    remaining: Mutex<usize>,
    zero: Condvar,
}

impl Countdown {
    pub fn new(count: usize) -> Self {
        Self {
            remaining: Mutex::new(count),
            zero: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.remaining.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Decrement by one; extra calls at zero are ignored
    pub fn count_down(&self) {
        let mut remaining = self.lock();
        if *remaining > 0 {
            *remaining -= 1;
            if *remaining == 0 {
                self.zero.notify_all();
            }
        }
    }

    pub fn remaining(&self) -> usize {
        *self.lock()
    }

    /// Wait until zero or until `timeout` elapses, returning what is left
    pub fn wait_timeout(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut remaining = self.lock();
        while *remaining > 0 {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            remaining = match self.zero.wait_timeout(remaining, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        *remaining
    }
}
