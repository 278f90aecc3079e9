//! Tests for dispatch queue components

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            mpsc, Arc, Condvar, Mutex,
        },
        thread,
        time::{Duration, Instant},
    };

    use crate::dispatch::*;

    const BLOCKER: u32 = u32::MAX;

    /// Records everything and holds the consumer on `BLOCKER` until released
    struct GatedRecorder {
        processed: Mutex<Vec<u32>>,
        discarded: Mutex<Vec<u32>>,
        drained: Mutex<Vec<u32>>,
        gate: (Mutex<bool>, Condvar),
        started: Mutex<mpsc::Sender<()>>,
    }

    impl GatedRecorder {
        fn new() -> (Arc<Self>, mpsc::Receiver<()>) {
            let (tx, rx) = mpsc::channel();
            let recorder = Arc::new(Self {
                processed: Mutex::new(Vec::new()),
                discarded: Mutex::new(Vec::new()),
                drained: Mutex::new(Vec::new()),
                gate: (Mutex::new(false), Condvar::new()),
                started: Mutex::new(tx),
            });
            (recorder, rx)
        }

        fn release(&self) {
            let (lock, cvar) = &self.gate;
            *lock.lock().unwrap() = true;
            cvar.notify_all();
        }
    }

    impl DispatchHandler<u32> for GatedRecorder {
        fn on_item(&self, item: u32) {
            if item == BLOCKER {
                let _ = self.started.lock().unwrap().send(());
                let (lock, cvar) = &self.gate;
                let mut open = lock.lock().unwrap();
                while !*open {
                    open = cvar.wait(open).unwrap();
                }
            }
            self.processed.lock().unwrap().push(item);
        }

        fn on_discarded(&self, item: u32) {
            self.discarded.lock().unwrap().push(item);
        }

        fn on_drained(&self, remaining: Vec<u32>) {
            self.drained.lock().unwrap().extend(remaining);
        }
    }

    fn wait_until(deadline: Duration, condition: impl Fn() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let handler: Arc<dyn DispatchHandler<u32>> = Arc::new(|_: u32| {});
        assert!(DispatchQueue::spawn(None, "u32", 0, handler).is_err());
    }

    #[test]
    fn test_drop_oldest_keeps_most_recent() {
        let (recorder, started) = GatedRecorder::new();
        let queue = DispatchQueue::spawn(None, "u32", 4, recorder.clone() as Arc<dyn DispatchHandler<u32>>)
            .unwrap();

        queue.enqueue(BLOCKER);
        started.recv_timeout(Duration::from_secs(5)).unwrap();

        let mut outcomes = Vec::new();
        for i in 0..10 {
            outcomes.push(queue.enqueue(i));
        }

        assert_eq!(queue.len(), 4);
        assert_eq!(&outcomes[..4], &[Enqueued::Accepted; 4]);
        assert_eq!(&outcomes[4..], &[Enqueued::Evicted; 6]);
        assert_eq!(*recorder.discarded.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(queue.stats().snapshot().dropped, 6);

        recorder.release();
        assert!(wait_until(Duration::from_secs(5), || {
            queue.stats().snapshot().processed == 5
        }));
        assert_eq!(*recorder.processed.lock().unwrap(), vec![BLOCKER, 6, 7, 8, 9]);

        queue.stop();
        assert!(recorder.drained.lock().unwrap().is_empty());
    }

    #[test]
    fn test_counters_never_show_more_queued_than_capacity() {
        let (recorder, started) = GatedRecorder::new();
        let queue = Arc::new(
            DispatchQueue::spawn(None, "u32", 4, recorder.clone() as Arc<dyn DispatchHandler<u32>>)
                .unwrap(),
        );

        queue.enqueue(BLOCKER);
        started.recv_timeout(Duration::from_secs(5)).unwrap();

        // With the consumer held, at most the blocker plus a full queue are outstanding
        let done = Arc::new(AtomicBool::new(false));
        let reader = {
            let queue = queue.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut worst = 0;
                while !done.load(Ordering::SeqCst) {
                    let stats = queue.stats().snapshot();
                    worst = worst.max(stats.received - stats.dropped);
                }
                worst
            })
        };

        for i in 0..20_000 {
            queue.enqueue(i);
            let stats = queue.stats().snapshot();
            assert_eq!(stats.received - stats.dropped, queue.len() as u64 + 1);
        }
        done.store(true, Ordering::SeqCst);
        assert!(reader.join().unwrap() <= 5);
        assert_eq!(queue.stats().snapshot().dropped, 20_000 - 4);

        recorder.release();
        queue.stop();
    }

    #[test]
    fn test_stop_drains_remaining_items() {
        let (recorder, started) = GatedRecorder::new();
        let queue = DispatchQueue::spawn(None, "u32", 8, recorder.clone() as Arc<dyn DispatchHandler<u32>>)
            .unwrap();

        queue.enqueue(BLOCKER);
        started.recv_timeout(Duration::from_secs(5)).unwrap();
        for i in 0..3 {
            queue.enqueue(i);
        }

        let releaser = {
            let recorder = recorder.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                recorder.release();
            })
        };

        // Consumer is parked inside the handler: stop must wait for it, then
        // hand back what was never dequeued.
        let drained = queue.stop();
        releaser.join().unwrap();

        assert_eq!(drained, 3);
        assert_eq!(*recorder.drained.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(*recorder.processed.lock().unwrap(), vec![BLOCKER]);
        assert!(!queue.is_running());
    }

    #[test]
    fn test_enqueue_after_stop_is_rejected() {
        let (recorder, _started) = GatedRecorder::new();
        let queue = DispatchQueue::spawn(None, "u32", 2, recorder.clone() as Arc<dyn DispatchHandler<u32>>)
            .unwrap();
        queue.stop();

        assert_eq!(queue.enqueue(7), Enqueued::Rejected);
        assert_eq!(*recorder.discarded.lock().unwrap(), vec![7]);
        assert_eq!(queue.stats().snapshot().rejected, 1);
        assert_eq!(queue.stats().snapshot().received, 0);
        assert_eq!(queue.stop(), 0);
    }

    #[test]
    fn test_delivery_order_with_fast_consumer() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<dyn DispatchHandler<u32>> = {
            let seen = seen.clone();
            Arc::new(move |item: u32| seen.lock().unwrap().push(item))
        };
        let queue = DispatchQueue::spawn(Some("order-test".into()), "u32", 1000, handler).unwrap();

        for i in 0..500 {
            queue.enqueue(i);
        }
        assert!(wait_until(Duration::from_secs(5), || {
            queue.stats().snapshot().processed == 500
        }));

        assert_eq!(*seen.lock().unwrap(), (0..500).collect::<Vec<_>>());
        assert_eq!(queue.stats().snapshot().dropped, 0);
    }

    #[test]
    fn test_stop_from_handler_does_not_deadlock() {
        let queue_slot: Arc<Mutex<Option<Arc<DispatchQueue<u32>>>>> = Arc::new(Mutex::new(None));
        let stopped = Arc::new(AtomicBool::new(false));

        let handler: Arc<dyn DispatchHandler<u32>> = {
            let queue_slot = queue_slot.clone();
            let stopped = stopped.clone();
            Arc::new(move |_item: u32| {
                let queue = queue_slot.lock().unwrap().clone();
                if let Some(queue) = queue {
                    queue.stop();
                    stopped.store(true, Ordering::SeqCst);
                }
            })
        };

        let queue = Arc::new(DispatchQueue::spawn(None, "u32", 4, handler).unwrap());
        *queue_slot.lock().unwrap() = Some(queue.clone());
        queue.enqueue(1);

        assert!(wait_until(Duration::from_secs(5), || stopped.load(Ordering::SeqCst)));
        assert!(!queue.is_running());
        queue_slot.lock().unwrap().take();
    }
}
