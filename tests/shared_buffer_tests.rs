//! Tests for the shared buffer lifecycle: checkout, broadcast, acknowledge, return

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            mpsc, Arc, Mutex,
        },
        thread,
        time::{Duration, Instant},
    };

    use ipcbus::{
        buffers::BufferState, BufferPool, BufferPoolConfig, CompletionOutcome, CompletionTracker,
        IpcBusError, LocalTransport, SharedBufferChannel, SharedBufferSubscriber, SharedFrame,
        SubscriberConfig, SubscriberRegistry, TrackerConfig, Transport,
    };
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct DepthHeader {
        width: u16,
        height: u16,
        stamp: u64,
    }
    ipcbus::impl_bincode_codec!(DepthHeader, "robot.camera.DepthHeader");

    struct Fixture {
        pool: Arc<BufferPool>,
        transport: Arc<LocalTransport>,
        registry: SubscriberRegistry,
        channel: SharedBufferChannel<DepthHeader>,
    }

    impl Fixture {
        fn new(num_buffers: usize, timeout: Duration) -> Self {
            let pool = Arc::new(
                BufferPool::new(
                    BufferPoolConfig::new("depth")
                        .with_num_buffers(num_buffers)
                        .with_buffer_size(16 * 1024),
                )
                .unwrap(),
            );
            let tracker =
                CompletionTracker::new(TrackerConfig::default().with_timeout(timeout)).unwrap();
            let transport = Arc::new(LocalTransport::new());
            let channel = SharedBufferChannel::new(
                transport.clone() as Arc<dyn Transport>,
                pool.clone(),
                tracker,
            )
            .unwrap();
            Self {
                pool,
                transport,
                registry: SubscriberRegistry::new(),
                channel,
            }
        }

        fn subscribe<F>(&self, handler: F) -> SharedBufferSubscriber<DepthHeader>
        where
            F: FnMut(SharedFrame<DepthHeader>) + Send + 'static,
        {
            let subscriber = SharedBufferSubscriber::spawn(
                SubscriberConfig::shared_buffer(),
                &self.registry,
                handler,
            )
            .unwrap();
            self.channel.add(self.transport.attach(subscriber.inbox()));
            subscriber
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            self.registry.stop_all();
        }
    }

    fn header(stamp: u64) -> DepthHeader {
        DepthHeader {
            width: 64,
            height: 48,
            stamp,
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
    fn test_buffer_returns_after_every_ack() {
        let fixture = Fixture::new(2, Duration::from_secs(10));
        let seen = Arc::new(Mutex::new(Vec::new()));

        for _ in 0..3 {
            let seen = seen.clone();
            fixture.subscribe(move |frame| {
                let stamp = frame.header().stamp;
                let first = frame.buffer().read(0, 4).unwrap().to_vec();
                seen.lock().unwrap().push((stamp, first));
                frame.done();
            });
        }

        let mut buffer = fixture.channel.checkout().unwrap();
        buffer.write(0, &[1, 2, 3, 4]).unwrap();
        let id = buffer.id();
        let report = fixture.channel.publish(buffer, &header(7)).unwrap();
        assert_eq!(report.delivered, 3);

        assert!(wait_until(Duration::from_secs(5), || {
            fixture.pool.buffer_state(id) == Some(BufferState::Available)
        }));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|(stamp, bytes)| *stamp == 7 && bytes == &[1, 2, 3, 4]));
        assert_eq!(fixture.channel.tracker().stats().acknowledged, 1);
    }

    #[test]
    fn test_missing_ack_times_out() {
        let fixture = Fixture::new(1, Duration::from_millis(150));
        let held = Arc::new(Mutex::new(Vec::new()));

        fixture.subscribe(|frame| frame.done());
        {
            // Keeps its frames without acknowledging them
            let held = held.clone();
            fixture.subscribe(move |frame| held.lock().unwrap().push(frame));
        }

        let (tx, rx) = mpsc::channel();
        let buffer = fixture.channel.checkout().unwrap();
        let id = buffer.id();
        let started = Instant::now();
        let pool = fixture.pool.clone();
        fixture
            .channel
            .publish_with(buffer, &header(1), move |id, outcome| {
                pool.return_buffer(id).unwrap();
                tx.send(outcome).unwrap();
            })
            .unwrap();

        assert!(fixture.channel.checkout().is_none());
        let outcome = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(outcome, CompletionOutcome::TimedOut { missing: 1 });
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert_eq!(fixture.pool.buffer_state(id), Some(BufferState::Available));
        assert_eq!(fixture.channel.tracker().stats().timed_out, 1);

        // A late acknowledgment is harmless
        for frame in held.lock().unwrap().drain(..) {
            frame.done();
        }
        assert_eq!(fixture.pool.available_count(), 1);
    }

    #[test]
    fn test_no_subscribers_returns_immediately() {
        let fixture = Fixture::new(1, Duration::from_secs(10));
        let buffer = fixture.channel.checkout().unwrap();
        let id = buffer.id();

        let report = fixture.channel.publish(buffer, &header(3)).unwrap();
        assert_eq!(report.delivered, 0);
        assert!(wait_until(Duration::from_secs(1), || {
            fixture.pool.buffer_state(id) == Some(BufferState::Available)
        }));
    }

    #[test]
    fn test_dead_subscriber_does_not_hold_buffer() {
        let fixture = Fixture::new(1, Duration::from_secs(10));
        let acked = Arc::new(AtomicUsize::new(0));

        {
            let acked = acked.clone();
            fixture.subscribe(move |frame| {
                acked.fetch_add(1, Ordering::SeqCst);
                frame.done();
            });
        }
        let stopped = fixture.subscribe(|frame| frame.done());
        stopped.stop();

        let buffer = fixture.channel.checkout().unwrap();
        let id = buffer.id();
        let report = fixture.channel.publish(buffer, &header(9)).unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.pruned, 1);
        assert_eq!(fixture.channel.subscriber_count(), 1);

        assert!(wait_until(Duration::from_secs(5), || {
            fixture.pool.buffer_state(id) == Some(BufferState::Available)
        }));
        assert_eq!(acked.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_publish_rejects_returned_buffer() {
        let fixture = Fixture::new(1, Duration::from_secs(10));
        let buffer = fixture.channel.checkout().unwrap();
        fixture.pool.return_buffer(buffer.id()).unwrap();

        assert!(fixture.channel.publish(buffer, &header(0)).is_err());
        assert_eq!(fixture.pool.available_count(), 1);
    }

    #[test]
    fn test_tracking_conflict_returns_buffer() {
        let pool = Arc::new(
            BufferPool::new(BufferPoolConfig::new("conflict").with_num_buffers(1)).unwrap(),
        );
        let tracker = CompletionTracker::new(TrackerConfig::default()).unwrap();
        let transport = Arc::new(LocalTransport::new());
        let channel = SharedBufferChannel::<DepthHeader>::new(
            transport as Arc<dyn Transport>,
            pool.clone(),
            tracker.clone(),
        )
        .unwrap();

        let buffer = channel.checkout().unwrap();
        let id = buffer.id();
        // The tracker is shared, and someone else already waits on this id
        let competing = tracker.track(id, 1, |_, _| {}).unwrap();

        assert!(matches!(
            channel.publish(buffer, &header(0)),
            Err(IpcBusError::AlreadyTracked { .. })
        ));
        assert_eq!(pool.buffer_state(id), Some(BufferState::Available));
        assert_eq!(pool.available_count(), 1);

        for handle in competing {
            handle.done();
        }
    }

    #[test]
    fn test_publish_into_destroyed_pool() {
        let fixture = Fixture::new(1, Duration::from_secs(10));
        let buffer = fixture.channel.checkout().unwrap();
        fixture.pool.destroy();

        assert!(matches!(
            fixture.channel.publish(buffer, &header(0)),
            Err(IpcBusError::PoolDestroyed { .. })
        ));
        assert!(fixture.channel.checkout().is_none());
    }

    #[test]
    fn test_pool_cycles_under_sustained_publishing() {
        let fixture = Fixture::new(2, Duration::from_secs(10));
        let consumed = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let consumed = consumed.clone();
            fixture.subscribe(move |frame| {
                consumed.fetch_add(1, Ordering::SeqCst);
                frame.done();
            });
        }

        let mut published = 0;
        let deadline = Instant::now() + Duration::from_secs(10);
        while published < 50 && Instant::now() < deadline {
            match fixture.channel.checkout() {
                Some(buffer) => {
                    fixture.channel.publish(buffer, &header(published)).unwrap();
                    published += 1;
                }
                None => thread::sleep(Duration::from_millis(1)),
            }
        }
        assert_eq!(published, 50);

        assert!(wait_until(Duration::from_secs(5), || {
            fixture.pool.available_count() == 2
        }));
        // Frames evicted from a subscriber queue are acknowledged automatically,
        // so every buffer comes back even if some frames were never handled
        assert!(consumed.load(Ordering::SeqCst) <= 100);
        assert_eq!(fixture.channel.tracker().in_flight(), 0);
    }
}
