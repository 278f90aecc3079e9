use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ipcbus::{
    BackingType, BufferPool, BufferPoolConfig, CompletionTracker, LocalTransport,
    SharedBufferChannel, SharedBufferSubscriber, SubscriberConfig, SubscriberRegistry,
    TrackerConfig, Transport,
};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, thread, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScanHeader {
    points: u32,
}
ipcbus::impl_bincode_codec!(ScanHeader, "bench.lidar.ScanHeader");

fn benchmark_checkout_return(c: &mut Criterion) {
    let mut group = c.benchmark_group("BufferPool");

    let mut backings = vec![BackingType::Heap];
    #[cfg(target_os = "linux")]
    backings.push(BackingType::MemFd);

    for backing in backings {
        group.bench_with_input(
            BenchmarkId::new("checkout_return", backing.name()),
            &backing,
            |b, &backing| {
                let pool = BufferPool::new(
                    BufferPoolConfig::new("bench")
                        .with_num_buffers(8)
                        .with_buffer_size(64 * 1024)
                        .with_backing(backing),
                )
                .unwrap();

                b.iter(|| {
                    let buffer = pool.checkout().unwrap();
                    let id = buffer.id();
                    black_box(&buffer);
                    pool.return_buffer(id).unwrap();
                });
            },
        );
    }

    group.finish();
}

fn benchmark_shared_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("SharedBufferChannel");

    for subscribers in [1usize, 4].iter() {
        group.bench_with_input(
            BenchmarkId::new("publish_and_ack", subscribers),
            subscribers,
            |b, &subscribers| {
                let pool = Arc::new(
                    BufferPool::new(
                        BufferPoolConfig::new("bench-shared")
                            .with_num_buffers(4)
                            .with_buffer_size(16 * 1024),
                    )
                    .unwrap(),
                );
                let tracker = CompletionTracker::new(TrackerConfig::default()).unwrap();
                let transport = Arc::new(LocalTransport::new());
                let registry = SubscriberRegistry::new();
                let channel = SharedBufferChannel::<ScanHeader>::new(
                    Arc::clone(&transport) as Arc<dyn Transport>,
                    Arc::clone(&pool),
                    tracker,
                )
                .unwrap();

                for _ in 0..subscribers {
                    let subscriber = SharedBufferSubscriber::<ScanHeader>::spawn(
                        SubscriberConfig::shared_buffer(),
                        &registry,
                        |frame| {
                            let mut first = [0u8; 64];
                            frame.buffer().read_into(0, &mut first).unwrap();
                            black_box(first);
                            frame.done();
                        },
                    )
                    .unwrap();
                    channel.add(transport.attach(subscriber.inbox()));
                }

                b.iter(|| {
                    // Wait for a buffer to come back from the previous round
                    let buffer = loop {
                        if let Some(buffer) = channel.checkout() {
                            break buffer;
                        }
                        thread::sleep(Duration::from_micros(10));
                    };
                    black_box(channel.publish(buffer, &ScanHeader { points: 360 }).unwrap())
                });
                registry.stop_all();
            },
        );
    }

    group.finish();
}

criterion_group!(benches, benchmark_checkout_return, benchmark_shared_publish);
criterion_main!(benches);
