use clap::{App, Arg, ArgMatches, SubCommand};
use ipcbus::{
    error::IpcBusError, BackingType, BufferPool, BufferPoolConfig, Channel, CompletionTracker,
    LocalTransport, Result, SharedBufferChannel, SharedBufferSubscriber, Subscriber,
    SubscriberConfig, SubscriberRegistry, TrackerConfig, Transport,
};
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Heartbeat {
    sequence: u64,
    sent_at_us: u64,
}
ipcbus::impl_bincode_codec!(Heartbeat, "ipcbus.cli.Heartbeat");

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FrameHeader {
    sequence: u64,
    length: u32,
}
ipcbus::impl_bincode_codec!(FrameHeader, "ipcbus.cli.FrameHeader");

fn main() -> Result<()> {
    env_logger::init();

    let matches = App::new("ipcbus-cli")
        .version(env!("CARGO_PKG_VERSION"))
        .about("ipcbus publish/subscribe exercise tool")
        .subcommand(
            SubCommand::with_name("pubsub")
                .about("Publish messages to one subscriber and report drops")
                .arg(
                    Arg::with_name("count")
                        .short("c")
                        .long("count")
                        .value_name("COUNT")
                        .help("Number of messages to publish")
                        .default_value("10000")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("capacity")
                        .short("q")
                        .long("capacity")
                        .value_name("CAPACITY")
                        .help("Subscriber queue capacity")
                        .default_value("10")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("delay_us")
                        .short("d")
                        .long("delay-us")
                        .value_name("MICROS")
                        .help("Simulated handler work per message")
                        .default_value("0")
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("pool")
                .about("Broadcast pooled shared buffers to several subscribers")
                .arg(
                    Arg::with_name("buffers")
                        .short("n")
                        .long("buffers")
                        .value_name("COUNT")
                        .help("Number of buffers in the pool")
                        .default_value("4")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("buffer_size")
                        .short("b")
                        .long("buffer-size")
                        .value_name("SIZE")
                        .help("Buffer size in bytes")
                        .default_value("65536")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("subscribers")
                        .short("s")
                        .long("subscribers")
                        .value_name("COUNT")
                        .help("Number of shared-buffer subscribers")
                        .default_value("3")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("frames")
                        .short("f")
                        .long("frames")
                        .value_name("COUNT")
                        .help("Number of frames to publish")
                        .default_value("100")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("memfd")
                        .long("memfd")
                        .help("Back buffers with anonymous memory file descriptors (Linux only)"),
                ),
        )
        .subcommand(SubCommand::with_name("info").about("Show version and defaults"))
        .get_matches();

    match matches.subcommand() {
        ("pubsub", Some(pubsub_matches)) => run_pubsub(pubsub_matches),
        ("pool", Some(pool_matches)) => run_pool(pool_matches),
        ("info", Some(_)) => show_info(),
        _ => {
            println!("Use --help for usage information");
            Ok(())
        }
    }
}

fn parse_arg<T: std::str::FromStr>(matches: &ArgMatches, name: &'static str) -> Result<T> {
    matches
        .value_of(name)
        .ok_or_else(|| IpcBusError::invalid_parameter(name, "Missing value"))?
        .parse()
        .map_err(|_| IpcBusError::invalid_parameter(name, "Invalid number"))
}

fn run_pubsub(matches: &ArgMatches) -> Result<()> {
    let count: u64 = parse_arg(matches, "count")?;
    let capacity: usize = parse_arg(matches, "capacity")?;
    let delay = Duration::from_micros(parse_arg(matches, "delay_us")?);

    println!("Publishing {} messages, queue capacity {}", count, capacity);

    let transport = Arc::new(LocalTransport::new());
    let registry = SubscriberRegistry::new();
    let received = Arc::new(AtomicU64::new(0));

    let subscriber = {
        let received = Arc::clone(&received);
        Subscriber::<Heartbeat>::spawn(
            SubscriberConfig::default()
                .with_name("cli-pubsub")
                .with_queue_capacity(capacity),
            &registry,
            move |_beat| {
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                received.fetch_add(1, Ordering::Relaxed);
            },
        )?
    };
    let endpoint = transport.attach(subscriber.inbox());

    let channel = Channel::<Heartbeat>::new(Arc::clone(&transport) as Arc<dyn Transport>)?;
    channel.add(endpoint);

    let start = Instant::now();
    for sequence in 0..count {
        channel.publish(&Heartbeat {
            sequence,
            sent_at_us: start.elapsed().as_micros() as u64,
        })?;
    }
    let publish_time = start.elapsed();

    // Let the consumer catch up with whatever survived in the queue
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        let stats = subscriber.stats();
        if stats.processed + stats.dropped >= count {
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
    subscriber.stop();

    let stats = subscriber.stats();
    println!("\nResults:");
    println!("  Publish time: {:.2}ms", publish_time.as_secs_f64() * 1000.0);
    println!(
        "  Messages/sec: {:.0}",
        count as f64 / publish_time.as_secs_f64().max(f64::EPSILON)
    );
    println!("  Received: {}", received.load(Ordering::Relaxed));
    println!("  Dropped: {}", stats.dropped);
    println!("  Channel: {:?}", channel.stats());
    Ok(())
}

fn run_pool(matches: &ArgMatches) -> Result<()> {
    let num_buffers: usize = parse_arg(matches, "buffers")?;
    let buffer_size: usize = parse_arg(matches, "buffer_size")?;
    let subscribers: usize = parse_arg(matches, "subscribers")?;
    let frames: u64 = parse_arg(matches, "frames")?;

    let backing = if matches.is_present("memfd") {
        #[cfg(target_os = "linux")]
        {
            BackingType::MemFd
        }
        #[cfg(not(target_os = "linux"))]
        {
            return Err(IpcBusError::platform("memfd not supported on this platform"));
        }
    } else {
        BackingType::Heap
    };

    println!(
        "Pool: {} x {} bytes ({}), {} subscribers, {} frames",
        num_buffers,
        buffer_size,
        backing.name(),
        subscribers,
        frames
    );

    let pool = Arc::new(BufferPool::new(
        BufferPoolConfig::new("cli-pool")
            .with_num_buffers(num_buffers)
            .with_buffer_size(buffer_size)
            .with_backing(backing),
    )?);
    let tracker = CompletionTracker::new(TrackerConfig::default())?;
    let transport = Arc::new(LocalTransport::new());
    let registry = SubscriberRegistry::new();
    let channel = SharedBufferChannel::<FrameHeader>::new(
        Arc::clone(&transport) as Arc<dyn Transport>,
        Arc::clone(&pool),
        tracker.clone(),
    )?;

    let consumed = Arc::new(AtomicU64::new(0));
    let mut endpoints = Vec::with_capacity(subscribers);
    for i in 0..subscribers {
        let consumed = Arc::clone(&consumed);
        let subscriber = SharedBufferSubscriber::<FrameHeader>::spawn(
            SubscriberConfig::shared_buffer().with_name(format!("cli-reader-{}", i)),
            &registry,
            move |frame| {
                let length = frame.header().length as usize;
                let checksum = match frame.buffer().read(0, length) {
                    Ok(bytes) => bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b)),
                    Err(e) => {
                        log::warn!("frame {} unreadable: {}", frame.header().sequence, e);
                        0
                    }
                };
                log::trace!("frame {} checksum {}", frame.header().sequence, checksum);
                consumed.fetch_add(1, Ordering::Relaxed);
                frame.done();
            },
        )?;
        channel.add(transport.attach(subscriber.inbox()));
        endpoints.push(subscriber);
    }

    let start = Instant::now();
    let mut published = 0u64;
    let mut exhausted = 0u64;
    for sequence in 0..frames {
        let Some(mut buffer) = channel.checkout() else {
            exhausted += 1;
            thread::sleep(Duration::from_millis(1));
            continue;
        };
        let length = buffer.capacity().min(1024);
        let fill = vec![sequence as u8; length];
        buffer.write(0, &fill)?;
        channel.publish(
            buffer,
            &FrameHeader {
                sequence,
                length: length as u32,
            },
        )?;
        published += 1;
    }

    let deadline = Instant::now() + tracker.timeout();
    while tracker.in_flight() > 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    let elapsed = start.elapsed();
    registry.stop_all();

    println!("\nResults:");
    println!("  Published: {}", published);
    println!("  Pool exhausted: {}", exhausted);
    println!("  Frames consumed: {}", consumed.load(Ordering::Relaxed));
    println!("  Total time: {:.2}ms", elapsed.as_secs_f64() * 1000.0);
    println!("  {}", pool.stats().summary());
    println!("  Tracker: {:?}", tracker.stats());
    Ok(())
}

fn show_info() -> Result<()> {
    println!("ipcbus v{}", ipcbus::VERSION);
    println!("Intra-device publish/subscribe with pooled shared buffers");
    println!();
    println!("Defaults:");
    println!("  Queue capacity: {}", ipcbus::config::DEFAULT_QUEUE_CAPACITY);
    println!("  Shared queue capacity: {}", ipcbus::config::SHARED_QUEUE_CAPACITY);
    println!("  Completion timeout: {:?}", ipcbus::config::COMPLETION_TIMEOUT);
    println!(
        "  Circuit breaker: {} disconnects within {:?}",
        ipcbus::config::MAX_RAPID_DISCONNECTS,
        ipcbus::config::RAPID_DISCONNECT_WINDOW
    );
    println!("  Envelope header: {} bytes", ipcbus::config::ENVELOPE_HEADER_SIZE);
    println!();
    println!("Platform support:");
    println!("  File-backed buffers: yes");
    #[cfg(target_os = "linux")]
    println!("  memfd buffers: yes");
    #[cfg(not(target_os = "linux"))]
    println!("  memfd buffers: no");
    Ok(())
}
