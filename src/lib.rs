//! # ipcbus - Intra-device publish/subscribe
//!
//! ipcbus moves typed events and large binary payloads between the processes
//! of a robot, with bounded memory and predictable drop behavior under load.
//!
//! ## Features
//!
//! - **Typed envelopes**: payload plus a stable type signature, checked before delivery
//! - **Drop-oldest dispatch queues**: one consumer thread per subscriber, producers never block
//! - **Self-healing channels**: dead subscriber endpoints are pruned while publishing
//! - **Shared buffer pools**: fixed sets of heap, memfd or file-backed buffers
//! - **Completion tracking**: a buffer returns to its pool once every subscriber is done
//! - **Resilient connections**: queued bind requests, circuit breaker and auto-reconnect
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐          ┌───────────────────────────┐
//! │  Channel<T>          │  frame   │  Subscriber<T>            │
//! │  SharedBufferChannel │ ───────► │  DispatchQueue + thread   │
//! │  (endpoint registry) │ Transport│  (drop-oldest)            │
//! └──────────────────────┘          └───────────────────────────┘
//!           │                                    │ done()
//!           ▼                                    ▼
//! ┌──────────────────────┐          ┌───────────────────────────┐
//! │  BufferPool          │ ◄─────── │  CompletionTracker        │
//! │  (checkout / return) │  return  │  (countdown per buffer)   │
//! └──────────────────────┘          └───────────────────────────┘
//! ```

// Core modules
pub mod error;
pub mod envelope;
pub mod dispatch;
pub mod transport;
pub mod channel;
pub mod subscriber;

// Large payloads
pub mod memory;
pub mod buffers;
pub mod completion;

// Remote peers
pub mod connection;

// Main API re-exports
pub use error::{IpcBusError, Result};
pub use envelope::{Envelope, MessageCodec, Origin, TypeSignature};
pub use dispatch::{DispatchHandler, DispatchQueue, DispatchStats, DispatchStatsSnapshot, Enqueued};
pub use transport::{EndpointId, Inbox, LocalTransport, Transport, TransportError};
pub use channel::{Channel, ChannelStats, PublishReport, SharedBufferChannel};
pub use subscriber::{
    SharedBufferSubscriber, SharedFrame, Subscriber, SubscriberConfig, SubscriberInfo,
    SubscriberRegistry,
};
pub use memory::{BackingType, HeapRegionAllocator, MappedRegionAllocator, MemoryRegion, RegionAllocator};
pub use buffers::{
    BufferId, BufferPool, BufferPoolConfig, BufferPoolConfigBuilder, BufferPoolStats, BufferView,
    SharedBuffer,
};
pub use completion::{CompletionHandle, CompletionOutcome, CompletionTracker, TrackerConfig};
pub use connection::{
    BindEvents, Binder, ConnectionConfig, ConnectionError, ConnectionManager, ConnectionState,
};

#[doc(hidden)]
pub mod __private {
    pub use bincode;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration constants
pub mod config {
    use std::time::Duration;

    pub use crate::envelope::ENVELOPE_HEADER_SIZE;

    /// Dispatch queue capacity of a subscriber
    pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

    /// Dispatch queue capacity of a shared-buffer subscriber
    pub const SHARED_QUEUE_CAPACITY: usize = 1;

    /// How long a published buffer waits for acknowledgments
    pub const COMPLETION_TIMEOUT: Duration = Duration::from_secs(10);

    /// Rapid disconnects in a row before refusing to bind
    pub const MAX_RAPID_DISCONNECTS: u32 = 5;

    /// A disconnect this soon after connecting counts as rapid
    pub const RAPID_DISCONNECT_WINDOW: Duration = Duration::from_millis(1000);

    /// Minimum interval between drop-ratio log lines of a named subscriber
    pub const STATS_LOG_INTERVAL: Duration = Duration::from_secs(30);
}
