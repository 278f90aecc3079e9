//! Shared buffers and the fixed pool that owns them

pub mod buffer;
pub mod config;
pub mod pool;
pub mod stats;

pub use buffer::{BufferId, BufferView, SharedBuffer};
pub use config::{BufferPoolConfig, BufferPoolConfigBuilder};
pub use pool::{BufferPool, BufferState};
pub use stats::{AtomicBufferPoolStats, BufferPoolStats};
