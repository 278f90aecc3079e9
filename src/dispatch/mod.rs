//! Bounded per-subscriber dispatch queues
//!
//! Each subscriber owns one [`DispatchQueue`] drained by a dedicated consumer
//! thread. Producers never block: when the queue is full the oldest item is
//! evicted, reported to the handler and counted.

pub mod handler;
pub mod queue;
pub mod stats;

#[cfg(test)]
mod tests;

pub use handler::DispatchHandler;
pub use queue::{DispatchQueue, Enqueued};
pub use stats::{DispatchStats, DispatchStatsSnapshot};
