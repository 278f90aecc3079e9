//! Completion tracking for shared buffers

pub mod countdown;
pub mod handle;
pub mod tracker;


pub use countdown::Countdown;
pub use handle::CompletionHandle;
pub use tracker::{CompletionOutcome, CompletionTracker, TrackerConfig, TrackerStats};
