//! Per-subscriber acknowledgment handle

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::buffers::BufferId;

use super::countdown::Countdown;

/// One subscriber's share of a buffer's completion countdown
///
/// Calling [`done`](Self::done) signals that the subscriber no longer reads
/// the buffer. Clones share the same share, so acknowledging through any of
/// them counts once. Dropping without `done` leaves the share outstanding
/// until the tracker times out.
#[derive(Clone)]
pub struct CompletionHandle {
    buffer_id: BufferId,
    countdown: Arc<Countdown>,
    acked: Arc<AtomicBool>,
}

impl CompletionHandle {
    pub(crate) fn new(buffer_id: BufferId, countdown: Arc<Countdown>) -> Self {
        Self {
            buffer_id,
            countdown,
            acked: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Acknowledge the buffer; repeated calls are ignored
    pub fn done(&self) {
        if !self.acked.swap(true, Ordering::AcqRel) {
            self.countdown.count_down();
        }
    }

    pub fn is_done(&self) -> bool {
        self.acked.load(Ordering::Acquire)
    }

    pub fn buffer_id(&self) -> BufferId {
        self.buffer_id
    }
}

impl fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionHandle")
            .field("buffer_id", &self.buffer_id)
            .field("done", &self.is_done())
            .finish()
    }
}
