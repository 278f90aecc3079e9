//! Transport primitive between publishers and subscriber endpoints
//!
//! The messaging layer never talks to sockets or binders directly. It hands
//! raw envelope frames to a [`Transport`] addressed by [`EndpointId`], and
//! learns about dead peers from the returned [`TransportError`].

pub mod local;

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};

use crate::{buffers::BufferView, completion::CompletionHandle};

pub use local::LocalTransport;

/// Opaque address of a subscriber endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointId(u64);

impl EndpointId {
    /// Allocate a process-unique endpoint id
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "endpoint#{}", self.0)
    }
}

/// Why a single send failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The peer is gone for good; drop every reference to it
    #[error("peer is dead")]
    PeerDead,
    /// This send failed but the peer may still be alive
    #[error("send failed: {0}")]
    Failed(String),
}

/// Send primitive towards subscriber endpoints
pub trait Transport: Send + Sync {
    /// Deliver one envelope frame
    fn send(&self, endpoint: EndpointId, frame: &[u8]) -> Result<(), TransportError>;

    /// Deliver an envelope frame that travels with a shared buffer
    ///
    /// The receiver owns `completion` and must call `done` once it stops
    /// reading the buffer.
    fn send_shared(
        &self,
        endpoint: EndpointId,
        frame: &[u8],
        buffer: &BufferView,
        completion: CompletionHandle,
    ) -> Result<(), TransportError>;
}

/// Receiving side of an endpoint
pub trait Inbox: Send + Sync {
    fn endpoint_id(&self) -> EndpointId;

    /// Accept one envelope frame
    fn deliver(&self, frame: &[u8]) -> Result<(), TransportError>;

    /// Accept a frame travelling with a shared buffer
    fn deliver_shared(
        &self,
        frame: &[u8],
        buffer: BufferView,
        completion: CompletionHandle,
    ) -> Result<(), TransportError> {
        let _ = (frame, buffer, completion);
        Err(TransportError::Failed(format!(
            "{} does not accept shared buffers",
            self.endpoint_id()
        )))
    }
}
