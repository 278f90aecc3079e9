//! Broadcast of pooled shared buffers

use std::{
    fmt,
    marker::PhantomData,
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};

use crate::{
    buffers::{BufferId, BufferPool, BufferState, SharedBuffer},
    completion::{CompletionOutcome, CompletionTracker},
    envelope::{Envelope, MessageCodec, TypeSignature},
    error::{IpcBusError, Result},
    transport::{EndpointId, Transport, TransportError},
};

use super::{
    channel::{check_type_name, AtomicChannelStats, ChannelStats, PublishReport},
    registry::EndpointRegistry,
};

/// Envelope payload sent along with a shared buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferDescriptor {
    pub buffer_id: BufferId,
    pub buffer_size: u64,
    /// Encoded header message
    pub header: Vec<u8>,
}

impl BufferDescriptor {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Publisher side for large payloads living in a [`BufferPool`]
///
/// Each publish hands one checked out buffer to every registered endpoint
/// together with a typed header `T`. The buffer goes back to the pool once
/// every endpoint acknowledged it, or when the tracker times out.
pub struct SharedBufferChannel<T: MessageCodec> {
    transport: Arc<dyn Transport>,
    pool: Arc<BufferPool>,
    tracker: CompletionTracker,
    registry: EndpointRegistry,
    signature: TypeSignature,
    stats: AtomicChannelStats,
    publish_lock: Mutex<()>,
    _marker: PhantomData<fn(&T)>,
}

impl<T: MessageCodec> SharedBufferChannel<T> {
    pub fn new(
        transport: Arc<dyn Transport>,
        pool: Arc<BufferPool>,
        tracker: CompletionTracker,
    ) -> Result<Self> {
        check_type_name::<T>()?;
        Ok(Self {
            transport,
            pool,
            tracker,
            registry: EndpointRegistry::new(),
            signature: T::type_signature(),
            stats: AtomicChannelStats::default(),
            publish_lock: Mutex::new(()),
            _marker: PhantomData,
        })
    }

    pub fn add(&self, endpoint: EndpointId) -> bool {
        self.registry.add(endpoint)
    }

    pub fn remove(&self, endpoint: EndpointId) -> bool {
        self.registry.remove(endpoint)
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn tracker(&self) -> &CompletionTracker {
        &self.tracker
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats.snapshot()
    }

    /// Check out a buffer from the channel's pool
    pub fn checkout(&self) -> Option<SharedBuffer> {
        self.pool.checkout()
    }

    /// Broadcast `buffer` with `header`, returning it to the pool when done
    pub fn publish(&self, buffer: SharedBuffer, header: &T) -> Result<PublishReport> {
        let pool = Arc::clone(&self.pool);
        self.publish_with(buffer, header, move |id, _outcome| {
            if let Err(e) = pool.return_buffer(id) {
                log::warn!("Failed to return buffer {}: {}", id, e);
            }
        })
    }

    /// Broadcast `buffer` with `header` and a custom completion delegate
    ///
    /// `on_all_done` runs once, after every endpoint acknowledged or the
    /// tracker timed out. It owns the buffer's return to the pool.
    pub fn publish_with<F>(
        &self,
        buffer: SharedBuffer,
        header: &T,
        on_all_done: F,
    ) -> Result<PublishReport>
    where
        F: FnOnce(BufferId, CompletionOutcome) + Send + 'static,
    {
        let id = buffer.id();
        if self.pool.is_destroyed() {
            return Err(IpcBusError::pool_destroyed(self.pool.name()));
        }
        if self.pool.buffer_state(id) != Some(BufferState::CheckedOut) {
            return Err(IpcBusError::UnknownBuffer {
                buffer_id: id.as_u64(),
            });
        }

        let frame = match self.encode_frame(&buffer, header) {
            Ok(frame) => frame,
            Err(e) => {
                self.pool.release(buffer)?;
                return Err(e);
            }
        };
        let view = buffer.view();

        let _guard = self.publish_lock.lock().unwrap_or_else(|e| e.into_inner());
        let registrations = self.registry.registrations();
        let handles = match self.tracker.track(id, registrations.len(), on_all_done) {
            Ok(handles) => handles,
            Err(e) => {
                self.pool.release(buffer)?;
                return Err(e);
            }
        };

        let mut report = PublishReport::default();
        let mut dead = Vec::new();
        for (registration, handle) in registrations.into_iter().zip(handles) {
            let endpoint = registration.endpoint;
            match self
                .transport
                .send_shared(endpoint, &frame, &view, handle.clone())
            {
                Ok(()) => report.delivered += 1,
                Err(TransportError::PeerDead) => {
                    log::warn!("{} is dead, removing it from {}", endpoint, T::TYPE_NAME);
                    handle.done();
                    dead.push(registration);
                }
                Err(TransportError::Failed(reason)) => {
                    log::warn!(
                        "Failed to send buffer {} to {}: {}",
                        id,
                        endpoint,
                        reason
                    );
                    handle.done();
                    report.failed += 1;
                }
            }
        }
        report.pruned = self.registry.prune(&dead);

        self.stats.record(&report);
        Ok(report)
    }

    fn encode_frame(&self, buffer: &SharedBuffer, header: &T) -> Result<Vec<u8>> {
        let descriptor = BufferDescriptor {
            buffer_id: buffer.id(),
            buffer_size: buffer.capacity() as u64,
            header: header.encode()?,
        };
        Envelope::from_parts(self.signature, descriptor.encode()?).to_wire()
    }
}

impl<T: MessageCodec> fmt::Debug for SharedBufferChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBufferChannel")
            .field("type_name", &T::TYPE_NAME)
            .field("pool", &self.pool.name())
            .field("subscribers", &self.registry.len())
            .finish()
    }
}
