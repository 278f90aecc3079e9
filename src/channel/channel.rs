//! Typed broadcast channel for small messages

use std::{
    fmt,
    marker::PhantomData,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use crate::{
    envelope::{Envelope, MessageCodec, TypeSignature},
    error::{IpcBusError, Result},
    transport::{EndpointId, Transport, TransportError},
};

use super::registry::EndpointRegistry;

/// Result of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Endpoints that accepted the frame
    pub delivered: usize,
    /// Endpoints found dead and removed from the registry
    pub pruned: usize,
    /// Endpoints that failed this time but stay registered
    pub failed: usize,
}

/// Snapshot of channel counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub published: u64,
    pub deliveries: u64,
    pub pruned: u64,
    pub failures: u64,
    pub mismatched: u64,
}

#[derive(Debug, Default)]
pub(crate) struct AtomicChannelStats {
    published: AtomicU64,
    deliveries: AtomicU64,
    pruned: AtomicU64,
    failures: AtomicU64,
    mismatched: AtomicU64,
}

impl AtomicChannelStats {
    pub(crate) fn record(&self, report: &PublishReport) {
        self.published.fetch_add(1, Ordering::Relaxed);
        self.deliveries
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.pruned.fetch_add(report.pruned as u64, Ordering::Relaxed);
        self.failures.fetch_add(report.failed as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_mismatch(&self) {
        self.mismatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ChannelStats {
        ChannelStats {
            published: self.published.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            pruned: self.pruned.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            mismatched: self.mismatched.load(Ordering::Relaxed),
        }
    }
}

/// Reject message types without a usable name
pub(crate) fn check_type_name<T: MessageCodec>() -> Result<()> {
    if T::TYPE_NAME.is_empty() {
        return Err(IpcBusError::invalid_parameter(
            "type_name",
            "Message type name cannot be empty",
        ));
    }
    Ok(())
}

/// Publisher side of one message type
///
/// Holds the set of subscriber endpoints and broadcasts envelopes to them.
/// Endpoints whose peer is found dead during a publish are dropped from the
/// registry; other endpoints are unaffected.
pub struct Channel<T: MessageCodec> {
    transport: Arc<dyn Transport>,
    registry: EndpointRegistry,
    signature: TypeSignature,
    stats: AtomicChannelStats,
    /// Serializes broadcasts so every endpoint sees publishes in one order
    publish_lock: Mutex<()>,
    _marker: PhantomData<fn(&T)>,
}

impl<T: MessageCodec> Channel<T> {
    pub fn new(transport: Arc<dyn Transport>) -> Result<Self> {
        check_type_name::<T>()?;
        Ok(Self {
            transport,
            registry: EndpointRegistry::new(),
            signature: T::type_signature(),
            stats: AtomicChannelStats::default(),
            publish_lock: Mutex::new(()),
            _marker: PhantomData,
        })
    }

    /// Register a subscriber endpoint; adding it twice has no effect
    pub fn add(&self, endpoint: EndpointId) -> bool {
        self.registry.add(endpoint)
    }

    /// Deregister a subscriber endpoint
    pub fn remove(&self, endpoint: EndpointId) -> bool {
        self.registry.remove(endpoint)
    }

    pub fn contains(&self, endpoint: EndpointId) -> bool {
        self.registry.contains(endpoint)
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    pub fn type_signature(&self) -> TypeSignature {
        self.signature
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats.snapshot()
    }

    /// Encode `message` and broadcast it to every registered endpoint
    pub fn publish(&self, message: &T) -> Result<PublishReport> {
        let envelope = Envelope::from_message(message)?;
        self.broadcast(&envelope)
    }

    /// Broadcast an already built envelope
    ///
    /// An envelope of another type is logged and dropped without delivery.
    pub fn publish_envelope(&self, envelope: &Envelope) -> Result<PublishReport> {
        if envelope.signature() != self.signature {
            self.stats.record_mismatch();
            log::error!(
                "Not publishing on {} channel: envelope signature {} expected {}",
                T::TYPE_NAME,
                envelope.signature(),
                self.signature
            );
            return Ok(PublishReport::default());
        }
        self.broadcast(envelope)
    }

    fn broadcast(&self, envelope: &Envelope) -> Result<PublishReport> {
        let frame = envelope.to_wire()?;
        let _guard = self.publish_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut report = PublishReport::default();
        let mut dead = Vec::new();
        for registration in self.registry.registrations() {
            let endpoint = registration.endpoint;
            match self.transport.send(endpoint, &frame) {
                Ok(()) => report.delivered += 1,
                Err(TransportError::PeerDead) => {
                    log::warn!("{} is dead, removing it from {}", endpoint, T::TYPE_NAME);
                    dead.push(registration);
                }
                Err(TransportError::Failed(reason)) => {
                    log::warn!("Failed to publish {} to {}: {}", T::TYPE_NAME, endpoint, reason);
                    report.failed += 1;
                }
            }
        }
        report.pruned = self.registry.prune(&dead);

        self.stats.record(&report);
        Ok(report)
    }

    /// Send one message to a single endpoint without a channel
    pub fn publish_to(
        transport: &dyn Transport,
        endpoint: EndpointId,
        message: &T,
    ) -> Result<()> {
        let frame = Envelope::from_message(message)?.to_wire()?;
        transport.send(endpoint, &frame)?;
        Ok(())
    }
}

impl<T: MessageCodec> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("type_name", &T::TYPE_NAME)
            .field("signature", &self.signature)
            .field("subscribers", &self.registry.len())
            .finish()
    }
}
