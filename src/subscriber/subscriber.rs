//! Typed subscriber endpoint

use std::{
    fmt,
    marker::PhantomData,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, Weak,
    },
};

use crate::{
    channel::channel::check_type_name,
    dispatch::{DispatchHandler, DispatchQueue, DispatchStatsSnapshot, Enqueued},
    envelope::{Envelope, MessageCodec, Origin},
    error::Result,
    transport::{EndpointId, Inbox, TransportError},
};

use super::{
    config::SubscriberConfig,
    registry::{deregister, ActiveSubscriber, RegistryEntries, SubscriberInfo, SubscriberRegistry},
};

/// Checks envelopes and hands decoded messages to the user callback
struct EnvelopeHandler<T, F> {
    label: String,
    callback: Mutex<F>,
    mismatched: Arc<AtomicU64>,
    _marker: PhantomData<fn(T)>,
}

impl<T, F> DispatchHandler<Envelope> for EnvelopeHandler<T, F>
where
    T: MessageCodec,
    F: FnMut(T) + Send + 'static,
{
    fn on_item(&self, envelope: Envelope) {
        if !envelope.is::<T>() {
            self.mismatched.fetch_add(1, Ordering::Relaxed);
            log::error!(
                "Message not dispatched by {}: signature {} does not match {} ({})",
                self.label,
                envelope.signature(),
                T::type_signature(),
                T::TYPE_NAME
            );
            return;
        }

        match envelope.decode::<T>() {
            Ok(message) => {
                let mut callback = self.callback.lock().unwrap_or_else(|e| e.into_inner());
                (*callback)(message);
            }
            Err(e) => log::error!("{} failed to decode {}: {}", self.label, T::TYPE_NAME, e),
        }
    }
}

struct SubscriberInner<T: MessageCodec> {
    endpoint: EndpointId,
    config: SubscriberConfig,
    queue: DispatchQueue<Envelope>,
    mismatched: Arc<AtomicU64>,
    registry: Weak<RegistryEntries>,
    _marker: PhantomData<fn(T)>,
}

impl<T: MessageCodec> SubscriberInner<T> {
    fn shutdown(&self) -> usize {
        let drained = self.queue.stop();
        deregister(&self.registry, self.endpoint);
        drained
    }
}

impl<T: MessageCodec> Inbox for SubscriberInner<T> {
    fn endpoint_id(&self) -> EndpointId {
        self.endpoint
    }

    fn deliver(&self, frame: &[u8]) -> std::result::Result<(), TransportError> {
        if !self.queue.is_running() {
            return Err(TransportError::PeerDead);
        }
        let envelope =
            Envelope::from_wire(frame).map_err(|e| TransportError::Failed(e.to_string()))?;
        match self.queue.enqueue(envelope) {
            Enqueued::Rejected => Err(TransportError::PeerDead),
            _ => Ok(()),
        }
    }
}

impl<T: MessageCodec> ActiveSubscriber for SubscriberInner<T> {
    fn info(&self) -> SubscriberInfo {
        SubscriberInfo {
            endpoint: self.endpoint,
            name: self.config.name.clone(),
            type_name: T::TYPE_NAME,
            stacked: self.queue.len(),
            stats: self.queue.stats().snapshot(),
        }
    }

    fn stop(&self) -> usize {
        self.shutdown()
    }
}

/// Receiving endpoint for messages of type `T`
///
/// Owns one dispatch queue and its consumer thread. The endpoint keeps running
/// after every handle is dropped, as long as a transport or the registry
/// still references it; it ends only through [`stop`](Self::stop) or
/// [`SubscriberRegistry::stop_all`].
pub struct Subscriber<T: MessageCodec> {
    inner: Arc<SubscriberInner<T>>,
}

impl<T: MessageCodec> Subscriber<T> {
    /// Start a subscriber calling `handler` for every message, in order
    pub fn spawn<F>(
        config: SubscriberConfig,
        registry: &SubscriberRegistry,
        handler: F,
    ) -> Result<Self>
    where
        F: FnMut(T) + Send + 'static,
    {
        config.validate()?;
        check_type_name::<T>()?;

        let mismatched = Arc::new(AtomicU64::new(0));
        let label = config.label(T::TYPE_NAME);
        let handler: Arc<dyn DispatchHandler<Envelope>> = Arc::new(EnvelopeHandler {
            label,
            callback: Mutex::new(handler),
            mismatched: Arc::clone(&mismatched),
            _marker: PhantomData::<fn(T)>,
        });
        let queue =
            DispatchQueue::spawn(config.name.clone(), T::TYPE_NAME, config.queue_capacity, handler)?;

        let inner = Arc::new(SubscriberInner {
            endpoint: EndpointId::next(),
            config,
            queue,
            mismatched,
            registry: registry.downgrade(),
            _marker: PhantomData,
        });
        registry.register(inner.endpoint, Arc::clone(&inner) as Arc<dyn ActiveSubscriber>);
        log::debug!("Started {} on {}", inner.config.label(T::TYPE_NAME), inner.endpoint);

        Ok(Self { inner })
    }

    pub fn endpoint_id(&self) -> EndpointId {
        self.inner.endpoint
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.config.name.as_deref()
    }

    /// Receiving side to attach to a transport
    pub fn inbox(&self) -> Arc<dyn Inbox> {
        Arc::clone(&self.inner) as Arc<dyn Inbox>
    }

    /// Queue an envelope built in this process
    ///
    /// A locally constructed envelope is copied as if it had crossed a process
    /// boundary, so the caller keeps its own instance.
    pub fn accept(&self, envelope: &Envelope) -> Result<Enqueued> {
        let copy = match envelope.origin() {
            Origin::Local => envelope.to_transported()?,
            Origin::Transported => envelope.clone(),
        };
        Ok(self.inner.queue.enqueue(copy))
    }

    /// Messages waiting in the queue
    pub fn stacked_messages(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn queue_capacity(&self) -> usize {
        self.inner.queue.capacity()
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.inner.queue.stats().snapshot()
    }

    /// Envelopes dropped because they carried another type
    pub fn mismatched(&self) -> u64 {
        self.inner.mismatched.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.inner.queue.is_running()
    }

    /// Stop the consumer thread, drop what is still queued and deregister
    pub fn stop(&self) -> usize {
        self.inner.shutdown()
    }
}

impl<T: MessageCodec> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: MessageCodec> fmt::Debug for Subscriber<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("endpoint", &self.inner.endpoint)
            .field("type_name", &T::TYPE_NAME)
            .field("queue", &self.inner.queue)
            .finish()
    }
}
