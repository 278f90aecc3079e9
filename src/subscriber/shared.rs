//! Subscriber endpoint for shared-buffer frames

use std::{
    fmt,
    marker::PhantomData,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, Weak,
    },
};

use crate::{
    buffers::BufferView,
    channel::{channel::check_type_name, BufferDescriptor},
    completion::CompletionHandle,
    dispatch::{DispatchHandler, DispatchQueue, DispatchStatsSnapshot, Enqueued},
    envelope::{Envelope, MessageCodec},
    error::Result,
    transport::{EndpointId, Inbox, TransportError},
};

use super::{
    config::SubscriberConfig,
    registry::{deregister, ActiveSubscriber, RegistryEntries, SubscriberInfo, SubscriberRegistry},
};

/// A frame as it sits in the queue, before the header is decoded
struct PendingFrame {
    envelope: Envelope,
    buffer: BufferView,
    completion: CompletionHandle,
}

/// One received shared buffer with its decoded header
///
/// The buffer stays valid until [`done`](Self::done) is called. Frames that
/// are never acknowledged keep their buffer out of the pool until the
/// publisher's completion timeout.
#[derive(Debug)]
pub struct SharedFrame<T> {
    header: T,
    buffer: BufferView,
    completion: CompletionHandle,
}

impl<T> SharedFrame<T> {
    pub fn header(&self) -> &T {
        &self.header
    }

    pub fn buffer(&self) -> &BufferView {
        &self.buffer
    }

    /// Completion handle, for acknowledging from another thread later
    pub fn completion(&self) -> &CompletionHandle {
        &self.completion
    }

    /// Acknowledge the buffer
    pub fn done(self) {
        self.completion.done();
    }

    pub fn into_parts(self) -> (T, BufferView, CompletionHandle) {
        (self.header, self.buffer, self.completion)
    }
}

struct FrameHandler<T, F> {
    label: String,
    callback: Mutex<F>,
    mismatched: Arc<AtomicU64>,
    _marker: PhantomData<fn(T)>,
}

impl<T: MessageCodec, F> FrameHandler<T, F> {
    fn decode(&self, pending: &PendingFrame) -> Option<T> {
        if !pending.envelope.is::<T>() {
            self.mismatched.fetch_add(1, Ordering::Relaxed);
            log::error!(
                "Buffer not dispatched by {}: signature {} does not match {} ({})",
                self.label,
                pending.envelope.signature(),
                T::type_signature(),
                T::TYPE_NAME
            );
            return None;
        }

        let descriptor = match BufferDescriptor::decode(pending.envelope.payload()) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                log::error!("{} got a bad buffer descriptor: {}", self.label, e);
                return None;
            }
        };
        if descriptor.buffer_id != pending.buffer.id() {
            log::error!(
                "{} got descriptor for buffer {} with buffer {}",
                self.label,
                descriptor.buffer_id,
                pending.buffer.id()
            );
            return None;
        }

        match T::decode(&descriptor.header) {
            Ok(header) => Some(header),
            Err(e) => {
                log::error!("{} failed to decode {}: {}", self.label, T::TYPE_NAME, e);
                None
            }
        }
    }
}

impl<T, F> DispatchHandler<PendingFrame> for FrameHandler<T, F>
where
    T: MessageCodec,
    F: FnMut(SharedFrame<T>) + Send + 'static,
{
    fn on_item(&self, pending: PendingFrame) {
        let Some(header) = self.decode(&pending) else {
            pending.completion.done();
            return;
        };

        let frame = SharedFrame {
            header,
            buffer: pending.buffer,
            completion: pending.completion,
        };
        let mut callback = self.callback.lock().unwrap_or_else(|e| e.into_inner());
        (*callback)(frame);
    }

    fn on_discarded(&self, pending: PendingFrame) {
        pending.completion.done();
    }

    fn on_drained(&self, remaining: Vec<PendingFrame>) {
        for pending in remaining {
            pending.completion.done();
        }
    }
}

struct SharedInner<T: MessageCodec> {
    endpoint: EndpointId,
    config: SubscriberConfig,
    queue: DispatchQueue<PendingFrame>,
    mismatched: Arc<AtomicU64>,
    registry: Weak<RegistryEntries>,
    _marker: PhantomData<fn(T)>,
}

impl<T: MessageCodec> SharedInner<T> {
    fn shutdown(&self) -> usize {
        let drained = self.queue.stop();
        deregister(&self.registry, self.endpoint);
        drained
    }
}

impl<T: MessageCodec> Inbox for SharedInner<T> {
    fn endpoint_id(&self) -> EndpointId {
        self.endpoint
    }

    fn deliver(&self, _frame: &[u8]) -> std::result::Result<(), TransportError> {
        Err(TransportError::Failed(format!(
            "{} only accepts shared buffers",
            self.endpoint
        )))
    }

    fn deliver_shared(
        &self,
        frame: &[u8],
        buffer: BufferView,
        completion: CompletionHandle,
    ) -> std::result::Result<(), TransportError> {
        if !self.queue.is_running() {
            return Err(TransportError::PeerDead);
        }
        let envelope =
            Envelope::from_wire(frame).map_err(|e| TransportError::Failed(e.to_string()))?;
        let pending = PendingFrame {
            envelope,
            buffer,
            completion,
        };
        match self.queue.enqueue(pending) {
            Enqueued::Rejected => Err(TransportError::PeerDead),
            _ => Ok(()),
        }
    }
}

impl<T: MessageCodec> ActiveSubscriber for SharedInner<T> {
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

/// Receiving endpoint for shared buffers published with a `T` header
///
/// Frames evicted from the queue or left in it on stop are acknowledged
/// automatically. Frames handed to the handler must be acknowledged by it.
pub struct SharedBufferSubscriber<T: MessageCodec> {
    inner: Arc<SharedInner<T>>,
}

impl<T: MessageCodec> SharedBufferSubscriber<T> {
    /// Start a subscriber calling `handler` for every frame
    ///
    /// Use [`SubscriberConfig::shared_buffer`] for the usual latest-frame-only
    /// queue.
    pub fn spawn<F>(
        config: SubscriberConfig,
        registry: &SubscriberRegistry,
        handler: F,
    ) -> Result<Self>
    where
        F: FnMut(SharedFrame<T>) + Send + 'static,
    {
        config.validate()?;
        check_type_name::<T>()?;

        let mismatched = Arc::new(AtomicU64::new(0));
        let handler: Arc<dyn DispatchHandler<PendingFrame>> = Arc::new(FrameHandler {
            label: config.label(T::TYPE_NAME),
            callback: Mutex::new(handler),
            mismatched: Arc::clone(&mismatched),
            _marker: PhantomData::<fn(T)>,
        });
        let queue =
            DispatchQueue::spawn(config.name.clone(), T::TYPE_NAME, config.queue_capacity, handler)?;

        let inner = Arc::new(SharedInner {
            endpoint: EndpointId::next(),
            config,
            queue,
            mismatched,
            registry: registry.downgrade(),
            _marker: PhantomData,
        });
        registry.register(inner.endpoint, Arc::clone(&inner) as Arc<dyn ActiveSubscriber>);

        Ok(Self { inner })
    }

    pub fn endpoint_id(&self) -> EndpointId {
        self.inner.endpoint
    }

    pub fn inbox(&self) -> Arc<dyn Inbox> {
        Arc::clone(&self.inner) as Arc<dyn Inbox>
    }

    pub fn stacked_messages(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.inner.queue.stats().snapshot()
    }

    pub fn mismatched(&self) -> u64 {
        self.inner.mismatched.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.inner.queue.is_running()
    }

    /// Stop the consumer thread, acknowledge queued frames and deregister
    pub fn stop(&self) -> usize {
        self.inner.shutdown()
    }
}

impl<T: MessageCodec> Clone for SharedBufferSubscriber<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: MessageCodec> fmt::Debug for SharedBufferSubscriber<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBufferSubscriber")
            .field("endpoint", &self.inner.endpoint)
            .field("type_name", &T::TYPE_NAME)
            .field("queue", &self.inner.queue)
            .finish()
    }
}
