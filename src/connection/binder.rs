//! Remote bind primitive consumed by the connection manager

use std::{
    sync::{Arc, Weak},
    thread::ThreadId,
};

use super::error::ConnectionError;

/// Receiver of bind outcomes and disconnect notifications
pub trait EventSink<H>: Send + Sync {
    fn connected(&self, handle: H);
    fn disconnected(&self);
    fn failed(&self, reason: String);
}

/// Callback channel handed to [`Binder::bind`]
///
/// Holds the manager weakly: events arriving after the manager is gone are
/// ignored.
pub struct BindEvents<H> {
    sink: Weak<dyn EventSink<H>>,
}

impl<H> BindEvents<H> {
    pub fn new(sink: Weak<dyn EventSink<H>>) -> Self {
        Self { sink }
    }

    /// The peer answered with `handle`
    pub fn connected(&self, handle: H) {
        if let Some(sink) = self.sink.upgrade() {
            sink.connected(handle);
        }
    }

    /// The peer went away
    pub fn disconnected(&self) {
        if let Some(sink) = self.sink.upgrade() {
            sink.disconnected();
        }
    }

    /// The bind could not be completed
    pub fn failed(&self, reason: impl Into<String>) {
        if let Some(sink) = self.sink.upgrade() {
            sink.failed(reason.into());
        }
    }

    /// Whether the receiving manager was dropped
    pub fn is_closed(&self) -> bool {
        self.sink.strong_count() == 0
    }
}

impl<H> Clone for BindEvents<H> {
    fn clone(&self) -> Self {
        Self {
            sink: Weak::clone(&self.sink),
        }
    }
}

/// Unreliable asynchronous connect primitive
///
/// `bind` only issues the request. The outcome arrives later through
/// `events`, possibly on another thread, possibly before `bind` returns, or
/// never. After a successful connection the same `events` also reports
/// disconnects, and the binder may report `connected` again on its own when
/// the peer comes back.
pub trait Binder: Send + Sync + 'static {
    /// Client handle to the remote peer
    type Handle: Clone + Send + Sync + 'static;

    /// Request a connection to `target`
    fn bind(&self, target: &str, events: BindEvents<Self::Handle>) -> Result<(), ConnectionError>;

    /// Drop the connection to `target`
    fn unbind(&self, target: &str);

    /// Whether a handle still reaches a live peer
    fn is_alive(&self, handle: &Self::Handle) -> bool;

    /// Thread on which events are delivered, if fixed
    ///
    /// Blocking binds from this thread fail with `WouldDeadlock`.
    fn event_thread(&self) -> Option<ThreadId> {
        None
    }
}

impl<B: Binder> Binder for Arc<B> {
    type Handle = B::Handle;

    fn bind(&self, target: &str, events: BindEvents<Self::Handle>) -> Result<(), ConnectionError> {
        (**self).bind(target, events)
    }

    fn unbind(&self, target: &str) {
        (**self).unbind(target)
    }

    fn is_alive(&self, handle: &Self::Handle) -> bool {
        (**self).is_alive(handle)
    }

    fn event_thread(&self) -> Option<ThreadId> {
        (**self).event_thread()
    }
}
