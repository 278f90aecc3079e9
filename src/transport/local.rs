//! In-process transport

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, RwLock},
};

use crate::{buffers::BufferView, completion::CompletionHandle};

use super::{EndpointId, Inbox, Transport, TransportError};

/// Transport delivering frames to inboxes living in this process
///
/// Attached inboxes are held strongly, so a subscriber keeps receiving after
/// its creator drops the handle. Once an inbox reports `PeerDead` it is
/// detached.
#[derive(Default)]
pub struct LocalTransport {
    inboxes: RwLock<HashMap<EndpointId, Arc<dyn Inbox>>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make an inbox reachable, returning its endpoint id
    pub fn attach(&self, inbox: Arc<dyn Inbox>) -> EndpointId {
        let id = inbox.endpoint_id();
        let mut inboxes = self.inboxes.write().unwrap_or_else(|e| e.into_inner());
        inboxes.insert(id, inbox);
        id
    }

    /// Forget an inbox; later sends to it report `PeerDead`
    pub fn detach(&self, endpoint: EndpointId) -> bool {
        let mut inboxes = self.inboxes.write().unwrap_or_else(|e| e.into_inner());
        inboxes.remove(&endpoint).is_some()
    }

    pub fn is_attached(&self, endpoint: EndpointId) -> bool {
        let inboxes = self.inboxes.read().unwrap_or_else(|e| e.into_inner());
        inboxes.contains_key(&endpoint)
    }

    pub fn endpoint_count(&self) -> usize {
        let inboxes = self.inboxes.read().unwrap_or_else(|e| e.into_inner());
        inboxes.len()
    }

    fn with_inbox<F>(&self, endpoint: EndpointId, deliver: F) -> Result<(), TransportError>
    where
        F: FnOnce(&dyn Inbox) -> Result<(), TransportError>,
    {
        let inbox = {
            let inboxes = self.inboxes.read().unwrap_or_else(|e| e.into_inner());
            inboxes.get(&endpoint).cloned()
        };
        let Some(inbox) = inbox else {
            return Err(TransportError::PeerDead);
        };

        let result = deliver(inbox.as_ref());
        if matches!(result, Err(TransportError::PeerDead)) {
            self.detach(endpoint);
        }
        result
    }
}

impl Transport for LocalTransport {
    fn send(&self, endpoint: EndpointId, frame: &[u8]) -> Result<(), TransportError> {
        self.with_inbox(endpoint, |inbox| inbox.deliver(frame))
    }

    fn send_shared(
        &self,
        endpoint: EndpointId,
        frame: &[u8],
        buffer: &BufferView,
        completion: CompletionHandle,
    ) -> Result<(), TransportError> {
        self.with_inbox(endpoint, |inbox| {
            inbox.deliver_shared(frame, buffer.clone(), completion)
        })
    }
}

impl fmt::Debug for LocalTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTransport")
            .field("endpoints", &self.endpoint_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    };

    struct RecordingInbox {
        id: EndpointId,
        alive: AtomicBool,
        frames: Mutex<Vec<Vec<u8>>>,
    }

    impl RecordingInbox {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                id: EndpointId::next(),
                alive: AtomicBool::new(true),
                frames: Mutex::new(Vec::new()),
            })
        }
    }

    impl Inbox for RecordingInbox {
        fn endpoint_id(&self) -> EndpointId {
            self.id
        }

        fn deliver(&self, frame: &[u8]) -> Result<(), TransportError> {
            if !self.alive.load(Ordering::SeqCst) {
                return Err(TransportError::PeerDead);
            }
            self.frames.lock().unwrap().push(frame.to_vec());
            Ok(())
        }
    }

    #[test]
    fn test_send_reaches_attached_inbox() {
        let transport = LocalTransport::new();
        let inbox = RecordingInbox::new();
        let id = transport.attach(inbox.clone());

        transport.send(id, &[1, 2, 3]).unwrap();
        assert_eq!(*inbox.frames.lock().unwrap(), vec![vec![1, 2, 3]]);
    }

    #[test]
    fn test_unknown_endpoint_is_dead() {
        let transport = LocalTransport::new();
        assert_eq!(
            transport.send(EndpointId::next(), &[0]),
            Err(TransportError::PeerDead)
        );
    }

    #[test]
    fn test_dead_inbox_is_detached() {
        let transport = LocalTransport::new();
        let inbox = RecordingInbox::new();
        let id = transport.attach(inbox.clone());

        inbox.alive.store(false, Ordering::SeqCst);
        assert_eq!(transport.send(id, &[0]), Err(TransportError::PeerDead));
        assert!(!transport.is_attached(id));
        assert_eq!(transport.endpoint_count(), 0);
    }

    #[test]
    fn test_shared_delivery_unsupported_by_default() {
        let transport = LocalTransport::new();
        let inbox = RecordingInbox::new();
        let id = transport.attach(inbox);

        let region = Arc::new(crate::memory::HeapRegion::new(8).unwrap());
        let view = crate::buffers::SharedBuffer::new(
            crate::buffers::BufferId::from_raw(1),
            region,
        )
        .view();
        let tracker = crate::completion::CompletionTracker::default();
        let handles = tracker.track(view.id(), 1, |_, _| {}).unwrap();

        let result = transport.send_shared(id, &[0], &view, handles[0].clone());
        assert!(matches!(result, Err(TransportError::Failed(_))));
        assert!(transport.is_attached(id));
        handles[0].done();
    }
}
