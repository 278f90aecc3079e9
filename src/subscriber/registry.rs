//! Registry of running subscribers

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, RwLock, Weak},
};

use crate::{dispatch::DispatchStatsSnapshot, transport::EndpointId};

pub(crate) type RegistryEntries = RwLock<HashMap<EndpointId, Arc<dyn ActiveSubscriber>>>;

/// Description of one running subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberInfo {
    pub endpoint: EndpointId,
    pub name: Option<String>,
    pub type_name: &'static str,
    /// Items waiting in the dispatch queue
    pub stacked: usize,
    pub stats: DispatchStatsSnapshot,
}

/// A subscriber the registry can describe and stop
pub trait ActiveSubscriber: Send + Sync {
    fn info(&self) -> SubscriberInfo;

    /// Stop the subscriber, returning the number of drained items
    fn stop(&self) -> usize;
}

/// Explicit set of active subscribers
///
/// Owned by whatever composes the process (or test). Subscribers add
/// themselves when spawned and remove themselves when stopped. Cheap to clone.
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    entries: Arc<RegistryEntries>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, endpoint: EndpointId, subscriber: Arc<dyn ActiveSubscriber>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(endpoint, subscriber);
    }

    pub(crate) fn downgrade(&self) -> Weak<RegistryEntries> {
        Arc::downgrade(&self.entries)
    }

    pub fn contains(&self, endpoint: EndpointId) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.contains_key(&endpoint)
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Describe every active subscriber, ordered by endpoint id
    pub fn active(&self) -> Vec<SubscriberInfo> {
        let mut infos: Vec<_> = self.snapshot().iter().map(|s| s.info()).collect();
        infos.sort_by_key(|info| info.endpoint);
        infos
    }

    /// Stop every active subscriber, returning how many were stopped
    pub fn stop_all(&self) -> usize {
        let subscribers = self.snapshot();
        for subscriber in &subscribers {
            subscriber.stop();
        }
        subscribers.len()
    }

    fn snapshot(&self) -> Vec<Arc<dyn ActiveSubscriber>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.values().cloned().collect()
    }
}

/// Remove `endpoint` from the registry behind `entries`, if it still exists
pub(crate) fn deregister(entries: &Weak<RegistryEntries>, endpoint: EndpointId) {
    if let Some(entries) = entries.upgrade() {
        let mut entries = entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(&endpoint);
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("active", &self.len())
            .finish()
    }
}
