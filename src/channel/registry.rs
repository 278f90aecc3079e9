//! Deduplicated set of subscriber endpoints

use std::sync::{
    atomic::{AtomicU64, Ordering},
    RwLock,
};

use crate::transport::EndpointId;

/// One registration of an endpoint
///
/// Removing and re-adding the same endpoint yields a new registration, so a
/// stale copy taken before the re-add never matches the live entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub endpoint: EndpointId,
    generation: u64,
}

/// Endpoints a channel broadcasts to, in registration order
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    entries: RwLock<Vec<Registration>>,
    next_generation: AtomicU64,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint; returns `false` if it was already registered
    pub fn add(&self, endpoint: EndpointId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.iter().any(|entry| entry.endpoint == endpoint) {
            return false;
        }
        entries.push(Registration {
            endpoint,
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
        });
        true
    }

    /// Deregister an endpoint; returns `false` if it was not registered
    pub fn remove(&self, endpoint: EndpointId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|entry| entry.endpoint != endpoint);
        entries.len() != before
    }

    /// Drop registrations found dead, returning how many were still present
    ///
    /// An endpoint re-registered since `dead` was taken is left alone.
    pub fn prune(&self, dead: &[Registration]) -> usize {
        if dead.is_empty() {
            return 0;
        }
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|entry| !dead.contains(entry));
        before - entries.len()
    }

    pub fn contains(&self, endpoint: EndpointId) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.iter().any(|entry| entry.endpoint == endpoint)
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<EndpointId> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.iter().map(|entry| entry.endpoint).collect()
    }

    /// Copy of the current registrations, so delivery runs without the lock
    pub fn registrations(&self) -> Vec<Registration> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_is_idempotent() {
        let registry = EndpointRegistry::new();
        let id = EndpointId::next();

        assert!(registry.add(id));
        assert!(!registry.add(id));
        assert_eq!(registry.snapshot(), vec![id]);
    }

    #[test]
    fn test_remove_and_prune() {
        let registry = EndpointRegistry::new();
        let ids: Vec<_> = (0..4).map(|_| EndpointId::next()).collect();
        for id in &ids {
            registry.add(*id);
        }
        let registrations = registry.registrations();

        assert!(registry.remove(ids[0]));
        assert!(!registry.remove(ids[0]));
        assert_eq!(
            registry.prune(&[registrations[0], registrations[1], registrations[3]]),
            2
        );
        assert_eq!(registry.snapshot(), vec![ids[2]]);
    }

    #[test]
    fn test_prune_keeps_endpoint_registered_again() {
        let registry = EndpointRegistry::new();
        let id = EndpointId::next();
        registry.add(id);
        let stale = registry.registrations();

        // Another thread cycles the endpoint while a broadcast is in progress
        assert!(registry.remove(id));
        assert!(registry.add(id));

        assert_eq!(registry.prune(&stale), 0);
        assert!(registry.contains(id));
        assert_eq!(registry.len(), 1);
    }
}
