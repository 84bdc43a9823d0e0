//! Peer registry: the live sessions, keyed by node id.
//!
//! Owned by the probe engine and shared by handle with anything that needs
//! a diagnostic view. Cloning is cheap; every clone sees the same map.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

use crawl_core::NodeId;

use crate::peer::PeerSession;

#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    peers: Arc<DashMap<NodeId, Arc<PeerSession>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session. A second session with the same id is rejected and
    /// the existing one is left in place.
    pub fn register(&self, session: Arc<PeerSession>) -> Result<(), RegistryError> {
        match self.peers.entry(session.id) {
            Entry::Occupied(_) => Err(RegistryError::AlreadyRegistered(session.id)),
            Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(())
            }
        }
    }

    pub fn unregister(&self, id: &NodeId) -> Result<Arc<PeerSession>, RegistryError> {
        self.peers
            .remove(id)
            .map(|(_, session)| session)
            .ok_or(RegistryError::NotRegistered(*id))
    }

    pub fn lookup(&self, id: &NodeId) -> Option<Arc<PeerSession>> {
        self.peers.get(id).map(|r| Arc::clone(r.value()))
    }

    pub fn snapshot(&self) -> Vec<Arc<PeerSession>> {
        self.peers.iter().map(|r| Arc::clone(r.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("peer {} already registered", .0.short())]
    AlreadyRegistered(NodeId),

    #[error("peer {} not registered", .0.short())]
    NotRegistered(NodeId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawl_core::Node;

    fn session(key: u8) -> Arc<PeerSession> {
        let node = Node::new([key; 32], "127.0.0.1:5050".parse().unwrap());
        Arc::new(PeerSession::new(node, "opera", 63, false, true))
    }

    #[test]
    fn duplicate_register_rejected() {
        let registry = PeerRegistry::new();
        let first = session(1);
        registry.register(Arc::clone(&first)).unwrap();
        let err = registry.register(session(1)).unwrap_err();
        assert_eq!(err, RegistryError::AlreadyRegistered(first.id));
        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(&registry.lookup(&first.id).unwrap(), &first));
    }

    #[test]
    fn unregister_missing_is_error() {
        let registry = PeerRegistry::new();
        let s = session(2);
        assert_eq!(
            registry.unregister(&s.id).unwrap_err(),
            RegistryError::NotRegistered(s.id)
        );
        registry.register(Arc::clone(&s)).unwrap();
        assert!(registry.unregister(&s.id).is_ok());
        assert!(registry.is_empty());
    }

    #[test]
    fn concurrent_duplicate_registers_leave_one() {
        let registry = PeerRegistry::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.register(session(3)).is_ok())
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(wins, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn snapshot_lists_all() {
        let registry = PeerRegistry::new();
        for k in 0..5 {
            registry.register(session(k)).unwrap();
        }
        assert_eq!(registry.snapshot().len(), 5);
    }
}
