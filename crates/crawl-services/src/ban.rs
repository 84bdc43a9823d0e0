//! Discovery ban list.
//!
//! Answers the usefulness pre-filter: a banned peer is disconnected before
//! the status exchange unless it is trusted. Entries may expire.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crawl_core::{enode, NodeId};

#[derive(Debug, Clone, Default)]
pub struct BanList {
    /// None = permanent.
    entries: Arc<DashMap<NodeId, Option<Instant>>>,
}

impl BanList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load static entries from config. Each entry is a hex node id or a
    /// node URL. Unparseable entries are logged and skipped.
    pub fn apply_config(&self, banned: &[String]) {
        for entry in banned {
            let id = entry
                .parse::<NodeId>()
                .ok()
                .or_else(|| enode::parse_bootnode(entry).ok().map(|n| n.id()));
            match id {
                Some(id) => {
                    self.entries.insert(id, None);
                    tracing::info!(peer = %id.short(), "banned node from config");
                }
                None => tracing::warn!(entry = %entry, "ignoring malformed ban entry"),
            }
        }
    }

    pub fn ban(&self, id: NodeId, ttl: Option<Duration>) {
        self.entries.insert(id, ttl.map(|t| Instant::now() + t));
    }

    pub fn unban(&self, id: &NodeId) {
        self.entries.remove(id);
    }

    pub fn banned(&self, id: &NodeId) -> bool {
        let expired = match self.entries.get(id) {
            None => return false,
            Some(entry) => matches!(*entry.value(), Some(until) if until <= Instant::now()),
        };
        if expired {
            self.entries.remove(id);
            return false;
        }
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_accepts_ids_and_urls() {
        let bans = BanList::new();
        let by_id = NodeId([5; 32]);
        let node = enode::Node::new([6; 32], "1.2.3.4:5050".parse().unwrap());
        bans.apply_config(&[
            by_id.to_string(),
            format!("{}@1.2.3.4:5050", hex::encode([6u8; 32])),
            "garbage".into(),
        ]);
        assert_eq!(bans.len(), 2);
        assert!(bans.banned(&by_id));
        assert!(bans.banned(&node.id()));
    }

    #[test]
    fn expired_entries_lapse() {
        let bans = BanList::new();
        let id = NodeId([1; 32]);
        bans.ban(id, Some(Duration::ZERO));
        assert!(!bans.banned(&id));
        assert!(bans.is_empty());

        bans.ban(id, Some(Duration::from_secs(3600)));
        assert!(bans.banned(&id));
        bans.unban(&id);
        assert!(!bans.banned(&id));
    }
}
