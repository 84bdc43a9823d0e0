//! Node catalogue: the crawler's running view of the network.
//!
//! A `NodeSet` is seeded from a previously written catalogue and then
//! folded over probe results. It has a single owner, the crawler's
//! aggregation loop; readers get clones.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crawl_core::{EventHash, Node, NodeId};

use crate::peer::PeerStatus;

/// What a probe learned about a peer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientInfo {
    pub client_name: String,
    pub capabilities: Vec<String>,
    pub network_id: u64,
    pub classification: PeerStatus,
    pub epoch: u32,
    /// Reported last block index, as a decimal string.
    pub blockheight: String,
    pub head_hash: EventHash,
}

/// One catalogue entry. Timestamps are unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub record: Node,
    #[serde(default)]
    pub score: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_response: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_response: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_check: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<ClientInfo>,
}

impl NodeRecord {
    pub fn new(record: Node) -> Self {
        Self {
            record,
            score: 0,
            first_response: None,
            last_response: None,
            last_check: None,
            info: None,
        }
    }

    pub fn with_info(mut self, info: ClientInfo) -> Self {
        self.info = Some(info);
        self
    }

    pub fn id(&self) -> NodeId {
        self.record.id()
    }
}

/// Outcome of merging one record into the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    /// First successful response from this node.
    Added,
    Updated,
    /// Failed with no score to lose; left out of the set.
    SkipIncompatible,
    /// Score dropped to zero; removed from the set.
    Removed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeSet {
    nodes: HashMap<NodeId, NodeRecord>,
}

impl NodeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &NodeId) -> Option<&NodeRecord> {
        self.nodes.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &NodeRecord)> {
        self.nodes.iter()
    }

    /// The node descriptors, for seeding the dialer.
    pub fn nodes(&self) -> Vec<Node> {
        self.nodes.values().map(|r| r.record).collect()
    }

    /// Insert or replace a record as-is.
    pub fn insert(&mut self, record: NodeRecord) {
        self.nodes.insert(record.id(), record);
    }

    /// Merge a probe result. `error` is the validation failure for this
    /// check, if any; `now` is unix seconds.
    pub fn update(&mut self, incoming: NodeRecord, error: Option<&str>, now: u64) -> UpdateStatus {
        let id = incoming.id();
        let mut node = self
            .nodes
            .get(&id)
            .cloned()
            .unwrap_or_else(|| NodeRecord::new(incoming.record));

        let mut status = UpdateStatus::Updated;
        node.last_check = Some(now);
        match error {
            Some(e) => {
                if node.score == 0 {
                    tracing::debug!(peer = %id.short(), error = %e, "skipping incompatible node");
                    return UpdateStatus::SkipIncompatible;
                }
                node.score /= 2;
            }
            None => {
                if incoming.record.seq >= node.record.seq {
                    node.record = incoming.record;
                }
                node.score += 1;
                if node.first_response.is_none() {
                    node.first_response = Some(now);
                    status = UpdateStatus::Added;
                }
                node.last_response = Some(now);
            }
        }
        if incoming.info.is_some() {
            node.info = incoming.info;
        }

        if node.score <= 0 {
            self.nodes.remove(&id);
            return UpdateStatus::Removed;
        }
        self.nodes.insert(id, node);
        status
    }

    /// Read a catalogue written by `write_json`. A missing file is an empty set.
    pub fn load_json(path: &Path) -> Result<Self, CatalogueError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| CatalogueError::Io(path.display().to_string(), e))?;
        serde_json::from_str(&text).map_err(|e| CatalogueError::Json(path.display().to_string(), e))
    }

    /// Write the catalogue, replacing the file atomically.
    pub fn write_json(&self, path: &Path) -> Result<(), CatalogueError> {
        let io_err = |e| CatalogueError::Io(path.display().to_string(), e);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| CatalogueError::Json(path.display().to_string(), e))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, text).map_err(io_err)?;
        std::fs::rename(&tmp, path).map_err(io_err)
    }
}

impl FromIterator<NodeRecord> for NodeSet {
    fn from_iter<I: IntoIterator<Item = NodeRecord>>(iter: I) -> Self {
        let mut set = Self::new();
        for record in iter {
            set.insert(record);
        }
        set
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogueError {
    #[error("catalogue {0}: {1}")]
    Io(String, std::io::Error),
    #[error("catalogue {0}: {1}")]
    Json(String, serde_json::Error),
}
