//! Peer sessions: one per established connection.
//!
//! The message stream itself is owned by the session's handler task. What
//! lives here is the state the rest of the system may look at: identity,
//! negotiated version, classification and last reported progress.

use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crawl_core::{Node, NodeId, PeerProgress};

/// Classification of a peer.
///
/// `Unknown → Fetching → {Useless | Evil}`. The last two are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    #[default]
    Unknown,
    Fetching,
    Useless,
    Evil,
}

impl PeerStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Useless | Self::Evil)
    }
}

#[derive(Debug, Default)]
struct SessionState {
    status: PeerStatus,
    progress: PeerProgress,
}

/// A live session as tracked by the registry.
#[derive(Debug)]
pub struct PeerSession {
    pub id: NodeId,
    pub node: Node,
    /// Client name from the transport hello.
    pub name: String,
    /// Negotiated protocol version.
    pub version: u32,
    pub trusted: bool,
    pub inbound: bool,
    pub connected_at: Instant,
    state: Mutex<SessionState>,
}

impl PeerSession {
    pub fn new(node: Node, name: impl Into<String>, version: u32, trusted: bool, inbound: bool) -> Self {
        Self {
            id: node.id(),
            node,
            name: name.into(),
            version,
            trusted,
            inbound,
            connected_at: Instant::now(),
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn status(&self) -> PeerStatus {
        self.state.lock().status
    }

    pub fn progress(&self) -> PeerProgress {
        self.state.lock().progress
    }

    pub fn set_progress(&self, progress: PeerProgress) {
        self.state.lock().progress = progress;
    }

    /// Move to `status`. Returns false, leaving the session untouched, if a
    /// terminal status was already assigned.
    pub fn set_status(&self, status: PeerStatus) -> bool {
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            return false;
        }
        state.status = status;
        true
    }

    pub fn info(&self) -> PeerInfo {
        let state = self.state.lock();
        PeerInfo {
            id: self.id,
            url: self.node.url(),
            name: self.name.clone(),
            version: self.version,
            status: state.status,
            progress: state.progress,
            trusted: self.trusted,
            inbound: self.inbound,
            connected_secs: self.connected_at.elapsed().as_secs(),
        }
    }
}

/// Diagnostic view of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: NodeId,
    pub url: String,
    pub name: String,
    pub version: u32,
    pub status: PeerStatus,
    pub progress: PeerProgress,
    pub trusted: bool,
    pub inbound: bool,
    pub connected_secs: u64,
}
