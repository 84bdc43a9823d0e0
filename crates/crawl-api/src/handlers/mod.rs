//! HTTP API handlers: engine and catalogue state as JSON.

pub mod nodes;
pub mod peers;
pub mod status;

use std::sync::Arc;

use axum::http::StatusCode;
use parking_lot::RwLock;

use crawl_core::NodeId;
use crawl_p2p::ProbeEngine;
use crawl_services::NodeSet;

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<ProbeEngine>,
    /// Last catalogue handed to the crawler's update callback.
    pub latest: Arc<RwLock<NodeSet>>,
}

impl ApiState {
    pub fn new(engine: Arc<ProbeEngine>) -> Self {
        Self {
            engine,
            latest: Arc::new(RwLock::new(NodeSet::new())),
        }
    }

    /// Replace the published catalogue.
    pub fn publish(&self, nodes: &NodeSet) {
        *self.latest.write() = nodes.clone();
    }
}

/// Parse a hex-encoded node id.
fn parse_node_id(s: &str) -> Result<NodeId, (StatusCode, String)> {
    s.parse::<NodeId>()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))
}

pub use nodes::handle_nodes;
pub use peers::{handle_peer, handle_peers};
pub use status::handle_status;
