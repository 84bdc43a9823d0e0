//! Node descriptors and their URL form.
//!
//! ```text
//! enode://<64 hex pubkey>@<ip>:<port>[?query]
//! ```
//!
//! Bootstrap entries may omit the scheme; `normalize` adds it back before
//! parsing.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::NodeId;

pub const SCHEME: &str = "enode://";

/// A dialable node: public key, address and record sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "NodeJson", into = "NodeJson")]
pub struct Node {
    pub pubkey: [u8; 32],
    pub addr: SocketAddr,
    pub seq: u64,
}

impl Node {
    pub fn new(pubkey: [u8; 32], addr: SocketAddr) -> Self {
        Self {
            pubkey,
            addr,
            seq: 0,
        }
    }

    pub fn id(&self) -> NodeId {
        NodeId::from_pubkey(&self.pubkey)
    }

    pub fn url(&self) -> String {
        format!("{SCHEME}{}@{}", hex::encode(self.pubkey), self.addr)
    }

    /// Parse a full `enode://` URL.
    pub fn parse(url: &str) -> Result<Self, NodeUrlError> {
        let rest = url
            .strip_prefix(SCHEME)
            .ok_or_else(|| NodeUrlError::MissingScheme(url.to_string()))?;
        let rest = rest.split_once('?').map_or(rest, |(head, _)| head);
        let (id, addr) = rest
            .split_once('@')
            .ok_or_else(|| NodeUrlError::InvalidAddress(url.to_string()))?;

        let pubkey = hex::decode(id)
            .ok()
            .and_then(|b| <[u8; 32]>::try_from(b.as_slice()).ok())
            .ok_or_else(|| NodeUrlError::InvalidId(id.to_string()))?;
        let addr = addr
            .parse::<SocketAddr>()
            .map_err(|_| NodeUrlError::InvalidAddress(addr.to_string()))?;

        Ok(Self::new(pubkey, addr))
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

impl FromStr for Node {
    type Err = NodeUrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Add the `enode://` scheme if it is missing.
pub fn normalize(url: &str) -> String {
    let url = url.trim();
    if url.starts_with(SCHEME) {
        url.to_string()
    } else {
        format!("{SCHEME}{url}")
    }
}

/// Parse a configured bootstrap entry, scheme optional.
pub fn parse_bootnode(url: &str) -> Result<Node, NodeUrlError> {
    Node::parse(&normalize(url))
}

#[derive(Serialize, Deserialize)]
struct NodeJson {
    // id and pubkey are derived from the url; written for readers, ignored on load.
    #[serde(default, skip_deserializing)]
    id: String,
    #[serde(default, skip_deserializing)]
    pubkey: String,
    url: String,
    #[serde(default)]
    seq: u64,
}

impl TryFrom<NodeJson> for Node {
    type Error = NodeUrlError;

    fn try_from(value: NodeJson) -> Result<Self, Self::Error> {
        let mut node = Node::parse(&value.url)?;
        node.seq = value.seq;
        Ok(node)
    }
}

impl From<Node> for NodeJson {
    fn from(node: Node) -> Self {
        Self {
            id: node.id().to_string(),
            pubkey: hex::encode(node.pubkey),
            url: node.url(),
            seq: node.seq,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeUrlError {
    #[error("missing enode:// scheme: {0}")]
    MissingScheme(String),

    #[error("invalid node id {0:?}")]
    InvalidId(String),

    #[error("invalid node address {0:?}")]
    InvalidAddress(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pubkey_hex() -> String {
        "ab".repeat(32)
    }

    #[test]
    fn bootnode_without_scheme_is_normalized() {
        let raw = format!("{}@1.2.3.4:30303", pubkey_hex());
        assert_eq!(normalize(&raw), format!("enode://{raw}"));
        let node = parse_bootnode(&raw).unwrap();
        assert_eq!(node.pubkey, [0xab; 32]);
        assert_eq!(node.addr, "1.2.3.4:30303".parse().unwrap());
        assert_eq!(node.url(), format!("enode://{raw}"));
    }

    #[test]
    fn bootnode_with_invalid_id_fails() {
        let err = parse_bootnode("abc@1.2.3.4:30303").unwrap_err();
        assert_eq!(err, NodeUrlError::InvalidId("abc".into()));
    }

    #[test]
    fn missing_scheme_rejected_by_strict_parse() {
        let raw = format!("{}@1.2.3.4:30303", pubkey_hex());
        assert!(matches!(Node::parse(&raw), Err(NodeUrlError::MissingScheme(_))));
    }

    #[test]
    fn query_is_ignored() {
        let url = format!("enode://{}@10.0.0.1:5050?discport=5051", pubkey_hex());
        let node = Node::parse(&url).unwrap();
        assert_eq!(node.addr.port(), 5050);
    }

    #[test]
    fn bad_address_rejected() {
        let url = format!("enode://{}@nowhere", pubkey_hex());
        assert!(matches!(
            Node::parse(&url),
            Err(NodeUrlError::InvalidAddress(_))
        ));
    }

    #[test]
    fn json_form_carries_url_and_seq() {
        let mut node = parse_bootnode(&format!("{}@1.2.3.4:30303", pubkey_hex())).unwrap();
        node.seq = 9;
        let json = serde_json::to_value(node).unwrap();
        assert_eq!(json["seq"], 9);
        assert_eq!(json["url"], node.url());
        assert_eq!(json["id"], node.id().to_string());
        let back: Node = serde_json::from_value(json).unwrap();
        assert_eq!(back, node);
    }
}
