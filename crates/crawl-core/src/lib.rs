//! crawl-core: shared types, wire format, and chain identity for the crawler.
//! All other crawler crates depend on this one.

pub mod config;
pub mod crypto;
pub mod enode;
pub mod forkid;
pub mod genesis;
pub mod hash;
pub mod message;
pub mod wire;

pub use crypto::{NodeId, NodeKey};
pub use enode::Node;
pub use hash::{EventHash, Hash};
pub use message::{ErrorCode, Message, MessageCode, PeerProgress, ProtocolError, Status};
pub use wire::Frame;
