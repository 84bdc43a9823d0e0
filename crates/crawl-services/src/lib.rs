//! crawl-services: state shared between probe sessions, the crawler and
//! the diagnostics API.

pub mod ban;
pub mod catalogue;
pub mod peer;
pub mod registry;

pub use ban::BanList;
pub use catalogue::{CatalogueError, ClientInfo, NodeRecord, NodeSet, UpdateStatus};
pub use peer::{PeerInfo, PeerSession, PeerStatus};
pub use registry::{PeerRegistry, RegistryError};
