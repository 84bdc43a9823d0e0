//! crawl-p2p: the peer-protocol side of the crawler.
//!
//! `transport` gets connections to the point where both ends know who they
//! are talking to, `engine` runs the opera protocol over them and classifies
//! peers, `crawler` wires the two together and folds results into a
//! catalogue.

pub mod codec;
pub mod crawler;
pub mod engine;
pub mod transport;

pub use crawler::Crawler;
pub use engine::{HandshakeInfo, ProbeEngine, SessionError};
pub use transport::{DiscReason, MsgStream, RemotePeer, TransportError};
