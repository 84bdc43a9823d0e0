//! Probe engine: runs the opera protocol against every connected peer and
//! publishes one `NodeRecord` per peer that reaches a terminal
//! classification.
//!
//! Per session: usefulness pre-filter, status exchange, registration,
//! progress announcement, then the message loop until the peer is
//! classified or the session fails. Sessions that fail before a terminal
//! status publish nothing.

mod handler;
mod handshake;

use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crawl_core::forkid::{self, EnrEntry};
use crawl_core::genesis::{ChainConfig, GenesisOutput, NodeInfo, Rules};
use crawl_core::wire::{protocol_length, PROTOCOL_NAME, PROTOCOL_VERSIONS};
use crawl_core::{ErrorCode, Hash, Message, NodeId, PeerProgress, ProtocolError, Status};
use crawl_services::{
    BanList, ClientInfo, NodeRecord, PeerInfo, PeerRegistry, PeerSession, PeerStatus, RegistryError,
};

use crate::transport::{DiscReason, MsgStream, Protocol, ProtocolHandler, RemotePeer, TransportError};

// ── Handshake info ────────────────────────────────────────────────────────────

/// Chain identity and progress we present to every peer. Fixed for the
/// engine's lifetime.
#[derive(Debug, Clone)]
pub struct HandshakeInfo {
    pub network_id: u64,
    pub genesis: Hash,
    pub progress: PeerProgress,
    pub rules: Rules,
    pub chain: ChainConfig,
    pub node_info: NodeInfo,
}

impl HandshakeInfo {
    pub fn status(&self, version: u32) -> Status {
        Status {
            protocol_version: version,
            network_id: self.network_id,
            genesis: self.genesis,
            progress: self.progress,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(network_id: u64, genesis: Hash, progress: PeerProgress) -> Self {
        Self {
            network_id,
            genesis,
            progress,
            rules: Rules {
                name: "test".into(),
                network_id,
                upgrades: Default::default(),
            },
            chain: ChainConfig {
                chain_id: network_id,
                ..ChainConfig::default()
            },
            node_info: NodeInfo {
                network: network_id,
                genesis,
                epoch: progress.epoch,
                num_of_blocks: progress.last_block_idx,
            },
        }
    }
}

impl From<GenesisOutput> for HandshakeInfo {
    fn from(out: GenesisOutput) -> Self {
        Self {
            network_id: out.node_info.network,
            genesis: out.node_info.genesis,
            progress: out.progress,
            rules: out.rules,
            chain: out.chain,
            node_info: out.node_info,
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Why a probe session ended without a classification.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("useless peer")]
    Useless,

    #[error("status exchange timed out")]
    HandshakeTimeout,

    #[error("engine shutting down")]
    Quitting,
}

impl SessionError {
    pub fn disc_reason(&self) -> DiscReason {
        match self {
            Self::Protocol(_) => DiscReason::SubprotocolError,
            Self::Transport(TransportError::Disconnected(reason)) => *reason,
            Self::Transport(TransportError::Timeout) => DiscReason::ReadTimeout,
            Self::Transport(_) => DiscReason::NetworkError,
            Self::Registry(_) => DiscReason::AlreadyConnected,
            Self::Useless => DiscReason::UselessPeer,
            Self::HandshakeTimeout => DiscReason::ReadTimeout,
            Self::Quitting => DiscReason::Quitting,
        }
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

pub struct ProbeEngine {
    info: Arc<HandshakeInfo>,
    peers: PeerRegistry,
    bans: BanList,
    output: mpsc::Sender<NodeRecord>,
    quit: CancellationToken,
    tasks: TaskTracker,
}

impl ProbeEngine {
    pub fn new(info: HandshakeInfo, output: mpsc::Sender<NodeRecord>, bans: BanList) -> Self {
        Self {
            info: Arc::new(info),
            peers: PeerRegistry::new(),
            bans,
            output,
            quit: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    pub fn bans(&self) -> &BanList {
        &self.bans
    }

    /// One protocol descriptor per supported version, all served by this
    /// engine.
    pub fn protocols(self: &Arc<Self>) -> Vec<Protocol> {
        let handler: Arc<dyn ProtocolHandler> = Arc::clone(self) as Arc<dyn ProtocolHandler>;
        PROTOCOL_VERSIONS
            .iter()
            .filter_map(|&version| {
                Some(Protocol {
                    name: PROTOCOL_NAME.to_string(),
                    version,
                    length: protocol_length(version)?,
                    handler: Arc::clone(&handler),
                    attributes: vec![self.enr_entry()],
                })
            })
            .collect()
    }

    pub fn node_info(&self) -> NodeInfo {
        self.info.node_info.clone()
    }

    pub fn peer_info(&self, id: &NodeId) -> Option<PeerInfo> {
        self.peers.lookup(id).map(|s| s.info())
    }

    /// Discovery record entry for the current chain head.
    pub fn enr_entry(&self) -> EnrEntry {
        let info = &self.info.node_info;
        EnrEntry {
            fork_id: forkid::new_id(&self.info.chain, &info.genesis, info.num_of_blocks),
        }
    }

    /// Signal every session to quit and wait until none is running.
    /// Safe to call more than once.
    pub async fn close(&self) {
        self.quit.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }

    pub fn is_closed(&self) -> bool {
        self.quit.is_cancelled()
    }

    /// Run one probe session to completion.
    pub async fn handle(&self, peer: RemotePeer, stream: &mut MsgStream) -> Result<(), SessionError> {
        let id = peer.id();

        let useless = self.bans.banned(&id) || !peer.name.to_lowercase().contains(PROTOCOL_NAME);
        if !peer.trusted && useless {
            tracing::debug!(peer = %id.short(), name = %peer.name, "useless peer");
            return Err(SessionError::Useless);
        }

        let length = protocol_length(peer.version).ok_or_else(|| {
            ProtocolError::new(ErrorCode::ProtocolVersionMismatch, peer.version.to_string())
        })?;

        let status = match handshake::exchange(&self.info, stream, peer.version).await {
            Ok(status) => status,
            Err(e) => {
                tracing::debug!(peer = %id.short(), error = %e, "handshake failed");
                return Err(e);
            }
        };

        let session = Arc::new(PeerSession::new(
            peer.node,
            peer.name.clone(),
            peer.version,
            peer.trusted,
            peer.inbound,
        ));
        session.set_progress(status.progress);
        if let Err(e) = self.peers.register(Arc::clone(&session)) {
            tracing::warn!(peer = %id.short(), error = %e, "peer registration failed");
            return Err(e.into());
        }
        let _registration = Registration {
            peers: &self.peers,
            id,
        };
        session.set_status(PeerStatus::Fetching);

        stream.write_frame(Message::Progress(self.info.progress).encode()?).await?;

        loop {
            let frame = stream.read_frame().await?;
            if let Err(e) = handler::handle_msg(&session, &frame, length) {
                tracing::debug!(peer = %id.short(), error = %e, "message handling failed");
                return Err(e.into());
            }
            if session.status().is_terminal() {
                self.publish(&session, &peer).await;
                return Ok(());
            }
        }
    }

    async fn publish(&self, session: &PeerSession, peer: &RemotePeer) {
        let progress = session.progress();
        let info = ClientInfo {
            client_name: peer.name.clone(),
            capabilities: peer.caps.iter().map(ToString::to_string).collect(),
            network_id: self.info.network_id,
            classification: session.status(),
            epoch: progress.epoch,
            blockheight: progress.last_block_idx.to_string(),
            head_hash: progress.last_block_atropos,
        };
        let record = NodeRecord::new(session.node).with_info(info);

        tokio::select! {
            sent = self.output.send(record) => {
                if sent.is_err() {
                    tracing::debug!(peer = %session.id.short(), "output queue closed, result dropped");
                }
            }
            _ = self.quit.cancelled() => {
                tracing::debug!(peer = %session.id.short(), "shutting down, result dropped");
            }
        }
    }
}

impl ProtocolHandler for ProbeEngine {
    fn run<'a>(&'a self, peer: RemotePeer, stream: &'a mut MsgStream) -> BoxFuture<'a, DiscReason> {
        Box::pin(async move {
            let _token = self.tasks.token();
            if self.quit.is_cancelled() {
                return DiscReason::Quitting;
            }
            match self.handle(peer, stream).await {
                Ok(()) => DiscReason::Requested,
                Err(e) => e.disc_reason(),
            }
        })
    }
}

/// Removes the session from the registry when the handler exits, however
/// it exits.
struct Registration<'a> {
    peers: &'a PeerRegistry,
    id: NodeId,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.peers.unregister(&self.id) {
            tracing::error!(peer = %self.id.short(), error = %e, "peer unregistration failed");
        }
    }
}
