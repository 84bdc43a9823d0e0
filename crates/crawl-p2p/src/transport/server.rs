//! The p2p server: accepts inbound connections, redials bootstrap nodes,
//! runs the hello exchange and hands each connection to the negotiated
//! protocol.
//!
//! Every task the server starts is tracked. `stop()` cancels them all and
//! waits; a cancelled connection task drops its stream, which is what
//! unblocks a protocol handler parked on a read.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crawl_core::wire::{HANDSHAKE_TIMEOUT_SECS, PROTOCOL_NAME};
use crawl_core::{Node, NodeId, NodeKey};

use super::hello::{self, Hello, P2P_VERSION};
use super::{Cap, DiscReason, MsgStream, Protocol, RemotePeer, TransportError};

pub struct ServerConfig {
    pub key: Arc<NodeKey>,
    /// Client name sent in the hello.
    pub name: String,
    pub listen_addr: String,
    pub bootstrap_nodes: Vec<Node>,
    pub bootstrap_nodes_v5: Vec<Node>,
    /// Nodes exempt from protocol-level usefulness filtering.
    pub trusted_nodes: Vec<Node>,
    pub protocols: Vec<Protocol>,
    pub dial_interval: Duration,
}

pub struct Server {
    inner: Arc<Inner>,
}

struct Inner {
    key: Arc<NodeKey>,
    name: String,
    local_addr: SocketAddr,
    protocols: Vec<Protocol>,
    trusted: HashSet<NodeId>,
    /// Both bootstrap lists, deduplicated by id.
    bootstrap: Vec<Node>,
    active: DashMap<NodeId, ()>,
    dialing: DashMap<NodeId, ()>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl Server {
    /// Bind the listener and start the accept and dial loops.
    pub async fn start(config: ServerConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.listen_addr.as_str()).await?;
        let local_addr = listener.local_addr()?;

        let mut seen = HashSet::new();
        let bootstrap: Vec<Node> = config
            .bootstrap_nodes
            .iter()
            .chain(config.bootstrap_nodes_v5.iter())
            .filter(|n| seen.insert(n.id()))
            .copied()
            .collect();

        let inner = Arc::new(Inner {
            key: config.key,
            name: config.name,
            local_addr,
            protocols: config.protocols,
            trusted: config.trusted_nodes.iter().map(Node::id).collect(),
            bootstrap,
            active: DashMap::new(),
            dialing: DashMap::new(),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        });

        tracing::info!(
            addr = %local_addr,
            id = %inner.key.id().short(),
            bootnodes = inner.bootstrap.len(),
            "p2p server listening"
        );

        inner.tasks.spawn(accept_loop(Arc::clone(&inner), listener));
        if !inner.bootstrap.is_empty() {
            let every = config.dial_interval.max(Duration::from_millis(100));
            inner.tasks.spawn(dial_loop(Arc::clone(&inner), every));
        }

        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// This server as a dialable node.
    pub fn self_node(&self) -> Node {
        Node::new(self.inner.key.public, self.inner.local_addr)
    }

    pub fn peer_count(&self) -> usize {
        self.inner.active.len()
    }

    pub fn bootstrap_nodes(&self) -> &[Node] {
        &self.inner.bootstrap
    }

    /// Stop accepting and dialling, tear down every connection and wait for
    /// all server tasks to finish. Safe to call more than once.
    pub async fn stop(&self) {
        self.inner.shutdown.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        tracing::info!(addr = %self.inner.local_addr, "p2p server stopped");
    }
}

// ── Loops ─────────────────────────────────────────────────────────────────────

async fn accept_loop(inner: Arc<Inner>, listener: TcpListener) {
    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    let conn = Arc::clone(&inner);
                    inner.tasks.spawn(async move { conn.run_conn(stream, remote, None).await });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

async fn dial_loop(inner: Arc<Inner>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            _ = ticker.tick() => {
                for node in &inner.bootstrap {
                    inner.dial(*node);
                }
            }
        }
    }
}

// ── Connections ───────────────────────────────────────────────────────────────

impl Inner {
    fn dial(self: &Arc<Self>, node: Node) {
        let id = node.id();
        if id == self.key.id() || self.active.contains_key(&id) || self.dialing.contains_key(&id) {
            return;
        }
        let inner = Arc::clone(self);
        self.tasks.spawn(async move {
            let Some(_dialing) = SlotGuard::acquire(&inner.dialing, id) else {
                return;
            };
            let timeout = Duration::from_secs(HANDSHAKE_TIMEOUT_SECS);
            let connect = tokio::time::timeout(timeout, TcpStream::connect(node.addr));
            let connected = tokio::select! {
                _ = inner.shutdown.cancelled() => return,
                res = connect => res,
            };
            match connected {
                Ok(Ok(stream)) => inner.run_conn(stream, node.addr, Some(node)).await,
                Ok(Err(e)) => tracing::debug!(peer = %id.short(), addr = %node.addr, error = %e, "dial failed"),
                Err(_) => tracing::debug!(peer = %id.short(), addr = %node.addr, "dial timed out"),
            }
        });
    }

    async fn run_conn(&self, stream: TcpStream, remote: SocketAddr, dest: Option<Node>) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            res = self.setup_conn(stream, remote, dest) => {
                if let Err(e) = res {
                    tracing::debug!(addr = %remote, error = %e, "connection setup failed");
                }
            }
        }
    }

    async fn setup_conn(
        &self,
        io: TcpStream,
        remote: SocketAddr,
        dest: Option<Node>,
    ) -> Result<(), TransportError> {
        let _ = io.set_nodelay(true);
        let mut stream = MsgStream::new(io);

        let ours = Hello {
            p2p_version: P2P_VERSION,
            name: self.name.clone(),
            caps: self.protocols.iter().map(Protocol::cap).collect(),
            pubkey: self.key.public,
            listen_port: self.local_addr.port(),
        };
        let theirs = hello::exchange(&mut stream, &ours).await?;

        if let Some(dest) = dest {
            if theirs.pubkey != dest.pubkey {
                stream.disconnect(DiscReason::UnexpectedIdentity).await;
                return Err(TransportError::UnexpectedIdentity);
            }
        }
        if theirs.pubkey == self.key.public {
            stream.disconnect(DiscReason::SelfConnect).await;
            return Ok(());
        }

        let port = if theirs.listen_port != 0 {
            theirs.listen_port
        } else {
            remote.port()
        };
        let node = Node::new(theirs.pubkey, SocketAddr::new(remote.ip(), port));
        let id = node.id();

        let Some(protocol) = self.match_protocol(&theirs.caps) else {
            tracing::debug!(peer = %id.short(), name = %theirs.name, "no matching protocol");
            stream.disconnect(DiscReason::UselessPeer).await;
            return Ok(());
        };
        let Some(_active) = SlotGuard::acquire(&self.active, id) else {
            stream.disconnect(DiscReason::AlreadyConnected).await;
            return Ok(());
        };

        let peer = RemotePeer {
            node,
            name: theirs.name,
            caps: theirs.caps,
            version: protocol.version,
            trusted: self.trusted.contains(&id),
            inbound: dest.is_none(),
        };
        tracing::debug!(peer = %id.short(), addr = %remote, version = peer.version, "peer connected");

        let reason = protocol.handler.run(peer, &mut stream).await;
        tracing::debug!(peer = %id.short(), reason = %reason, "peer disconnected");
        stream.disconnect(reason).await;
        Ok(())
    }

    /// Highest opera version both sides speak.
    fn match_protocol(&self, theirs: &[Cap]) -> Option<Protocol> {
        let ours: Vec<Cap> = self.protocols.iter().map(Protocol::cap).collect();
        let version = hello::negotiate(&ours, theirs, PROTOCOL_NAME)?;
        self.protocols
            .iter()
            .find(|p| p.name == PROTOCOL_NAME && p.version == version)
            .cloned()
    }
}

/// Holds a node id in a set for as long as it lives.
struct SlotGuard<'a> {
    set: &'a DashMap<NodeId, ()>,
    id: NodeId,
}

impl<'a> SlotGuard<'a> {
    fn acquire(set: &'a DashMap<NodeId, ()>, id: NodeId) -> Option<Self> {
        match set.entry(id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(Self { set, id })
            }
        }
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.id);
    }
}
