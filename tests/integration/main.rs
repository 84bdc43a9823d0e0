//! Crawler integration test harness.
//!
//! Each test starts a real `Crawler` on loopback and drives it with
//! scripted peers that speak the wire protocol over TCP. No external
//! network or privileges needed:
//!
//!   cargo test --test integration

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crawl_core::config::CrawlerConfig;
use crawl_core::genesis::{BlockCtx, BlockState, EpochRecord, EpochState, GenesisStore, Rules};
use crawl_core::wire::{codes, FTM63};
use crawl_core::{EventHash, Frame, Hash, Message, PeerProgress, Status};
use crawl_p2p::transport::hello::{self, Hello, P2P_VERSION};
use crawl_p2p::transport::Cap;
use crawl_p2p::{Crawler, MsgStream};
use crawl_services::NodeSet;

mod catalogue;
mod probe;
mod startup;

// ── Fixtures ──────────────────────────────────────────────────────────────────

pub const NETWORK_ID: u64 = 250;
pub const GENESIS_EPOCH: u32 = 1000;
pub const GENESIS_BLOCK: u64 = 5_000_000;

pub fn genesis_id() -> Hash {
    Hash([0x4a; 32])
}

pub fn genesis_store() -> GenesisStore {
    GenesisStore {
        network_id: NETWORK_ID,
        network_name: "main".into(),
        genesis_id: genesis_id(),
        epochs: vec![EpochRecord {
            epoch_state: EpochState {
                epoch: GENESIS_EPOCH,
                rules: Rules {
                    name: "main".into(),
                    network_id: NETWORK_ID,
                    upgrades: Default::default(),
                },
            },
            block_state: BlockState {
                last_block: BlockCtx {
                    idx: GENESIS_BLOCK,
                    atropos: EventHash::new(GENESIS_EPOCH, 7, [1; 24]),
                    time: 0,
                },
            },
        }],
    }
}

/// Loopback config with an ephemeral port and no API.
pub fn test_config() -> CrawlerConfig {
    let mut config = CrawlerConfig::default();
    config.network.listen_addr = "127.0.0.1:0".into();
    config.network.api_port = 0;
    config.crawler.update_every = 1;
    config
}

// ── Harness ───────────────────────────────────────────────────────────────────

/// A started crawler plus every catalogue its callback was handed.
pub struct Harness {
    pub crawler: Crawler,
    pub addr: SocketAddr,
    pub updates: mpsc::UnboundedReceiver<NodeSet>,
}

pub async fn start_crawler(config: &CrawlerConfig, input: &NodeSet) -> Result<Harness> {
    let mut crawler = Crawler::new(&genesis_store(), config)?;
    let (tx, updates) = mpsc::unbounded_channel();
    crawler
        .start(input, move |nodes| {
            let _ = tx.send(nodes.clone());
        })
        .await?;
    let addr = crawler.local_addr().context("crawler has no listen address")?;
    Ok(Harness {
        crawler,
        addr,
        updates,
    })
}

impl Harness {
    /// Next catalogue handed to the callback.
    pub async fn next_update(&mut self) -> Result<NodeSet> {
        tokio::time::timeout(Duration::from_secs(5), self.updates.recv())
            .await
            .context("no catalogue update within 5s")?
            .context("update channel closed")
    }
}

// ── Scripted peer ─────────────────────────────────────────────────────────────

pub fn peer_hello(key: u8, name: &str) -> Hello {
    Hello {
        p2p_version: P2P_VERSION,
        name: name.into(),
        caps: vec![Cap {
            name: "opera".into(),
            version: FTM63,
        }],
        pubkey: [key; 32],
        listen_port: 0,
    }
}

pub fn peer_status() -> Status {
    Status {
        protocol_version: FTM63,
        network_id: NETWORK_ID,
        genesis: genesis_id(),
        progress: PeerProgress::default(),
    }
}

pub fn progress_frame(epoch: u32, atropos_epoch: u32) -> Frame {
    Message::Progress(PeerProgress {
        epoch,
        last_block_idx: 777,
        last_block_atropos: EventHash::new(atropos_epoch, 3, [2; 24]),
        highest_lamport: 10,
    })
    .encode()
    .expect("progress encodes")
}

/// Connect to the crawler and complete the transport hello.
pub async fn connect(addr: SocketAddr, hello: &Hello) -> Result<(MsgStream, Hello)> {
    let tcp = TcpStream::connect(addr).await?;
    let mut stream = MsgStream::new(tcp);
    let theirs = hello::exchange(&mut stream, hello).await?;
    Ok((stream, theirs))
}

/// Play the remote side of the status exchange and consume the crawler's
/// progress announcement.
pub async fn status_exchange(stream: &mut MsgStream, ours: Status) -> Result<Status> {
    let frame = stream.read_frame().await?;
    let Message::Handshake(theirs) = Message::decode(&frame, 16)? else {
        bail!("expected status, got code {:#x}", frame.code);
    };
    stream.write_frame(Message::Handshake(ours).encode()?).await?;

    let frame = stream.read_frame().await?;
    if frame.code != codes::PROGRESS {
        bail!("expected progress announcement, got code {:#x}", frame.code);
    }
    Ok(theirs)
}
