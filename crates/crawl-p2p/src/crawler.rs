//! Crawler orchestration.
//!
//! Owns the probe engine and the p2p server, and folds every published
//! probe result into a node catalogue on a single aggregation task.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crawl_core::config::CrawlerConfig;
use crawl_core::crypto::parse_key;
use crawl_core::enode::parse_bootnode;
use crawl_core::genesis::{load_genesis, GenesisStore};
use crawl_core::Node;
use crawl_services::{BanList, NodeRecord, NodeSet};

use crate::engine::{HandshakeInfo, ProbeEngine};
use crate::transport::{Server, ServerConfig};

pub struct Crawler {
    engine: Arc<ProbeEngine>,
    /// Taken by `start`.
    server_config: Option<ServerConfig>,
    output: Option<mpsc::Receiver<NodeRecord>>,
    update_every: usize,
    server: Option<Server>,
    done: CancellationToken,
    aggregator: Option<JoinHandle<NodeSet>>,
}

impl Crawler {
    /// Wire the engine, key and bootstrap lists. Any malformed input is an
    /// error; nothing is started yet.
    pub fn new(genesis: &GenesisStore, config: &CrawlerConfig) -> anyhow::Result<Self> {
        let genesis = load_genesis(genesis).context("loading genesis")?;
        let info = HandshakeInfo::from(genesis);

        let (tx, rx) = mpsc::channel(config.crawler.workers.max(1));
        let bans = BanList::new();
        bans.apply_config(&config.network.banned_nodes);
        let engine = Arc::new(ProbeEngine::new(info, tx, bans));

        let key = parse_key(&config.identity.node_key).context("parsing node key")?;
        let bootstrap_nodes = parse_nodes(&config.network.bootnodes).context("parsing bootnodes")?;
        let trusted_nodes =
            parse_nodes(&config.network.trusted_nodes).context("parsing trusted nodes")?;

        let server_config = ServerConfig {
            key: Arc::new(key),
            name: config.identity.client_name.clone(),
            listen_addr: config.network.listen_addr.clone(),
            bootstrap_nodes_v5: bootstrap_nodes.clone(),
            bootstrap_nodes,
            trusted_nodes,
            protocols: engine.protocols(),
            dial_interval: Duration::from_secs(config.network.dial_interval_secs),
        };

        Ok(Self {
            engine,
            server_config: Some(server_config),
            output: Some(rx),
            update_every: config.crawler.update_every,
            server: None,
            done: CancellationToken::new(),
            aggregator: None,
        })
    }

    pub fn engine(&self) -> &Arc<ProbeEngine> {
        &self.engine
    }

    /// Listen address once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(Server::local_addr)
    }

    /// Seed both bootstrap lists with `input`, start the server and the
    /// aggregation task. `on_updated` sees the catalogue every
    /// `update_every` merges and once more at stop.
    pub async fn start<F>(&mut self, input: &NodeSet, on_updated: F) -> anyhow::Result<()>
    where
        F: FnMut(&NodeSet) + Send + 'static,
    {
        let (Some(mut config), Some(rx)) = (self.server_config.take(), self.output.take()) else {
            bail!("crawler already started");
        };

        let seeds = input.nodes();
        config.bootstrap_nodes.extend(seeds.iter().copied());
        config.bootstrap_nodes_v5.extend(seeds);

        let server = Server::start(config).await.context("starting p2p server")?;
        tracing::info!(
            addr = %server.local_addr(),
            seeds = input.len(),
            bootnodes = server.bootstrap_nodes().len(),
            "crawler started"
        );
        self.server = Some(server);

        self.aggregator = Some(tokio::spawn(aggregate(
            rx,
            self.done.clone(),
            input.clone(),
            self.update_every,
            on_updated,
        )));
        Ok(())
    }

    /// Stop the server, close the engine and wait for the aggregation task
    /// to deliver its final callback. Returns the final catalogue the first
    /// time, `None` afterwards.
    pub async fn stop(&mut self) -> Option<NodeSet> {
        if let Some(server) = self.server.take() {
            server.stop().await;
        }
        self.engine.close().await;
        self.done.cancel();

        let handle = self.aggregator.take()?;
        match handle.await {
            Ok(nodes) => {
                tracing::info!(nodes = nodes.len(), "crawler stopped");
                Some(nodes)
            }
            Err(e) => {
                tracing::error!(error = %e, "aggregation task failed");
                None
            }
        }
    }
}

fn parse_nodes(urls: &[String]) -> anyhow::Result<Vec<Node>> {
    urls.iter()
        .map(|url| parse_bootnode(url).with_context(|| format!("invalid node url {url:?}")))
        .collect()
}

/// Merge every received record into `output` until `done` fires, then drain
/// whatever is still queued. `on_updated` runs before every `every`-th merge
/// counter increment (so after merges 1, every+1, 2*every+1, ...) and once
/// at the end.
pub async fn aggregate<F>(
    mut rx: mpsc::Receiver<NodeRecord>,
    done: CancellationToken,
    mut output: NodeSet,
    every: usize,
    mut on_updated: F,
) -> NodeSet
where
    F: FnMut(&NodeSet),
{
    let every = every.max(1);
    let mut updated = 0usize;
    let mut merge = |output: &mut NodeSet, record: NodeRecord| {
        output.update(record, None, now_unix());
        if updated % every == 0 {
            on_updated(&*output);
        }
        updated += 1;
    };

    loop {
        tokio::select! {
            biased;
            record = rx.recv() => match record {
                Some(record) => merge(&mut output, record),
                None => break,
            },
            _ = done.cancelled() => break,
        }
    }
    while let Ok(record) = rx.try_recv() {
        merge(&mut output, record);
    }
    drop(merge);

    on_updated(&output);
    output
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crawl_core::genesis::{BlockCtx, BlockState, EpochRecord, EpochState, Rules};
    use crawl_core::{EventHash, Hash};

    fn record(i: u8) -> NodeRecord {
        NodeRecord::new(Node::new([i; 32], format!("10.0.0.{i}:5050").parse().unwrap()))
    }

    fn genesis() -> GenesisStore {
        GenesisStore {
            network_id: 250,
            network_name: "main".into(),
            genesis_id: Hash([9; 32]),
            epochs: vec![EpochRecord {
                epoch_state: EpochState {
                    epoch: 10,
                    rules: Rules {
                        name: "main".into(),
                        network_id: 250,
                        upgrades: Default::default(),
                    },
                },
                block_state: BlockState {
                    last_block: BlockCtx {
                        idx: 100,
                        atropos: EventHash::new(10, 1, [0; 24]),
                        time: 0,
                    },
                },
            }],
        }
    }

    fn config() -> CrawlerConfig {
        let mut config = CrawlerConfig::default();
        config.network.listen_addr = "127.0.0.1:0".into();
        config
    }

    #[tokio::test]
    async fn callback_every_tenth_update_and_once_at_stop() {
        let (tx, rx) = mpsc::channel(32);
        let done = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);

        for i in 0..25 {
            tx.send(record(i)).await.unwrap();
        }
        done.cancel();

        let out = aggregate(rx, done, NodeSet::new(), 10, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(out.len(), 25);
    }

    #[tokio::test]
    async fn callback_sees_sizes_after_first_and_eleventh() {
        let (tx, rx) = mpsc::channel(32);
        let done = CancellationToken::new();
        let sizes = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen = Arc::clone(&sizes);
        let task = tokio::spawn(aggregate(rx, done.clone(), NodeSet::new(), 10, move |set| {
            seen.lock().push(set.len());
        }));

        for i in 0..12 {
            tx.send(record(i)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        done.cancel();
        task.await.unwrap();
        assert_eq!(*sizes.lock(), vec![1, 11, 12]);
    }

    #[tokio::test]
    async fn repeated_results_merge_into_one_entry() {
        let (tx, rx) = mpsc::channel(4);
        let done = CancellationToken::new();
        tx.send(record(1)).await.unwrap();
        tx.send(record(1)).await.unwrap();
        done.cancel();
        let out = aggregate(rx, done, NodeSet::new(), 10, |_| {}).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out.get(&record(1).id()).unwrap().score, 2);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let mut crawler = Crawler::new(&genesis(), &config()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        crawler
            .start(&NodeSet::new(), move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        assert!(crawler.local_addr().is_some());

        assert!(crawler.stop().await.is_some());
        assert!(crawler.stop().await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(crawler.engine().is_closed());
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let mut crawler = Crawler::new(&genesis(), &config()).unwrap();
        crawler.start(&NodeSet::new(), |_| {}).await.unwrap();
        assert!(crawler.start(&NodeSet::new(), |_| {}).await.is_err());
        crawler.stop().await;
    }

    #[test]
    fn schemeless_bootnode_accepted() {
        let mut config = config();
        config.network.bootnodes = vec![format!("{}@1.2.3.4:30303", hex::encode([1u8; 32]))];
        assert!(Crawler::new(&genesis(), &config).is_ok());
    }

    #[test]
    fn configured_bootnodes_seed_both_discovery_lists() {
        let mut config = config();
        config.network.bootnodes = vec![format!("enode://{}@1.2.3.4:30303", hex::encode([1u8; 32]))];
        let crawler = Crawler::new(&genesis(), &config).unwrap();
        let server_config = crawler.server_config.as_ref().unwrap();
        assert_eq!(server_config.bootstrap_nodes.len(), 1);
        assert_eq!(server_config.bootstrap_nodes_v5, server_config.bootstrap_nodes);
    }

    #[test]
    fn malformed_bootnode_is_fatal() {
        let mut config = config();
        config.network.bootnodes = vec!["abc@1.2.3.4:30303".into()];
        let err = Crawler::new(&genesis(), &config).err().unwrap();
        assert!(format!("{err:#}").contains("bootnodes"));
    }

    #[test]
    fn malformed_key_is_fatal() {
        let mut config = config();
        config.identity.node_key = "zz".into();
        assert!(Crawler::new(&genesis(), &config).is_err());
    }

    #[tokio::test]
    async fn seeds_become_bootstrap_nodes() {
        let mut crawler = Crawler::new(&genesis(), &config()).unwrap();
        let input: NodeSet = (1..=3).map(record).collect();
        crawler.start(&input, |_| {}).await.unwrap();
        let server = crawler.server.as_ref().unwrap();
        assert_eq!(server.bootstrap_nodes().len(), 3);
        let out = crawler.stop().await.unwrap();
        assert_eq!(out.len(), 3);
    }
}
