//! crawld: Opera network crawler daemon.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crawl_core::config::CrawlerConfig;
use crawl_core::genesis::GenesisStore;
use crawl_p2p::Crawler;
use crawl_services::NodeSet;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config. An explicit path must load; the default location falls
    // back to defaults.
    let (config_path, config) = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => {
            let config = CrawlerConfig::load_from(&path)?;
            (path, config)
        }
        None => {
            if let Err(e) = CrawlerConfig::write_default_if_missing() {
                tracing::warn!(error = %e, "failed to write default config");
            }
            let config = CrawlerConfig::load().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to load config, using defaults");
                CrawlerConfig::default()
            });
            (CrawlerConfig::file_path(), config)
        }
    };
    tracing::info!(
        config = %config_path.display(),
        genesis = %config.crawler.genesis_path.display(),
        "crawld starting"
    );

    let genesis = GenesisStore::read(&config.crawler.genesis_path)?;
    let input = NodeSet::load_json(&config.crawler.nodes_path)?;
    tracing::info!(network = %genesis.network_name, nodes = input.len(), "genesis and catalogue loaded");

    let mut crawler = Crawler::new(&genesis, &config)?;

    // Every published catalogue goes to the API and to disk.
    let api = crawl_api::ApiState::new(crawler.engine().clone());
    let publish = api.clone();
    let (persist, writer) = spawn_writer(config.crawler.nodes_path.clone());
    crawler
        .start(&input, move |nodes| {
            publish.publish(nodes);
            persist.send_replace(nodes.clone());
        })
        .await
        .context("failed to start crawler")?;

    if config.network.api_port != 0 {
        let port = config.network.api_port;
        tokio::spawn(async move {
            if let Err(e) = crawl_api::serve(api, port).await {
                tracing::error!(error = %e, "API server failed");
            }
        });
    }

    tokio::signal::ctrl_c().await.ok();
    tracing::info!("shutdown signal received");

    let stopped = crawler.stop().await;
    // The callback owned the sender, so the writer drains and exits here.
    if let Err(e) = writer.await {
        tracing::error!(error = %e, "catalogue writer failed");
    }
    if let Some(nodes) = stopped {
        tracing::info!(nodes = nodes.len(), "final catalogue written");
    }
    Ok(())
}

/// Write catalogues to `path` off the aggregation task. Only the newest
/// pending catalogue is written; the task ends once the sender is dropped
/// and the last value is on disk.
fn spawn_writer(path: PathBuf) -> (watch::Sender<NodeSet>, JoinHandle<()>) {
    let (tx, mut rx) = watch::channel(NodeSet::new());
    let handle = tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let nodes = rx.borrow_and_update().clone();
            let path = path.clone();
            match tokio::task::spawn_blocking(move || nodes.write_json(&path)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "failed to write catalogue"),
                Err(e) => tracing::warn!(error = %e, "catalogue write task failed"),
            }
        }
    });
    (tx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crawl_core::Node;
    use crawl_services::NodeRecord;

    fn catalogue(n: u8) -> NodeSet {
        (1..=n)
            .map(|i| NodeRecord::new(Node::new([i; 32], format!("10.0.0.{i}:5050").parse().unwrap())))
            .collect()
    }

    #[tokio::test]
    async fn writer_persists_latest_catalogue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.json");
        let (tx, handle) = spawn_writer(path.clone());

        tx.send_replace(catalogue(1));
        tx.send_replace(catalogue(3));
        drop(tx);
        handle.await.unwrap();

        assert_eq!(NodeSet::load_json(&path).unwrap(), catalogue(3));
    }

    #[tokio::test]
    async fn writer_without_updates_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.json");
        let (tx, handle) = spawn_writer(path.clone());
        drop(tx);
        handle.await.unwrap();
        assert!(!path.exists());
    }
}
