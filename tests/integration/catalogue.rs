use crate::*;

use tokio::net::TcpListener;

use crawl_core::Node;
use crawl_services::{NodeRecord, PeerStatus};

// ══════════════════════════════════════════════════════════════════════════════
//  Seeding, merging and persistence
// ══════════════════════════════════════════════════════════════════════════════

/// Seed nodes are dialled, probed and merged back into the catalogue.
#[tokio::test]
async fn seed_node_is_dialled_and_merged() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let seed = Node::new([8; 32], listener.local_addr()?);
    let input: NodeSet = [NodeRecord::new(seed)].into_iter().collect();

    let mut h = start_crawler(&test_config(), &input).await?;

    let (tcp, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
        .await
        .context("crawler never dialled the seed")??;
    let mut stream = MsgStream::new(tcp);
    hello::exchange(&mut stream, &peer_hello(8, "go-opera/v1.1.3")).await?;
    status_exchange(&mut stream, peer_status()).await?;
    stream.write_frame(progress_frame(GENESIS_EPOCH, GENESIS_EPOCH)).await?;

    let nodes = h.next_update().await?;
    let record = nodes.get(&seed.id()).context("seed missing from catalogue")?;
    assert_eq!(record.score, 1);
    assert!(record.first_response.is_some());
    assert_eq!(
        record.info.as_ref().map(|i| i.classification),
        Some(PeerStatus::Useless)
    );

    let final_nodes = h.crawler.stop().await.unwrap();
    assert_eq!(final_nodes.len(), 1);
    Ok(())
}

/// The catalogue handed to the callback survives a write/read cycle.
#[tokio::test]
async fn published_catalogue_persists() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("nodes.json");

    let mut h = start_crawler(&test_config(), &NodeSet::new()).await?;
    let (mut stream, _) = connect(h.addr, &peer_hello(9, "go-opera")).await?;
    status_exchange(&mut stream, peer_status()).await?;
    stream.write_frame(progress_frame(3, 2)).await?;

    let nodes = h.next_update().await?;
    nodes.write_json(&path)?;
    h.crawler.stop().await;

    let loaded = NodeSet::load_json(&path)?;
    assert_eq!(loaded, nodes);
    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    let entry = json.as_object().unwrap().values().next().unwrap();
    assert_eq!(entry["info"]["classification"], "evil");
    assert_eq!(entry["record"]["pubkey"], hex::encode([9u8; 32]));
    Ok(())
}

/// Results beyond every tenth merge are still in the final catalogue.
#[tokio::test]
async fn final_callback_carries_every_result() -> Result<()> {
    let mut config = test_config();
    config.crawler.update_every = 10;
    let mut h = start_crawler(&config, &NodeSet::new()).await?;

    for key in 20..23u8 {
        let (mut stream, _) = connect(h.addr, &peer_hello(key, "go-opera")).await?;
        status_exchange(&mut stream, peer_status()).await?;
        stream.write_frame(progress_frame(1, 1)).await?;
        assert!(stream.read_frame().await.is_err());
    }

    // First merge triggers a callback, the next two do not.
    assert_eq!(h.next_update().await?.len(), 1);
    let final_nodes = h.crawler.stop().await.unwrap();
    assert_eq!(final_nodes.len(), 3);
    assert_eq!(h.next_update().await?.len(), 3);
    assert!(h.updates.try_recv().is_err());
    Ok(())
}
