use crate::*;

use crawl_core::wire::FTM62;
use crawl_p2p::transport::Cap;
use crawl_p2p::{DiscReason, TransportError};
use crawl_services::PeerStatus;

// ══════════════════════════════════════════════════════════════════════════════
//  Classification over real connections
// ══════════════════════════════════════════════════════════════════════════════

async fn expect_disconnect(stream: &mut MsgStream, reason: DiscReason) {
    match stream.read_frame().await {
        Err(TransportError::Disconnected(r)) => assert_eq!(r, reason),
        other => panic!("expected disconnect {reason}, got {other:?}"),
    }
}

#[tokio::test]
async fn inconsistent_peer_is_catalogued_as_evil() -> Result<()> {
    let mut h = start_crawler(&test_config(), &NodeSet::new()).await?;
    let hello = peer_hello(1, "go-opera/v1.1.3-rc.5");
    let (mut stream, theirs) = connect(h.addr, &hello).await?;
    assert!(theirs.caps.contains(&Cap {
        name: "opera".into(),
        version: FTM63
    }));

    let status = status_exchange(&mut stream, peer_status()).await?;
    assert_eq!(status.network_id, NETWORK_ID);
    assert_eq!(status.genesis, genesis_id());
    assert_eq!(status.progress.epoch, GENESIS_EPOCH);
    assert_eq!(status.progress.last_block_idx, GENESIS_BLOCK);

    stream.write_frame(progress_frame(50, 49)).await?;
    expect_disconnect(&mut stream, DiscReason::Requested).await;

    let nodes = h.next_update().await?;
    assert_eq!(nodes.len(), 1);
    let (_, record) = nodes.iter().next().unwrap();
    let info = record.info.as_ref().unwrap();
    assert_eq!(info.classification, PeerStatus::Evil);
    assert_eq!(info.client_name, "go-opera/v1.1.3-rc.5");
    assert_eq!(info.epoch, 50);
    assert_eq!(info.blockheight, "777");
    assert_eq!(info.network_id, NETWORK_ID);
    assert_eq!(record.record.pubkey, [1; 32]);
    assert_eq!(record.score, 1);

    h.crawler.stop().await;
    Ok(())
}

#[tokio::test]
async fn consistent_peer_is_catalogued_as_useless() -> Result<()> {
    let mut h = start_crawler(&test_config(), &NodeSet::new()).await?;
    let (mut stream, _) = connect(h.addr, &peer_hello(2, "Opera")).await?;
    status_exchange(&mut stream, peer_status()).await?;
    stream.write_frame(progress_frame(50, 50)).await?;
    expect_disconnect(&mut stream, DiscReason::Requested).await;

    let nodes = h.next_update().await?;
    let (_, record) = nodes.iter().next().unwrap();
    assert_eq!(
        record.info.as_ref().unwrap().classification,
        PeerStatus::Useless
    );
    h.crawler.stop().await;
    Ok(())
}

#[tokio::test]
async fn second_status_yields_no_record() -> Result<()> {
    let mut h = start_crawler(&test_config(), &NodeSet::new()).await?;
    let (mut stream, _) = connect(h.addr, &peer_hello(3, "go-opera")).await?;
    status_exchange(&mut stream, peer_status()).await?;
    stream
        .write_frame(Message::Handshake(peer_status()).encode()?)
        .await?;
    expect_disconnect(&mut stream, DiscReason::SubprotocolError).await;

    let final_nodes = h.crawler.stop().await.context("first stop returns catalogue")?;
    assert!(final_nodes.is_empty());
    // Only the final callback fired.
    assert!(h.next_update().await?.is_empty());
    assert!(h.updates.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn genesis_mismatch_yields_no_record() -> Result<()> {
    let mut h = start_crawler(&test_config(), &NodeSet::new()).await?;
    let (mut stream, _) = connect(h.addr, &peer_hello(4, "go-opera")).await?;

    let frame = stream.read_frame().await?;
    assert_eq!(frame.code, codes::HANDSHAKE);
    let mut ours = peer_status();
    ours.genesis = Hash([0x11; 32]);
    stream.write_frame(Message::Handshake(ours).encode()?).await?;
    expect_disconnect(&mut stream, DiscReason::SubprotocolError).await;

    assert!(h.crawler.stop().await.unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn foreign_client_dropped_before_status() -> Result<()> {
    let mut h = start_crawler(&test_config(), &NodeSet::new()).await?;
    let (mut stream, _) = connect(h.addr, &peer_hello(5, "Geth/v1.10.26")).await?;
    expect_disconnect(&mut stream, DiscReason::UselessPeer).await;
    assert!(h.crawler.stop().await.unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn older_version_negotiated_when_only_one_offered() -> Result<()> {
    let mut h = start_crawler(&test_config(), &NodeSet::new()).await?;
    let mut hello = peer_hello(6, "go-opera");
    hello.caps = vec![Cap {
        name: "opera".into(),
        version: FTM62,
    }];
    let (mut stream, _) = connect(h.addr, &hello).await?;

    let mut ours = peer_status();
    ours.protocol_version = FTM62;
    let status = status_exchange(&mut stream, ours).await?;
    assert_eq!(status.protocol_version, FTM62);

    stream.write_frame(progress_frame(9, 9)).await?;
    expect_disconnect(&mut stream, DiscReason::Requested).await;
    assert_eq!(h.next_update().await?.len(), 1);
    h.crawler.stop().await;
    Ok(())
}

#[tokio::test]
async fn registry_tracks_session_until_classified() -> Result<()> {
    let mut h = start_crawler(&test_config(), &NodeSet::new()).await?;
    let (mut stream, _) = connect(h.addr, &peer_hello(7, "go-opera")).await?;
    status_exchange(&mut stream, peer_status()).await?;

    let peers = h.crawler.engine().peers().snapshot();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].status(), PeerStatus::Fetching);

    stream.write_frame(progress_frame(1, 1)).await?;
    expect_disconnect(&mut stream, DiscReason::Requested).await;
    h.next_update().await?;
    assert!(h.crawler.engine().peers().is_empty());
    h.crawler.stop().await;
    Ok(())
}
