use crate::*;

use tokio::net::TcpListener;

// ══════════════════════════════════════════════════════════════════════════════
//  Startup failures
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn bootnode_without_scheme_is_accepted() {
    let mut config = test_config();
    config.network.bootnodes = vec![format!("{}@1.2.3.4:30303", hex::encode([3u8; 32]))];
    assert!(Crawler::new(&genesis_store(), &config).is_ok());
}

#[test]
fn bootnode_with_invalid_id_is_fatal() {
    let mut config = test_config();
    config.network.bootnodes = vec!["abc@1.2.3.4:30303".into()];
    assert!(Crawler::new(&genesis_store(), &config).is_err());
}

#[test]
fn inconsistent_genesis_is_fatal() {
    let mut store = genesis_store();
    store.epochs[0].epoch_state.rules.network_id = 4002;
    assert!(Crawler::new(&store, &test_config()).is_err());
}

#[tokio::test]
async fn listen_failure_is_fatal() -> Result<()> {
    let taken = TcpListener::bind("127.0.0.1:0").await?;
    let mut config = test_config();
    config.network.listen_addr = taken.local_addr()?.to_string();

    let mut crawler = Crawler::new(&genesis_store(), &config)?;
    let err = crawler.start(&NodeSet::new(), |_| {}).await.unwrap_err();
    assert!(format!("{err:#}").contains("starting p2p server"));
    assert!(crawler.local_addr().is_none());
    Ok(())
}
