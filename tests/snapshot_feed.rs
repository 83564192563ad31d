mod common;

use std::sync::Arc;
use std::time::Duration;
use common::{eventually, wait_for_streaming};
use ltp_relay::config::{EngineTunables, FeedConfig, FeedKind};
use ltp_relay::ingest::transport::WsConnector;
use ltp_relay::ingest::{ConnectionPhase, FeedEngine, WritePolicy};
use ltp_relay::store::{MemoryStore, PriceStore};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SNAPSHOT: &str = r#"{"ts":1714564800000,"vs":1,"prices":{
    "B-BTC_USDT":{"ls":"67250.5","v":"1234.5","fr":0.0001,"efr":0.00012,"mp":67251.0},
    "B-ETH_USDT":{"ls":3100.25,"fr":-0.000212},
    "B-DOGE_USDT":{"ls":"0.15"}
}}"#;

fn dcx_config(server: &MockServer, symbols: &[&str]) -> FeedConfig {
    let mut config = FeedConfig::new("dcx-it", FeedKind::CoindcxFutures, symbols);
    config.endpoint = Some(format!("{}/market_data/v3/current_prices/futures/rt", server.uri()));
    config.tunables = EngineTunables {
        poll_interval_secs: 1,
        reconnect_base_ms: 50,
        reconnect_cap_ms: 200,
        handshake_timeout_secs: 2,
        ..EngineTunables::default()
    };
    config
}

async fn mount_snapshot(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/market_data/v3/current_prices/futures/rt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SNAPSHOT))
        .mount(server)
        .await;
}

#[tokio::test]
async fn polled_snapshot_lands_with_both_funding_rates() {
    let server = MockServer::start().await;
    mount_snapshot(&server).await;
    let store = Arc::new(MemoryStore::new());
    let config = dcx_config(&server, &["B-BTC_USDT", "B-ETH_USDT"]);

    let (handle, engine) = FeedEngine::build(
        &config,
        store.clone(),
        WritePolicy::with_ttl(Duration::from_secs(3600)),
        Arc::new(WsConnector),
    )
    .unwrap();
    let task = tokio::spawn(engine.run());
    wait_for_streaming(&handle, 1).await;

    assert!(eventually(|| store.keys().len() == 2).await);
    assert_eq!(
        store.keys(),
        vec!["coindcx_futures:BTC".to_string(), "coindcx_futures:ETH".to_string()]
    );

    let btc = store.fetch_all("coindcx_futures:BTC").await.unwrap();
    assert_eq!(btc["ltp"], "67250.5");
    assert_eq!(btc["original_symbol"], "B-BTC_USDT");
    assert_eq!(btc["timestamp"], "2024-05-01T12:00:00.000Z");
    assert_eq!(btc["volume_24h"], "1234.5");
    assert_eq!(btc["current_funding_rate"], "0.0001");
    assert_eq!(btc["estimated_funding_rate"], "0.00012");
    assert!(btc.contains_key("funding_timestamp"));

    let eth = store.fetch_all("coindcx_futures:ETH").await.unwrap();
    assert_eq!(eth["ltp"], "3100.25");
    assert_eq!(eth["current_funding_rate"], "-0.000212");
    assert!(!eth.contains_key("estimated_funding_rate"));

    // keeps polling on the interval
    assert!(eventually(|| handle.health().total_messages >= 4).await);

    handle.shutdown().await;
    task.await.unwrap().unwrap();
    assert_eq!(handle.status().phase, ConnectionPhase::ShuttingDown);
}

#[tokio::test]
async fn server_error_backs_off_and_recovers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_snapshot(&server).await;

    let store = Arc::new(MemoryStore::new());
    let config = dcx_config(&server, &["B-BTC_USDT"]);
    let (handle, engine) = FeedEngine::build(
        &config,
        store.clone(),
        WritePolicy::with_ttl(Duration::from_secs(3600)),
        Arc::new(WsConnector),
    )
    .unwrap();
    let task = tokio::spawn(engine.run());

    wait_for_streaming(&handle, 1).await;
    assert_eq!(handle.health().reconnect_count, 1);
    assert_eq!(handle.status().consecutive_failures, 0);
    assert!(eventually(|| store.keys() == vec!["coindcx_futures:BTC".to_string()]).await);

    handle.shutdown().await;
    task.await.unwrap().unwrap();
}
