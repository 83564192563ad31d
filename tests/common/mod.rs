#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use ltp_relay::config::{EngineTunables, FeedConfig, FeedKind};
use ltp_relay::error::{Error, Result};
use ltp_relay::ingest::{ConnectionPhase, FeedHandle};
use ltp_relay::store::{MemoryStore, PriceStore};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

#[derive(Clone, Default)]
pub struct Behaviour {
    /// Topics answered with `success: false`.
    pub reject: Vec<String>,
    /// Leave application-level pings unanswered.
    pub ignore_pings: bool,
}

/// Minimal Bybit-flavoured WebSocket server on a random local port.
pub struct MockExchange {
    pub url: String,
    connections: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<(String, String)>>>,
    frames: broadcast::Sender<String>,
}

impl MockExchange {
    pub async fn start(behaviour: Behaviour) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let connections = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let (frames, _) = broadcast::channel(256);

        let accepted = connections.clone();
        let log = requests.clone();
        let outbound = frames.clone();
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let Ok(ws) = accept_async(tcp).await else { continue };
                accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(ws, behaviour.clone(), log.clone(), outbound.subscribe()));
            }
        });

        MockExchange { url, connections, requests, frames }
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn push_tick(&self, symbol: &str, price: &str, ts: i64) {
        self.push_raw(
            &json!({
                "topic": format!("tickers.{}", symbol),
                "type": "snapshot",
                "ts": ts,
                "data": {"symbol": symbol, "lastPrice": price, "volume24h": "4200.1"},
            })
            .to_string(),
        );
    }

    pub fn push_raw(&self, frame: &str) {
        let _ = self.frames.send(frame.to_string());
    }
}

async fn serve(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    behaviour: Behaviour,
    log: Arc<Mutex<Vec<(String, String)>>>,
    mut frames: broadcast::Receiver<String>,
) {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            incoming = stream.next() => {
                let Some(Ok(message)) = incoming else { break };
                let Message::Text(text) = message else { continue };
                let Ok(request) = serde_json::from_str::<Value>(&text) else { continue };
                let op = request["op"].as_str().unwrap_or_default().to_string();

                let reply = match op.as_str() {
                    "ping" if behaviour.ignore_pings => None,
                    "ping" => Some(json!({"success": true, "ret_msg": "pong", "op": "ping", "req_id": request["req_id"]})),
                    "subscribe" | "unsubscribe" => {
                        let topic = request["args"][0].as_str().unwrap_or_default().to_string();
                        let ok = !behaviour.reject.contains(&topic);
                        log.lock().unwrap().push((op.clone(), topic));
                        Some(json!({
                            "success": ok,
                            "ret_msg": if ok { "" } else { "Invalid symbol" },
                            "op": op,
                            "req_id": request["req_id"],
                        }))
                    }
                    _ => None,
                };

                if let Some(reply) = reply {
                    if sink.send(Message::Text(reply.to_string())).await.is_err() {
                        break;
                    }
                }
            }
            frame = frames.recv() => {
                let Ok(frame) = frame else { break };
                if sink.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Memory store that can be switched off to simulate an outage.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    down: AtomicBool,
}

impl FlakyStore {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl PriceStore for FlakyStore {
    async fn upsert(&self, key: &str, fields: &[(&'static str, String)], ttl: Duration) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(Error::Storage("connection refused".to_string()));
        }
        self.inner.upsert(key, fields, ttl).await
    }

    async fn fetch_all(&self, key: &str) -> Result<HashMap<String, String>> {
        self.inner.fetch_all(key).await
    }

    async fn fetch_field(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.inner.fetch_field(key, field).await
    }
}

pub fn feed_config(endpoint: &str, symbols: &[&str]) -> FeedConfig {
    let mut config = FeedConfig::new("it", FeedKind::BybitSpot, symbols);
    config.namespace = Some("feed".to_string());
    config.endpoint = Some(endpoint.to_string());
    config.tunables = EngineTunables {
        reconnect_base_ms: 50,
        reconnect_cap_ms: 200,
        ack_timeout_ms: 500,
        handshake_timeout_secs: 2,
        heartbeat_interval_secs: 1,
        heartbeat_timeout_secs: 1,
        ..EngineTunables::default()
    };
    config
}

pub async fn wait_for_streaming(handle: &FeedHandle, session: u64) {
    let mut status = handle.watch_status();
    tokio::time::timeout(
        Duration::from_secs(10),
        status.wait_for(|s| s.phase == ConnectionPhase::Streaming && s.session == session),
    )
    .await
    .expect("feed did not reach STREAMING in time")
    .unwrap();
}

/// Polls `check` until it holds or five seconds pass.
pub async fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}
