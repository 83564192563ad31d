use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use crate::error::{Error, Result};
use crate::ingest::connectors::{RawTick, SnapshotSource};
use crate::ingest::transport::{Connector, FeedSocket};
use crate::store::PriceStore;

pub(crate) struct ChannelSocket {
    outbound: mpsc::UnboundedSender<Message>,
    inbound: mpsc::UnboundedReceiver<Result<Message>>,
}

#[async_trait]
impl FeedSocket for ChannelSocket {
    async fn send(&mut self, message: Message) -> Result<()> {
        self.outbound.send(message).map_err(|_| Error::ConnectionClosed)
    }

    async fn recv(&mut self) -> Option<Result<Message>> {
        self.inbound.recv().await
    }

    async fn close(&mut self) {
        self.inbound.close();
    }
}

/// The exchange side of a `ChannelSocket`.
pub(crate) struct PeerEnd {
    pub from_client: mpsc::UnboundedReceiver<Message>,
    pub to_client: mpsc::UnboundedSender<Result<Message>>,
}

pub(crate) fn socket_pair() -> (ChannelSocket, PeerEnd) {
    let (outbound, from_client) = mpsc::unbounded_channel();
    let (to_client, inbound) = mpsc::unbounded_channel();
    (
        ChannelSocket { outbound, inbound },
        PeerEnd { from_client, to_client },
    )
}

/// Hands out pre-built sockets in order, refusing once the queue is empty.
#[derive(Default)]
pub(crate) struct QueueConnector {
    sockets: Mutex<VecDeque<ChannelSocket>>,
    attempts: AtomicU32,
}

impl QueueConnector {
    pub fn push(&self, socket: ChannelSocket) {
        self.sockets.lock().unwrap().push_back(socket);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for QueueConnector {
    async fn connect(&self, _endpoint: &str) -> Result<Box<dyn FeedSocket>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.sockets.lock().unwrap().pop_front() {
            Some(socket) => Ok(Box::new(socket)),
            None => Err(Error::Transport("connection refused".to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct PeerRequest {
    pub op: String,
    pub topic: String,
}

/// Scripted Bybit-style peer: acks every subscription except `reject`,
/// answers pings unless `silent_heartbeat`.
pub(crate) struct BybitPeer {
    pub requests: Arc<Mutex<Vec<PeerRequest>>>,
    pub to_client: mpsc::UnboundedSender<Result<Message>>,
}

impl BybitPeer {
    pub fn spawn(peer: PeerEnd, reject: &[&str], silent_heartbeat: bool) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let log = requests.clone();
        let reject: Vec<String> = reject.iter().map(|s| format!("tickers.{}", s)).collect();
        let PeerEnd { mut from_client, to_client } = peer;
        let replies = to_client.clone();

        tokio::spawn(async move {
            while let Some(message) = from_client.recv().await {
                let Message::Text(text) = message else { continue };
                let Ok(request) = serde_json::from_str::<Value>(&text) else { continue };
                let op = request["op"].as_str().unwrap_or_default().to_string();
                let req_id = request["req_id"].clone();

                let reply = match op.as_str() {
                    "ping" if silent_heartbeat => None,
                    "ping" => Some(json!({"success": true, "ret_msg": "pong", "op": "ping", "req_id": req_id})),
                    "subscribe" | "unsubscribe" => {
                        let topic = request["args"][0].as_str().unwrap_or_default().to_string();
                        let ok = !reject.contains(&topic);
                        log.lock().unwrap().push(PeerRequest { op: op.clone(), topic });
                        Some(json!({
                            "success": ok,
                            "ret_msg": if ok { "" } else { "Invalid symbol" },
                            "op": op,
                            "req_id": req_id,
                        }))
                    }
                    _ => None,
                };

                if let Some(reply) = reply {
                    if replies.send(Ok(Message::Text(reply.to_string()))).is_err() {
                        break;
                    }
                }
            }
        });

        BybitPeer { requests, to_client }
    }

    pub fn requests(&self) -> Vec<PeerRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn push_tick(&self, symbol: &str, price: &str, ts: i64) {
        let frame = json!({
            "topic": format!("tickers.{}", symbol),
            "type": "snapshot",
            "ts": ts,
            "data": {"symbol": symbol, "lastPrice": price, "volume24h": "1000.5"},
        });
        let _ = self.to_client.send(Ok(Message::Text(frame.to_string())));
    }

    pub fn push_raw(&self, text: &str) {
        let _ = self.to_client.send(Ok(Message::Text(text.to_string())));
    }
}

/// Store whose writes never complete.
#[derive(Default)]
pub(crate) struct HungStore {
    calls: AtomicU32,
}

impl HungStore {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceStore for HungStore {
    async fn upsert(&self, _key: &str, _fields: &[(&'static str, String)], _ttl: Duration) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }

    async fn fetch_all(&self, _key: &str) -> Result<HashMap<String, String>> {
        std::future::pending().await
    }

    async fn fetch_field(&self, _key: &str, _field: &str) -> Result<Option<String>> {
        std::future::pending().await
    }
}

/// Snapshot source that replays queued responses, failing once they run out.
#[derive(Default)]
pub(crate) struct ScriptedSource {
    responses: Mutex<VecDeque<Result<Vec<RawTick>>>>,
    calls: AtomicU32,
}

impl ScriptedSource {
    pub fn push(&self, response: Result<Vec<RawTick>>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotSource for ScriptedSource {
    fn venue(&self) -> &'static str {
        "scripted"
    }

    fn endpoint(&self) -> &str {
        "http://scripted.invalid"
    }

    async fn fetch(&self) -> Result<Vec<RawTick>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Transport("HTTP 503".to_string())))
    }
}

pub(crate) fn contract(symbol: &str, price: &str, funding: Option<&str>, estimated: Option<&str>) -> RawTick {
    RawTick {
        symbol: symbol.to_string(),
        price: Some(price.to_string()),
        exchange_ts: None,
        volume_24h: None,
        funding_rate: funding.map(str::to_string),
        estimated_funding_rate: estimated.map(str::to_string),
    }
}
