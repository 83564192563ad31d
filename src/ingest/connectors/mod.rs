pub mod binance;
pub mod bybit;
pub mod coindcx;

use std::sync::Arc;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_tungstenite::tungstenite::Message;
use crate::config::{FeedConfig, FeedKind};
use crate::error::Result;
use crate::types::InstrumentSymbol;

pub use binance::BinanceSpot;
pub use bybit::{BybitFeed, BybitMarket};
pub use coindcx::CoinDcxFutures;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionOp {
    Subscribe,
    Unsubscribe,
}

/// Price observation exactly as the venue reported it. Delta frames may
/// omit any field, including the price.
#[derive(Clone, Debug, PartialEq)]
pub struct RawTick {
    pub symbol: String,
    pub price: Option<String>,
    pub exchange_ts: Option<DateTime<Utc>>,
    pub volume_24h: Option<String>,
    pub funding_rate: Option<String>,
    pub estimated_funding_rate: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Tick(RawTick),
    Ack {
        request_id: u64,
        success: bool,
        message: String,
    },
    Heartbeat,
    /// Error pushed by the venue outside any request.
    Notice(String),
    /// Well-formed but carries nothing this feed cares about.
    Ignored,
}

/// Wire dialect of one venue: how requests are spelled and how inbound
/// frames are classified.
pub trait FeedProtocol: Send + Sync {
    fn venue(&self) -> &'static str;

    fn endpoint(&self) -> &str;

    fn subscription_request(
        &self,
        op: SubscriptionOp,
        request_id: u64,
        symbol: &InstrumentSymbol,
    ) -> Message;

    fn heartbeat(&self, request_id: u64) -> Message;

    fn decode(&self, text: &str) -> Result<Frame>;
}

/// Venue that only offers full snapshots on request.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    fn venue(&self) -> &'static str;

    fn endpoint(&self) -> &str;

    /// One tick per listed instrument, whether or not it is subscribed.
    async fn fetch(&self) -> Result<Vec<RawTick>>;
}

/// How a feed gets its prices.
#[derive(Clone)]
pub enum FeedSource {
    Stream(Arc<dyn FeedProtocol>),
    Poll(Arc<dyn SnapshotSource>),
}

impl FeedSource {
    pub fn venue(&self) -> &'static str {
        match self {
            FeedSource::Stream(protocol) => protocol.venue(),
            FeedSource::Poll(source) => source.venue(),
        }
    }
}

pub fn build_source(feed: &FeedConfig) -> Result<FeedSource> {
    let endpoint = feed.endpoint().to_string();
    Ok(match feed.kind {
        FeedKind::BybitSpot => {
            FeedSource::Stream(Arc::new(BybitFeed::new(BybitMarket::Spot, endpoint)))
        }
        FeedKind::BybitLinear => {
            FeedSource::Stream(Arc::new(BybitFeed::new(BybitMarket::Linear, endpoint)))
        }
        FeedKind::BinanceSpot => FeedSource::Stream(Arc::new(BinanceSpot::new(endpoint))),
        FeedKind::CoindcxFutures => FeedSource::Poll(Arc::new(CoinDcxFutures::new(
            endpoint,
            feed.tunables.handshake_timeout(),
        )?)),
    })
}
