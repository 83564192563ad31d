use serde::Deserialize;
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;
use crate::error::{Error, Result};
use crate::ingest::connectors::{FeedProtocol, Frame, RawTick, SubscriptionOp};
use crate::types::InstrumentSymbol;
use crate::utils::helper::millis_to_utc;

const TICKER_TOPIC: &str = "tickers.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BybitMarket {
    Spot,
    Linear,
}

/// Bybit v5 public ticker stream.
///
/// ## Wire format
/// Requests: `{"req_id":"7","op":"subscribe","args":["tickers.BTCUSDT"]}`.
/// Acks echo `op` and `req_id` with a `success` flag. Heartbeat replies arrive
/// as `op: "pong"` on spot or `op: "ping"` with `ret_msg: "pong"` on linear.
/// Linear deltas omit unchanged fields; the dispatcher merges them onto the
/// last snapshot. A delta carrying none of the fields we track is skipped.
pub struct BybitFeed {
    market: BybitMarket,
    endpoint: String,
}

impl BybitFeed {
    pub fn new(market: BybitMarket, endpoint: String) -> Self {
        BybitFeed { market, endpoint }
    }
}

impl FeedProtocol for BybitFeed {
    fn venue(&self) -> &'static str {
        match self.market {
            BybitMarket::Spot => "bybit_spot",
            BybitMarket::Linear => "bybit_linear",
        }
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn subscription_request(
        &self,
        op: SubscriptionOp,
        request_id: u64,
        symbol: &InstrumentSymbol,
    ) -> Message {
        let op = match op {
            SubscriptionOp::Subscribe => "subscribe",
            SubscriptionOp::Unsubscribe => "unsubscribe",
        };
        let request = json!({
            "req_id": request_id.to_string(),
            "op": op,
            "args": [format!("{}{}", TICKER_TOPIC, symbol.exchange())],
        });
        Message::Text(request.to_string())
    }

    fn heartbeat(&self, request_id: u64) -> Message {
        Message::Text(json!({"req_id": request_id.to_string(), "op": "ping"}).to_string())
    }

    fn decode(&self, text: &str) -> Result<Frame> {
        let envelope: BybitEnvelope = serde_json::from_str(text)?;

        if let Some(op) = envelope.op.as_deref() {
            return Ok(match op {
                "pong" => Frame::Heartbeat,
                "ping" if envelope.ret_msg.as_deref() == Some("pong") => Frame::Heartbeat,
                "subscribe" | "unsubscribe" => {
                    let request_id = envelope
                        .req_id
                        .as_deref()
                        .and_then(|id| id.parse::<u64>().ok())
                        .ok_or_else(|| Error::Protocol(format!("{} ack without req_id", op)))?;
                    Frame::Ack {
                        request_id,
                        success: envelope.success.unwrap_or(false),
                        message: envelope.ret_msg.unwrap_or_default(),
                    }
                }
                _ if envelope.success == Some(false) => {
                    Frame::Notice(envelope.ret_msg.unwrap_or_default())
                }
                _ => Frame::Ignored,
            });
        }

        let Some(topic) = envelope.topic.as_deref() else {
            return Err(Error::Protocol("frame has neither op nor topic".to_string()));
        };
        if !topic.starts_with(TICKER_TOPIC) {
            return Ok(Frame::Ignored);
        }

        let data: BybitTicker = match envelope.data {
            Some(data) => serde_json::from_value(data)?,
            None => return Err(Error::Protocol(format!("{} frame without data", topic))),
        };

        if data.last_price.is_none() && data.volume_24h.is_none() && data.funding_rate.is_none() {
            return Ok(Frame::Ignored);
        }

        Ok(Frame::Tick(RawTick {
            symbol: data.symbol,
            price: data.last_price,
            exchange_ts: envelope.ts.and_then(millis_to_utc),
            volume_24h: data.volume_24h,
            funding_rate: data.funding_rate,
            estimated_funding_rate: None,
        }))
    }
}

#[derive(Deserialize)]
struct BybitEnvelope {
    op: Option<String>,
    success: Option<bool>,
    ret_msg: Option<String>,
    req_id: Option<String>,
    topic: Option<String>,
    ts: Option<i64>,
    data: Option<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BybitTicker {
    symbol: String,
    last_price: Option<String>,
    volume_24h: Option<String>,
    funding_rate: Option<String>,
}
