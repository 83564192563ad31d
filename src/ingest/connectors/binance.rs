use serde::Deserialize;
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;
use crate::error::{Error, Result};
use crate::ingest::connectors::{FeedProtocol, Frame, RawTick, SubscriptionOp};
use crate::types::InstrumentSymbol;
use crate::utils::helper::millis_to_utc;

const HEARTBEAT_PAYLOAD: &[u8] = b"ltp-relay";

/// Binance spot trade stream on the combined `/ws` endpoint. Liveness uses
/// WebSocket ping frames; the server answers with pong frames.
pub struct BinanceSpot {
    endpoint: String,
}

impl BinanceSpot {
    pub fn new(endpoint: String) -> Self {
        BinanceSpot { endpoint }
    }
}

impl FeedProtocol for BinanceSpot {
    fn venue(&self) -> &'static str {
        "binance_spot"
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
        let method = match op {
            SubscriptionOp::Subscribe => "SUBSCRIBE",
            SubscriptionOp::Unsubscribe => "UNSUBSCRIBE",
        };
        let request = json!({
            "method": method,
            "params": [format!("{}@trade", symbol.exchange().to_ascii_lowercase())],
            "id": request_id,
        });
        Message::Text(request.to_string())
    }

    fn heartbeat(&self, _request_id: u64) -> Message {
        Message::Ping(HEARTBEAT_PAYLOAD.to_vec())
    }

    fn decode(&self, text: &str) -> Result<Frame> {
        let frame: BinanceFrame = serde_json::from_str(text)
            .map_err(|e| Error::Protocol(format!("unrecognised binance frame: {}", e)))?;

        Ok(match frame {
            BinanceFrame::Trade(trade) if trade.event == "trade" => Frame::Tick(RawTick {
                symbol: trade.symbol,
                price: Some(trade.price),
                exchange_ts: millis_to_utc(trade.trade_time),
                volume_24h: None,
                funding_rate: None,
                estimated_funding_rate: None,
            }),
            BinanceFrame::Trade(_) => Frame::Ignored,
            BinanceFrame::Response(response) => {
                let failure = response
                    .error
                    .map(|e| format!("{} ({})", e.msg, e.code))
                    .or_else(|| response.msg.clone());
                match (response.id, failure) {
                    (Some(request_id), failure) => Frame::Ack {
                        request_id,
                        success: failure.is_none() && response.code.is_none(),
                        message: failure.unwrap_or_default(),
                    },
                    (None, Some(msg)) => Frame::Notice(msg),
                    (None, None) => Frame::Ignored,
                }
            }
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BinanceFrame {
    Trade(BinanceTrade),
    Response(BinanceResponse),
}

#[derive(Deserialize)]
struct BinanceTrade {
    #[serde(rename = "e")]
    event: String,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "T")]
    trade_time: i64,
}

#[derive(Deserialize)]
struct BinanceResponse {
    id: Option<u64>,
    code: Option<i64>,
    msg: Option<String>,
    error: Option<BinanceError>,
}

#[derive(Deserialize)]
struct BinanceError {
    code: i64,
    msg: String,
}
