use std::collections::HashMap;
use std::time::Duration;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use crate::error::{Error, Result};
use crate::ingest::connectors::{RawTick, SnapshotSource};
use crate::utils::helper::millis_to_utc;

/// CoinDCX futures real-time price snapshot over REST.
///
/// ## Wire format
/// `GET .../current_prices/futures/rt` returns every contract at once:
/// `{"ts":1714564800000,"prices":{"B-BTC_USDT":{"ls":67250.5,"v":1234.5,"fr":0.0001,"efr":0.00012}}}`.
/// Values arrive as JSON numbers or strings; any of them may be absent.
pub struct CoinDcxFutures {
    client: reqwest::Client,
    endpoint: String,
}

impl CoinDcxFutures {
    pub fn new(endpoint: String, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::ConfigError(format!("cannot build HTTP client: {}", e)))?;
        Ok(CoinDcxFutures { client, endpoint })
    }
}

#[async_trait]
impl SnapshotSource for CoinDcxFutures {
    fn venue(&self) -> &'static str {
        "coindcx_futures"
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn fetch(&self) -> Result<Vec<RawTick>> {
        let body = self
            .client
            .get(&self.endpoint)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        decode_snapshot(&body)
    }
}

#[derive(Deserialize)]
struct Snapshot {
    ts: Option<i64>,
    prices: HashMap<String, Contract>,
}

#[derive(Deserialize)]
struct Contract {
    ls: Option<Value>,
    v: Option<Value>,
    fr: Option<Value>,
    efr: Option<Value>,
}

pub fn decode_snapshot(body: &str) -> Result<Vec<RawTick>> {
    let snapshot: Snapshot = serde_json::from_str(body)
        .map_err(|e| Error::Protocol(format!("unrecognised coindcx snapshot: {}", e)))?;
    let exchange_ts = snapshot.ts.and_then(millis_to_utc);

    let mut ticks: Vec<RawTick> = snapshot
        .prices
        .into_iter()
        .map(|(symbol, contract)| RawTick {
            symbol,
            price: contract.ls.as_ref().and_then(as_text),
            exchange_ts,
            volume_24h: contract.v.as_ref().and_then(as_text),
            funding_rate: contract.fr.as_ref().and_then(as_text),
            estimated_funding_rate: contract.efr.as_ref().and_then(as_text),
        })
        .collect();
    ticks.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    Ok(ticks)
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
