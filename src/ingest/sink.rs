use std::collections::HashMap;
use std::str::FromStr;
use chrono::Utc;
use rust_decimal::Decimal;
use crate::error::{Error, Result};
use crate::ingest::connectors::RawTick;
use crate::ingest::dispatcher::Inbound;
use crate::ingest::reconciler::SubscriptionSet;
use crate::ingest::writer::StorageWriter;
use crate::observability::metrics;
use crate::types::{FundingInfo, InstrumentSymbol, PriceRecord};

/// Turns raw ticks into full price records and hands them to the writer.
///
/// Venues that publish deltas omit unchanged fields, and every upsert replaces
/// the whole hash, so the last record per instrument is kept and each tick is
/// merged onto it field by field. The cache only lives as long as the
/// subscription it belongs to.
pub struct TickSink {
    feed: String,
    latest: HashMap<String, PriceRecord>,
    writer: StorageWriter,
}

impl TickSink {
    pub fn new(feed: &str, writer: StorageWriter) -> Self {
        TickSink {
            feed: feed.to_string(),
            latest: HashMap::new(),
            writer,
        }
    }

    pub async fn accept(&mut self, tick: RawTick, active: &SubscriptionSet) -> Inbound {
        let record = match self.merge(tick, active) {
            Ok(Some(record)) => record,
            // a delta for an instrument we have no snapshot of yet
            Ok(None) => return Inbound::Ignored,
            Err(e) => {
                let reason = match e {
                    Error::UnknownInstrument(_) => "unknown_instrument",
                    _ => "invalid_price",
                };
                drop_frame(&self.feed, reason, &e);
                return Inbound::Dropped;
            }
        };

        metrics::TICKS_ACCEPTED.with_label_values(&[&self.feed]).inc();
        // Store outages are logged by the writer and do not affect the stream.
        let _ = self.writer.write(&record).await;
        Inbound::Accepted
    }

    /// Validates a tick against the active set and folds it into the last
    /// known record for its instrument.
    pub fn merge(&mut self, tick: RawTick, active: &SubscriptionSet) -> Result<Option<PriceRecord>> {
        let symbol = active
            .find_exchange(&tick.symbol)
            .ok_or_else(|| Error::UnknownInstrument(tick.symbol.clone()))?;
        let previous = self.latest.get(symbol.exchange());
        let observed_at = Utc::now();

        let (ltp, timestamp) = match &tick.price {
            Some(raw) => {
                let price = raw.trim();
                match Decimal::from_str(price) {
                    Ok(value) if value > Decimal::ZERO => {}
                    _ => {
                        return Err(Error::InvalidPrice {
                            symbol: tick.symbol.clone(),
                            price: raw.clone(),
                        });
                    }
                }
                (price.to_string(), tick.exchange_ts.unwrap_or(observed_at))
            }
            None => match previous {
                Some(previous) => (previous.ltp.clone(), previous.timestamp),
                None => return Ok(None),
            },
        };

        let previous_funding = previous.and_then(|p| p.funding.as_ref());
        let funding = if tick.funding_rate.is_some() || tick.estimated_funding_rate.is_some() {
            Some(FundingInfo {
                current_rate: tick
                    .funding_rate
                    .or_else(|| previous_funding.and_then(|f| f.current_rate.clone())),
                estimated_rate: tick
                    .estimated_funding_rate
                    .or_else(|| previous_funding.and_then(|f| f.estimated_rate.clone())),
                timestamp: observed_at,
            })
        } else {
            previous_funding.cloned()
        };

        let record = PriceRecord {
            short_symbol: symbol.short().to_string(),
            original_symbol: symbol.exchange().to_string(),
            ltp,
            timestamp,
            volume_24h: tick
                .volume_24h
                .or_else(|| previous.and_then(|p| p.volume_24h.clone())),
            funding,
        };

        self.latest.insert(symbol.exchange().to_string(), record.clone());
        Ok(Some(record))
    }

    pub fn forget(&mut self, symbol: &InstrumentSymbol) {
        self.latest.remove(symbol.exchange());
    }

    /// Drops every cached record; the next session starts from snapshots.
    pub fn clear(&mut self) {
        self.latest.clear();
    }
}

pub(crate) fn drop_frame(feed: &str, reason: &str, error: &Error) {
    metrics::FRAMES_DROPPED.with_label_values(&[feed, reason]).inc();
    tracing::warn!(feed = %feed, reason, error = %error, "Dropping inbound frame");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use crate::ingest::writer::WritePolicy;
    use crate::store::{MemoryStore, PriceStore};
    use crate::types::SymbolRules;
    use crate::utils::helper::millis_to_utc;

    fn fixture() -> (TickSink, Arc<MemoryStore>, SubscriptionSet) {
        let store = Arc::new(MemoryStore::new());
        let writer = StorageWriter::new(
            "test",
            store.clone(),
            "feed",
            WritePolicy::with_ttl(Duration::from_secs(60)),
        );
        let active: SubscriptionSet = ["BTCUSDT", "ETHUSDT"]
            .iter()
            .map(|s| InstrumentSymbol::parse(s, &SymbolRules::default()).unwrap())
            .collect();
        (TickSink::new("test", writer), store, active)
    }

    fn tick(symbol: &str, price: Option<&str>) -> RawTick {
        RawTick {
            symbol: symbol.to_string(),
            price: price.map(str::to_string),
            exchange_ts: millis_to_utc(1_714_564_800_125),
            volume_24h: None,
            funding_rate: None,
            estimated_funding_rate: None,
        }
    }

    #[test]
    fn rejects_non_positive_and_unparsable_prices() {
        let (mut sink, _, active) = fixture();
        for price in ["0", "-1.5", "abc", "", "NaN"] {
            assert!(
                matches!(sink.merge(tick("BTCUSDT", Some(price)), &active), Err(Error::InvalidPrice { .. })),
                "price {:?} should be rejected",
                price
            );
        }
    }

    #[test]
    fn unknown_instrument_is_rejected() {
        let (mut sink, _, active) = fixture();
        assert!(matches!(
            sink.merge(tick("DOGEUSDT", Some("0.15")), &active),
            Err(Error::UnknownInstrument(_))
        ));
    }

    #[test]
    fn missing_exchange_timestamp_falls_back_to_now() {
        let (mut sink, _, active) = fixture();
        let mut raw = tick("BTCUSDT", Some("1"));
        raw.exchange_ts = None;

        let before = Utc::now();
        let record = sink.merge(raw, &active).unwrap().unwrap();
        assert!(record.timestamp >= before);
    }

    #[test]
    fn delta_before_any_snapshot_yields_nothing() {
        let (mut sink, _, active) = fixture();
        let mut delta = tick("ETHUSDT", None);
        delta.funding_rate = Some("0.0001".into());
        assert_eq!(sink.merge(delta, &active).unwrap(), None);
    }

    #[tokio::test]
    async fn price_only_delta_keeps_snapshot_funding_and_volume() {
        let (mut sink, store, active) = fixture();

        let mut snapshot = tick("ETHUSDT", Some("3100.25"));
        snapshot.volume_24h = Some("52000.1".into());
        snapshot.funding_rate = Some("-0.000212".into());
        assert_eq!(sink.accept(snapshot, &active).await, Inbound::Accepted);
        let funding_ts = store.fetch_all("feed:ETH").await.unwrap()["funding_timestamp"].clone();

        let mut delta = tick("ETHUSDT", Some("3101.00"));
        delta.exchange_ts = millis_to_utc(1_714_564_801_000);
        assert_eq!(sink.accept(delta, &active).await, Inbound::Accepted);

        let fields = store.fetch_all("feed:ETH").await.unwrap();
        assert_eq!(fields["ltp"], "3101.00");
        assert_eq!(fields["timestamp"], "2024-05-01T12:00:01.000Z");
        assert_eq!(fields["volume_24h"], "52000.1");
        assert_eq!(fields["current_funding_rate"], "-0.000212");
        assert_eq!(fields["funding_timestamp"], funding_ts);
    }

    #[tokio::test]
    async fn funding_only_delta_keeps_last_price() {
        let (mut sink, store, active) = fixture();
        sink.accept(tick("ETHUSDT", Some("3100.25")), &active).await;

        let mut delta = tick("ETHUSDT", None);
        delta.exchange_ts = millis_to_utc(1_714_564_860_000);
        delta.funding_rate = Some("0.0003".into());
        assert_eq!(sink.accept(delta, &active).await, Inbound::Accepted);

        let fields = store.fetch_all("feed:ETH").await.unwrap();
        assert_eq!(fields["ltp"], "3100.25");
        assert_eq!(fields["timestamp"], "2024-05-01T12:00:00.125Z");
        assert_eq!(fields["current_funding_rate"], "0.0003");
    }

    #[test]
    fn estimated_rate_update_keeps_current_rate() {
        let (mut sink, _, active) = fixture();
        let mut first = tick("BTCUSDT", Some("1"));
        first.funding_rate = Some("0.0001".into());
        sink.merge(first, &active).unwrap();

        let mut second = tick("BTCUSDT", Some("2"));
        second.estimated_funding_rate = Some("0.0002".into());
        let funding = sink.merge(second, &active).unwrap().unwrap().funding.unwrap();

        assert_eq!(funding.current_rate.as_deref(), Some("0.0001"));
        assert_eq!(funding.estimated_rate.as_deref(), Some("0.0002"));
    }

    #[test]
    fn forget_and_clear_drop_cached_fields() {
        let (mut sink, _, active) = fixture();
        for symbol in ["BTCUSDT", "ETHUSDT"] {
            let mut snapshot = tick(symbol, Some("10"));
            snapshot.volume_24h = Some("5".into());
            sink.merge(snapshot, &active).unwrap();
        }

        let btc = active.find_exchange("BTCUSDT").unwrap().clone();
        sink.forget(&btc);
        assert_eq!(sink.merge(tick("BTCUSDT", None), &active).unwrap(), None);
        let eth = sink.merge(tick("ETHUSDT", Some("11")), &active).unwrap().unwrap();
        assert_eq!(eth.volume_24h.as_deref(), Some("5"));

        sink.clear();
        let eth = sink.merge(tick("ETHUSDT", Some("12")), &active).unwrap().unwrap();
        assert_eq!(eth.volume_24h, None);
    }
}
