use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::observability::metrics;
use crate::store::PriceStore;
use crate::types::PriceRecord;

/// How long a single upsert may take and how long to stop writing after one fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WritePolicy {
    pub ttl: Duration,
    pub timeout: Duration,
    pub outage_backoff: Duration,
}

impl WritePolicy {
    pub fn with_ttl(ttl: Duration) -> Self {
        WritePolicy {
            ttl,
            timeout: Duration::from_secs(1),
            outage_backoff: Duration::from_secs(5),
        }
    }
}

impl From<&StoreConfig> for WritePolicy {
    fn from(config: &StoreConfig) -> Self {
        WritePolicy {
            ttl: config.ttl(),
            timeout: config.write_timeout(),
            outage_backoff: config.outage_backoff(),
        }
    }
}

/// Maps price records onto `namespace:SHORT` keys and upserts them with a
/// fresh TTL. Failures are reported to the caller and never retried here.
///
/// A failed or timed-out write opens a short outage window during which
/// writes fail immediately; the first write after it closes goes to the store.
pub struct StorageWriter {
    feed: String,
    store: Arc<dyn PriceStore>,
    namespace: String,
    policy: WritePolicy,
    failing: bool,
    suspended_until: Option<Instant>,
}

impl StorageWriter {
    pub fn new(feed: &str, store: Arc<dyn PriceStore>, namespace: &str, policy: WritePolicy) -> Self {
        StorageWriter {
            feed: feed.to_string(),
            store,
            namespace: namespace.to_string(),
            policy,
            failing: false,
            suspended_until: None,
        }
    }

    pub fn key_for(&self, short_symbol: &str) -> String {
        format!("{}:{}", self.namespace, short_symbol)
    }

    pub async fn write(&mut self, record: &PriceRecord) -> Result<()> {
        let key = self.key_for(&record.short_symbol);

        if let Some(until) = self.suspended_until {
            if Instant::now() < until {
                metrics::STORE_WRITE_FAILURES.with_label_values(&[&self.feed]).inc();
                return Err(Error::Storage("store unavailable, write skipped".to_string()));
            }
        }

        let timer = metrics::STORE_WRITE_LATENCY
            .with_label_values(&[&self.feed])
            .start_timer();
        let fields = record.fields();
        let upsert = self.store.upsert(&key, &fields, self.policy.ttl);
        let result = match tokio::time::timeout(self.policy.timeout, upsert).await {
            Ok(result) => result,
            Err(_) => Err(Error::Storage(format!(
                "write to {} timed out after {:?}",
                key, self.policy.timeout
            ))),
        };
        timer.observe_duration();

        match result {
            Ok(()) => {
                metrics::STORE_WRITES.with_label_values(&[&self.feed]).inc();
                self.suspended_until = None;
                if std::mem::replace(&mut self.failing, false) {
                    tracing::info!(feed = %self.feed, key = %key, "Store writes recovered");
                }
                Ok(())
            }
            Err(e) => {
                metrics::STORE_WRITE_FAILURES.with_label_values(&[&self.feed]).inc();
                self.suspended_until = Some(Instant::now() + self.policy.outage_backoff);
                // Warn once per outage; the stream keeps flowing either way.
                if std::mem::replace(&mut self.failing, true) {
                    tracing::debug!(feed = %self.feed, key = %key, error = %e, "Store write failed");
                } else {
                    tracing::warn!(
                        feed = %self.feed,
                        key = %key,
                        error = %e,
                        backoff = ?self.policy.outage_backoff,
                        "Store write failed, pausing writes"
                    );
                }
                Err(e)
            }
        }
    }
}
