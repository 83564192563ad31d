use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use tokio::sync::OnceCell;
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::ingest::backoff::Backoff;
use crate::store::PriceStore;

const CONNECT_RETRY_BASE: Duration = Duration::from_secs(1);
const CONNECT_RETRY_CAP: Duration = Duration::from_secs(30);
const COMMAND_RETRIES: usize = 2;

/// Redis hashes, one per instrument.
///
/// The first connection is made in the background so feeds can start while
/// Redis is still down; until it succeeds every call fails with a storage
/// error. After that `ConnectionManager` reconnects on its own, so an outage
/// surfaces as per-call errors and recovers without any action from the feed
/// engines. Connection setup and each command are bounded by the store's
/// write timeout.
#[derive(Clone)]
pub struct RedisStore {
    connection: Arc<OnceCell<ConnectionManager>>,
}

impl RedisStore {
    /// Returns at once. Fails only when the URL itself is unusable.
    pub fn connect(config: &StoreConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| Error::ConfigError(format!("invalid redis url: {}", e)))?;
        let connection = Arc::new(OnceCell::new());

        tokio::spawn(establish(
            client,
            config.write_timeout(),
            Arc::downgrade(&connection),
            redact_credentials(&config.url),
        ));
        Ok(RedisStore { connection })
    }

    pub fn is_connected(&self) -> bool {
        self.connection.initialized()
    }

    fn handle(&self) -> Result<ConnectionManager> {
        self.connection
            .get()
            .cloned()
            .ok_or_else(|| Error::Storage("redis not connected".to_string()))
    }
}

fn manager_config(timeout: Duration) -> ConnectionManagerConfig {
    ConnectionManagerConfig::new()
        .set_connection_timeout(timeout)
        .set_response_timeout(timeout)
        .set_number_of_retries(COMMAND_RETRIES)
}

/// Retries the initial connection until it succeeds or the store is dropped.
async fn establish(
    client: redis::Client,
    timeout: Duration,
    slot: Weak<OnceCell<ConnectionManager>>,
    url: String,
) {
    let mut backoff = Backoff::new(CONNECT_RETRY_BASE, CONNECT_RETRY_CAP, 2.0);
    let mut failures = 0u32;

    loop {
        match client.get_connection_manager_with_config(manager_config(timeout)).await {
            Ok(manager) => {
                let Some(slot) = slot.upgrade() else { return };
                let _ = slot.set(manager);
                tracing::info!(attempts = failures + 1, "Connected to Redis at {}", url);
                return;
            }
            Err(e) => {
                failures += 1;
                if failures == 1 {
                    tracing::warn!(error = %e, "Redis unreachable at {}, retrying in background", url);
                } else {
                    tracing::debug!(attempt = failures, error = %e, "Redis still unreachable");
                }
            }
        }

        tokio::time::sleep(backoff.next_delay()).await;
        if slot.strong_count() == 0 {
            return;
        }
    }
}

#[async_trait]
impl PriceStore for RedisStore {
    async fn upsert(&self, key: &str, fields: &[(&'static str, String)], ttl: Duration) -> Result<()> {
        if fields.is_empty() {
            return Err(Error::Storage(format!("refusing empty field set for {}", key)));
        }

        let mut conn = self.handle()?;
        let ttl_secs = ttl.as_secs().max(1) as i64;

        // MULTI/EXEC so readers never observe a half-written hash
        let (): () = redis::pipe()
            .atomic()
            .del(key)
            .ignore()
            .hset_multiple(key, fields)
            .ignore()
            .expire(key, ttl_secs)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn fetch_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.handle()?;
        let values: HashMap<String, String> = conn.hgetall(key).await?;
        Ok(values)
    }

    async fn fetch_field(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.handle()?;
        let value: Option<String> = conn.hget(key, field).await?;
        Ok(value)
    }
}

fn redact_credentials(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
