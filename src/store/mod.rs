pub mod memory;
pub mod redis_store;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use crate::config::{StoreBackend, StoreConfig};
use crate::error::Result;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// Hash-structured key-value store with per-key expiry.
///
/// Implementations must tolerate concurrent callers: one store is shared by
/// every feed in the process.
#[async_trait]
pub trait PriceStore: Send + Sync {
    /// Replace the whole field set under `key` and refresh its expiry.
    async fn upsert(&self, key: &str, fields: &[(&'static str, String)], ttl: Duration) -> Result<()>;

    async fn fetch_all(&self, key: &str) -> Result<HashMap<String, String>>;

    async fn fetch_field(&self, key: &str, field: &str) -> Result<Option<String>>;
}

/// Builds the configured backend without waiting for it to be reachable.
pub fn connect(config: &StoreConfig) -> Result<Arc<dyn PriceStore>> {
    match config.backend {
        StoreBackend::Redis => {
            let store = RedisStore::connect(config)?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; prices are not persisted");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
