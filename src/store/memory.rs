use std::collections::HashMap;
use std::time::Duration;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use crate::error::Result;
use crate::store::PriceStore;

struct Entry {
    fields: HashMap<String, String>,
    expires_at: Instant,
}

/// Process-local store with the same replace-and-expire semantics as Redis.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            entries: DashMap::new(),
        }
    }

    /// Remaining time-to-live, `None` when the key is absent or expired.
    pub fn ttl_remaining(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.expires_at - now)
    }

    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    fn evict_if_expired(&self, key: &str) {
        let now = Instant::now();
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
    }
}

#[async_trait]
impl PriceStore for MemoryStore {
    async fn upsert(&self, key: &str, fields: &[(&'static str, String)], ttl: Duration) -> Result<()> {
        let fields = fields
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();

        self.entries.insert(
            key.to_string(),
            Entry {
                fields,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn fetch_all(&self, key: &str) -> Result<HashMap<String, String>> {
        self.evict_if_expired(key);
        Ok(self
            .entries
            .get(key)
            .map(|entry| entry.fields.clone())
            .unwrap_or_default())
    }

    async fn fetch_field(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.evict_if_expired(key);
        Ok(self
            .entries
            .get(key)
            .and_then(|entry| entry.fields.get(field).cloned()))
    }
}
