use std::path::PathBuf;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};
use crate::types::SymbolRules;

pub mod loader;

pub use loader::{AppConfig, load_symbol_list};

/// Timing and retry knobs for one feed's connection engine.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineTunables {
    pub staleness_threshold_secs: u64,
    pub health_check_interval_secs: u64,
    pub reconnect_base_ms: u64,
    pub reconnect_multiplier: f64,
    pub reconnect_cap_ms: u64,
    pub max_reconnect_attempts: u32,
    pub handshake_timeout_secs: u64,
    pub ack_timeout_ms: u64,
    pub ack_retries: u32,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
    /// Snapshot interval for polled feeds; streaming feeds ignore it.
    pub poll_interval_secs: u64,
}

impl Default for EngineTunables {
    fn default() -> Self {
        EngineTunables {
            staleness_threshold_secs: 60,
            health_check_interval_secs: 10,
            reconnect_base_ms: 1_000,
            reconnect_multiplier: 2.0,
            reconnect_cap_ms: 60_000,
            max_reconnect_attempts: 10,
            handshake_timeout_secs: 10,
            ack_timeout_ms: 5_000,
            ack_retries: 2,
            heartbeat_interval_secs: 20,
            heartbeat_timeout_secs: 10,
            poll_interval_secs: 30,
        }
    }
}

impl EngineTunables {
    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_secs(self.staleness_threshold_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }

    pub fn reconnect_cap(&self) -> Duration {
        Duration::from_millis(self.reconnect_cap_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn validate(&self) -> Result<()> {
        let nonzero = [
            ("staleness_threshold_secs", self.staleness_threshold_secs),
            ("health_check_interval_secs", self.health_check_interval_secs),
            ("reconnect_base_ms", self.reconnect_base_ms),
            ("reconnect_cap_ms", self.reconnect_cap_ms),
            ("handshake_timeout_secs", self.handshake_timeout_secs),
            ("ack_timeout_ms", self.ack_timeout_ms),
            ("heartbeat_interval_secs", self.heartbeat_interval_secs),
            ("heartbeat_timeout_secs", self.heartbeat_timeout_secs),
            ("poll_interval_secs", self.poll_interval_secs),
        ];
        if let Some((name, _)) = nonzero.iter().find(|(_, value)| *value == 0) {
            return Err(Error::ConfigError(format!("{} must be greater than zero", name)));
        }

        if self.reconnect_cap_ms < self.reconnect_base_ms {
            return Err(Error::ConfigError(format!(
                "reconnect_cap_ms ({}) is below reconnect_base_ms ({})",
                self.reconnect_cap_ms, self.reconnect_base_ms
            )));
        }

        if !self.reconnect_multiplier.is_finite() || self.reconnect_multiplier < 1.0 {
            return Err(Error::ConfigError(format!(
                "reconnect_multiplier must be >= 1.0, got {}",
                self.reconnect_multiplier
            )));
        }

        if self.max_reconnect_attempts == 0 {
            return Err(Error::ConfigError(
                "max_reconnect_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    BybitSpot,
    BybitLinear,
    BinanceSpot,
    /// REST snapshot of every CoinDCX futures contract, polled.
    CoindcxFutures,
}

impl FeedKind {
    pub fn default_namespace(&self) -> &'static str {
        match self {
            FeedKind::BybitSpot => "bybit_spot",
            FeedKind::BybitLinear => "bybit_linear",
            FeedKind::BinanceSpot => "binance_spot",
            FeedKind::CoindcxFutures => "coindcx_futures",
        }
    }

    pub fn default_endpoint(&self) -> &'static str {
        match self {
            FeedKind::BybitSpot => "wss://stream.bybit.com/v5/public/spot",
            FeedKind::BybitLinear => "wss://stream.bybit.com/v5/public/linear",
            FeedKind::BinanceSpot => "wss://stream.binance.com:9443/ws",
            FeedKind::CoindcxFutures => {
                "https://public.coindcx.com/market_data/v3/current_prices/futures/rt"
            }
        }
    }

    /// CoinDCX spells instruments `B-BTC_USDT`.
    pub fn default_symbol_rules(&self) -> SymbolRules {
        match self {
            FeedKind::CoindcxFutures => SymbolRules {
                quote_asset: "USDT".to_string(),
                venue_prefixes: vec!["B-".to_string(), "F-".to_string(), "BM-".to_string()],
                separator: Some('_'),
            },
            _ => SymbolRules::default(),
        }
    }

    pub fn is_polled(&self) -> bool {
        matches!(self, FeedKind::CoindcxFutures)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FeedConfig {
    pub name: String,
    pub kind: FeedKind,
    pub namespace: Option<String>,
    pub endpoint: Option<String>,
    #[serde(default)]
    pub symbols: Vec<String>,
    pub symbols_file: Option<PathBuf>,
    pub symbol_rules: Option<SymbolRules>,
    #[serde(default)]
    pub tunables: EngineTunables,
}

impl FeedConfig {
    pub fn new(name: &str, kind: FeedKind, symbols: &[&str]) -> Self {
        FeedConfig {
            name: name.to_string(),
            kind,
            namespace: None,
            endpoint: None,
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            symbols_file: None,
            symbol_rules: None,
            tunables: EngineTunables::default(),
        }
    }

    pub fn namespace(&self) -> &str {
        self.namespace
            .as_deref()
            .unwrap_or_else(|| self.kind.default_namespace())
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint
            .as_deref()
            .unwrap_or_else(|| self.kind.default_endpoint())
    }

    pub fn rules(&self) -> SymbolRules {
        self.symbol_rules
            .clone()
            .unwrap_or_else(|| self.kind.default_symbol_rules())
    }

    /// Desired symbols: the symbol file when configured, the inline list otherwise.
    pub fn load_symbols(&self) -> Result<Vec<String>> {
        match &self.symbols_file {
            Some(path) => load_symbol_list(path),
            None => Ok(self.symbols.clone()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Redis,
    Memory,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Upper bound on one upsert, connection setup included.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Pause after a failed write before the store is tried again.
    #[serde(default = "default_outage_backoff_ms")]
    pub outage_backoff_ms: u64,
}

impl StoreConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn outage_backoff(&self) -> Duration {
        Duration::from_millis(self.outage_backoff_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            backend: StoreBackend::Redis,
            url: default_redis_url(),
            ttl_secs: default_ttl_secs(),
            write_timeout_ms: default_write_timeout_ms(),
            outage_backoff_ms: default_outage_backoff_ms(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_write_timeout_ms() -> u64 {
    1_000
}

fn default_outage_backoff_ms() -> u64 {
    5_000
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub json: bool,
    pub filter: Option<String>,
}
