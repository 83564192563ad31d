use std::path::Path;
use crate::config::*;
use crate::error::{Error, Result};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    pub feeds: Vec<FeedConfig>,
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name("config/default"))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(Environment::with_prefix("LTP_RELAY").separator("__"))
            .build()?;

        let app: AppConfig = config.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()?;

        let app: AppConfig = config.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }

    pub fn validate(&self) -> Result<()> {
        if self.feeds.is_empty() {
            return Err(Error::ConfigError("no feeds configured".to_string()));
        }

        for (i, feed) in self.feeds.iter().enumerate() {
            if self.feeds[..i].iter().any(|other| other.name == feed.name) {
                return Err(Error::ConfigError(format!("duplicate feed name '{}'", feed.name)));
            }
            feed.tunables
                .validate()
                .map_err(|e| Error::ConfigError(format!("feed '{}': {}", feed.name, e)))?;
        }

        if self.store.ttl_secs == 0 {
            return Err(Error::ConfigError("store.ttl_secs must be greater than zero".to_string()));
        }
        if self.store.write_timeout_ms == 0 {
            return Err(Error::ConfigError(
                "store.write_timeout_ms must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Deserialize)]
struct SymbolFile {
    symbols: Vec<String>,
}

/// Reads a `{"symbols": [...]}` document.
pub fn load_symbol_list(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        Error::ConfigError(format!("cannot read symbol file {}: {}", path.display(), e))
    })?;

    let file: SymbolFile = serde_json::from_str(&raw).map_err(|e| {
        Error::ConfigError(format!("invalid symbol file {}: {}", path.display(), e))
    })?;

    Ok(file.symbols)
}
