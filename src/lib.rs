pub mod config;
pub mod error;
pub mod ingest;
pub mod observability;
pub mod store;
pub mod types;
pub mod utils;

/// Environment variable selecting the `config/{env}` overlay.
pub const ENV_VAR: &str = "LTP_RELAY_ENV";
