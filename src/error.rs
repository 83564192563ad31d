use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Transport Errors
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Heartbeat not acknowledged within {0:?}")]
    HeartbeatTimeout(Duration),

    // Protocol Errors
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid price '{price}' for {symbol}")]
    InvalidPrice {
        symbol: String,
        price: String,
    },

    #[error("Unknown instrument: {0}")]
    UnknownInstrument(String),

    // Subscription Errors
    #[error("Subscription to {symbol} rejected: {reason}")]
    SubscriptionRejected {
        symbol: String,
        reason: String,
    },

    #[error("Subscription request for {symbol} not acknowledged after {attempts} attempts")]
    SubscriptionTimeout {
        symbol: String,
        attempts: u32,
    },

    // Staleness Errors
    #[error("Feed stale: no data for {elapsed:?}, threshold {threshold:?}")]
    Stale {
        elapsed: Duration,
        threshold: Duration,
    },

    // Storage Errors
    #[error("Storage error: {0}")]
    Storage(String),

    // Configuration Errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid instrument symbol '{symbol}': {reason}")]
    InvalidSymbol {
        symbol: String,
        reason: String,
    },

    #[error("Reload produced an empty subscription set")]
    EmptySubscriptionSet,

    // Fatal
    #[error("Max reconnect attempts exceeded: {attempts} consecutive failures")]
    MaxReconnectAttemptsExceeded { attempts: u32 },

    #[error("Task {task} terminated abnormally: {reason}")]
    TaskFailed {
        task: String,
        reason: String,
    },

    // IO Errors
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure classes the engine reacts to differently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Protocol,
    Subscription,
    Staleness,
    Storage,
    Config,
    Fatal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Subscription => "subscription",
            ErrorKind::Staleness => "staleness",
            ErrorKind::Storage => "storage",
            ErrorKind::Config => "config",
            ErrorKind::Fatal => "fatal",
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transport(_)
            | Error::HandshakeTimeout(_)
            | Error::ConnectionClosed
            | Error::HeartbeatTimeout(_)
            | Error::IoError(_) => ErrorKind::Transport,
            Error::Protocol(_) | Error::InvalidPrice { .. } | Error::UnknownInstrument(_) => {
                ErrorKind::Protocol
            }
            Error::SubscriptionRejected { .. } | Error::SubscriptionTimeout { .. } => {
                ErrorKind::Subscription
            }
            Error::Stale { .. } => ErrorKind::Staleness,
            Error::Storage(_) => ErrorKind::Storage,
            Error::ConfigError(_) | Error::InvalidSymbol { .. } | Error::EmptySubscriptionSet => {
                ErrorKind::Config
            }
            Error::MaxReconnectAttemptsExceeded { .. } | Error::TaskFailed { .. } => ErrorKind::Fatal,
        }
    }

    /// Only an exhausted reconnect budget or a crashed task ends the process.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Protocol(e.to_string())
    }
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::ConfigError(e.to_string())
    }
}
