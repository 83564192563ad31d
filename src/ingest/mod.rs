pub mod backoff;
pub mod connection;
pub mod connectors;
pub mod dispatcher;
pub mod engine;
pub mod health;
pub mod liveness;
pub mod poller;
pub mod reconciler;
pub mod sink;
pub mod transport;
pub mod writer;

#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;
use serde::Serialize;

pub use connection::{ConnectionManager, ConnectionSettings, ConnectionStatus};
pub use engine::{FeedEngine, FeedHandle};
pub use liveness::HealthSnapshot;
pub use reconciler::{Reconciler, SubscriptionDiff, SubscriptionSet};
pub use writer::WritePolicy;

/// Lifecycle phase of a feed's single streaming connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Subscribing,
    Streaming,
    Closing,
    ReconnectWait,
    ShuttingDown,
}

impl ConnectionPhase {
    pub fn as_gauge(&self) -> i64 {
        match self {
            ConnectionPhase::Disconnected => 0,
            ConnectionPhase::Connecting => 1,
            ConnectionPhase::Subscribing => 2,
            ConnectionPhase::Streaming => 3,
            ConnectionPhase::Closing => 4,
            ConnectionPhase::ReconnectWait => 5,
            ConnectionPhase::ShuttingDown => 6,
        }
    }
}

#[derive(Clone, Debug)]
pub struct StaleReport {
    pub snapshot: HealthSnapshot,
    pub threshold: Duration,
}

/// Everything that reaches the connection task from outside goes through
/// this channel, so `ConnectionState` keeps a single writer.
#[derive(Clone, Debug)]
pub enum Command {
    Reload(SubscriptionDiff),
    StaleDetected(StaleReport),
    Shutdown,
}
