use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::Instrument;
use crate::config::FeedConfig;
use crate::error::{Error, Result};
use crate::ingest::connection::{ConnectionManager, ConnectionSettings, ConnectionStatus};
use crate::ingest::connectors::{build_source, FeedSource};
use crate::ingest::dispatcher::MessageDispatcher;
use crate::ingest::health::HealthMonitor;
use crate::ingest::liveness::{HealthSnapshot, LivenessRecorder, LivenessView};
use crate::ingest::poller::SnapshotPoller;
use crate::ingest::reconciler::Reconciler;
use crate::ingest::sink::TickSink;
use crate::ingest::transport::Connector;
use crate::ingest::writer::{StorageWriter, WritePolicy};
use crate::ingest::Command;
use crate::observability::tracing::trace_feed;
use crate::store::PriceStore;

const COMMAND_BUFFER: usize = 64;

/// Control surface for a running feed.
pub struct FeedHandle {
    name: String,
    commands: mpsc::Sender<Command>,
    reconciler: Reconciler,
    status: watch::Receiver<ConnectionStatus>,
    liveness: LivenessView,
}

impl FeedHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Validates `raw` and forwards the difference to the connection task.
    /// Returns `Ok(false)` when nothing changed. A list with no valid symbols
    /// is rejected and the running subscriptions stay as they are.
    pub async fn reload(&mut self, raw: &[String]) -> Result<bool> {
        let Some(diff) = self.reconciler.reconcile(raw)? else {
            return Ok(false);
        };

        self.commands
            .send(Command::Reload(diff))
            .await
            .map_err(|_| Error::ConfigError(format!("feed {} is no longer running", self.name)))?;
        Ok(true)
    }

    pub async fn shutdown(&self) {
        if self.commands.send(Command::Shutdown).await.is_err() {
            tracing::debug!(feed = %self.name, "Feed already stopped");
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    pub fn health(&self) -> HealthSnapshot {
        self.liveness.snapshot()
    }
}

enum Driver {
    Stream(ConnectionManager),
    Poll(SnapshotPoller),
}

/// The tasks behind one feed: its connection manager (or snapshot poller)
/// and health monitor.
pub struct FeedEngine {
    name: String,
    venue: &'static str,
    driver: Driver,
    monitor: HealthMonitor,
}

impl FeedEngine {
    /// `connector` opens sockets for streaming feeds; polled feeds ignore it.
    pub fn build(
        config: &FeedConfig,
        store: Arc<dyn PriceStore>,
        policy: WritePolicy,
        connector: Arc<dyn Connector>,
    ) -> Result<(FeedHandle, FeedEngine)> {
        config.tunables.validate()?;

        let mut reconciler = Reconciler::new(&config.name, config.rules());
        let desired = reconciler.initialize(&config.load_symbols()?)?;

        let source = build_source(config)?;
        let venue = source.venue();
        let writer = StorageWriter::new(&config.name, store, config.namespace(), policy);
        let sink = TickSink::new(&config.name, writer);

        let recorder = LivenessRecorder::new();
        let liveness = recorder.view();
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);

        let (driver, status) = match source {
            FeedSource::Stream(protocol) => {
                let dispatcher = MessageDispatcher::new(&config.name, protocol.clone(), sink);
                let (manager, status) = ConnectionManager::new(
                    &config.name,
                    protocol,
                    connector,
                    dispatcher,
                    ConnectionSettings::from(&config.tunables),
                    desired,
                    commands_rx,
                    recorder,
                );
                (Driver::Stream(manager), status)
            }
            FeedSource::Poll(source) => {
                let (poller, status) = SnapshotPoller::new(
                    &config.name,
                    source,
                    sink,
                    &config.tunables,
                    desired,
                    commands_rx,
                    recorder,
                );
                (Driver::Poll(poller), status)
            }
        };
        let monitor = HealthMonitor::new(
            &config.name,
            liveness.clone(),
            commands_tx.clone(),
            config.tunables.health_check_interval(),
            config.tunables.staleness_threshold(),
        );

        tracing::info!(
            feed = %config.name,
            venue,
            namespace = %config.namespace(),
            endpoint = %config.endpoint(),
            instruments = reconciler.current().len(),
            "Feed configured"
        );

        let handle = FeedHandle {
            name: config.name.clone(),
            commands: commands_tx,
            reconciler,
            status,
            liveness,
        };
        let engine = FeedEngine {
            name: config.name.clone(),
            venue,
            driver,
            monitor,
        };
        Ok((handle, engine))
    }

    /// Drives the feed until shutdown or a fatal error.
    pub async fn run(self) -> Result<()> {
        let span = trace_feed(&self.name, self.venue);
        let monitor = tokio::spawn(self.monitor.run().instrument(span.clone()));
        let result = match self.driver {
            Driver::Stream(manager) => manager.run().instrument(span).await,
            Driver::Poll(poller) => poller.run().instrument(span).await,
        };
        monitor.abort();
        result
    }
}
