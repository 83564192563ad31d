use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use crate::config::EngineTunables;
use crate::error::{Error, Result};
use crate::ingest::backoff::Backoff;
use crate::ingest::connection::ConnectionStatus;
use crate::ingest::connectors::{RawTick, SnapshotSource};
use crate::ingest::dispatcher::Inbound;
use crate::ingest::liveness::LivenessRecorder;
use crate::ingest::reconciler::{SubscriptionDiff, SubscriptionSet};
use crate::ingest::sink::TickSink;
use crate::ingest::{Command, ConnectionPhase};
use crate::observability::metrics;
use crate::utils::helper::join_symbols;

/// Drives a feed whose venue only answers snapshot requests.
///
/// Phases mirror the streaming connection: CONNECTING until the first poll
/// succeeds, STREAMING while polls keep succeeding, RECONNECT_WAIT after a
/// failed poll. Consecutive failures count against the same reconnect budget.
pub struct SnapshotPoller {
    feed: String,
    source: Arc<dyn SnapshotSource>,
    sink: TickSink,
    interval: Duration,
    max_failures: u32,
    backoff: Backoff,
    commands: mpsc::Receiver<Command>,
    recorder: LivenessRecorder,
    status: watch::Sender<ConnectionStatus>,
    desired: SubscriptionSet,
    phase: ConnectionPhase,
    consecutive_failures: u32,
    session_counter: u64,
}

impl SnapshotPoller {
    pub fn new(
        feed: &str,
        source: Arc<dyn SnapshotSource>,
        sink: TickSink,
        tunables: &EngineTunables,
        desired: SubscriptionSet,
        commands: mpsc::Receiver<Command>,
        recorder: LivenessRecorder,
    ) -> (Self, watch::Receiver<ConnectionStatus>) {
        let (status, status_rx) = watch::channel(ConnectionStatus {
            phase: ConnectionPhase::Disconnected,
            session: 0,
            active: SubscriptionSet::new(),
            consecutive_failures: 0,
        });

        let poller = SnapshotPoller {
            feed: feed.to_string(),
            source,
            sink,
            interval: tunables.poll_interval(),
            max_failures: tunables.max_reconnect_attempts,
            backoff: Backoff::new(
                tunables.reconnect_base(),
                tunables.reconnect_cap(),
                tunables.reconnect_multiplier,
            ),
            commands,
            recorder,
            status,
            desired,
            phase: ConnectionPhase::Disconnected,
            consecutive_failures: 0,
            session_counter: 0,
        };
        (poller, status_rx)
    }

    /// Runs until shutdown (`Ok`) or until the failure budget is spent.
    pub async fn run(mut self) -> Result<()> {
        self.transition(ConnectionPhase::Connecting);
        tracing::info!(
            feed = %self.feed,
            venue = self.source.venue(),
            endpoint = %self.source.endpoint(),
            interval_secs = self.interval.as_secs(),
            "Polling snapshots"
        );

        loop {
            let delay = match self.fetch().await {
                None => break,
                Some(Ok(ticks)) => {
                    self.on_snapshot(ticks).await;
                    self.interval
                }
                Some(Err(e)) => {
                    self.on_failure(&e);
                    if self.consecutive_failures >= self.max_failures {
                        tracing::error!(
                            feed = %self.feed,
                            attempts = self.consecutive_failures,
                            "Poll failure budget exhausted, giving up"
                        );
                        self.transition(ConnectionPhase::ShuttingDown);
                        return Err(Error::MaxReconnectAttemptsExceeded {
                            attempts: self.consecutive_failures,
                        });
                    }
                    self.transition(ConnectionPhase::ReconnectWait);
                    self.backoff.next_delay()
                }
            };

            if !self.wait(delay).await {
                break;
            }

            if self.phase == ConnectionPhase::ReconnectWait {
                self.recorder.record_reconnect();
                metrics::RECONNECTS.with_label_values(&[&self.feed]).inc();
                self.transition(ConnectionPhase::Connecting);
            }
        }

        self.recorder.mark_disconnected();
        self.transition(ConnectionPhase::ShuttingDown);
        Ok(())
    }

    /// One snapshot request; `None` when shutdown arrived first.
    async fn fetch(&mut self) -> Option<Result<Vec<RawTick>>> {
        let source = Arc::clone(&self.source);
        let request = source.fetch();
        tokio::pin!(request);

        loop {
            tokio::select! {
                result = &mut request => return Some(result),
                command = self.commands.recv() => {
                    if !self.absorb(command) {
                        return None;
                    }
                }
            }
        }
    }

    async fn on_snapshot(&mut self, ticks: Vec<RawTick>) {
        if self.phase != ConnectionPhase::Streaming {
            self.session_counter += 1;
            self.transition(ConnectionPhase::Streaming);
            self.recorder.mark_streaming(self.session_counter);
            self.backoff.reset();
            self.consecutive_failures = 0;
            let session = self.session_counter;
            self.status.send_modify(|s| {
                s.session = session;
                s.consecutive_failures = 0;
            });
            self.publish_active();
        }

        let mut accepted = 0usize;
        for tick in ticks {
            // the snapshot lists every contract on the venue
            if self.desired.find_exchange(&tick.symbol).is_none() {
                continue;
            }
            if self.sink.accept(tick, &self.desired).await == Inbound::Accepted {
                self.recorder.record_message();
                accepted += 1;
            }
        }

        tracing::debug!(feed = %self.feed, session = self.session_counter, accepted, "Snapshot applied");
    }

    fn on_failure(&mut self, e: &Error) {
        if self.phase == ConnectionPhase::Streaming {
            self.recorder.mark_disconnected();
        }
        self.consecutive_failures += 1;
        let failures = self.consecutive_failures;
        self.status.send_modify(|s| s.consecutive_failures = failures);

        let kind = e.kind();
        metrics::CONNECTION_ERRORS
            .with_label_values(&[&self.feed, kind.as_str()])
            .inc();
        tracing::warn!(
            feed = %self.feed,
            attempt = failures,
            max_attempts = self.max_failures,
            kind = kind.as_str(),
            error = %e,
            "Snapshot poll failed"
        );
    }

    /// Sleeps until the next poll while still honouring commands. `false`
    /// on shutdown.
    async fn wait(&mut self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;

        loop {
            tokio::select! {
                _ = sleep_until(deadline) => return true,
                command = self.commands.recv() => {
                    if !self.absorb(command) {
                        return false;
                    }
                }
            }
        }
    }

    /// `false` when the command ends the feed.
    fn absorb(&mut self, command: Option<Command>) -> bool {
        match command {
            Some(Command::Reload(diff)) => {
                self.accept_reload(diff);
                true
            }
            Some(Command::StaleDetected(_)) => {
                // freshness is bounded by the poll interval and the failure budget
                tracing::debug!(feed = %self.feed, phase = ?self.phase, "Ignoring staleness report");
                true
            }
            Some(Command::Shutdown) | None => false,
        }
    }

    fn accept_reload(&mut self, diff: SubscriptionDiff) {
        tracing::info!(
            feed = %self.feed,
            subscribe = %join_symbols(&diff.subscribe),
            unsubscribe = %join_symbols(&diff.unsubscribe),
            "Subscription reload accepted"
        );
        for symbol in &diff.unsubscribe {
            self.sink.forget(symbol);
        }
        self.desired = diff.target;
        if self.phase == ConnectionPhase::Streaming {
            self.publish_active();
        }
    }

    fn transition(&mut self, to: ConnectionPhase) {
        if self.phase == to {
            return;
        }
        tracing::info!(feed = %self.feed, from = ?self.phase, to = ?to, "Connection phase transition");
        self.phase = to;
        metrics::CONNECTION_PHASE
            .with_label_values(&[&self.feed])
            .set(to.as_gauge());
        if to != ConnectionPhase::Streaming {
            metrics::ACTIVE_SUBSCRIPTIONS.with_label_values(&[&self.feed]).set(0);
            self.status.send_modify(|s| {
                s.phase = to;
                s.active = SubscriptionSet::new();
            });
        } else {
            self.status.send_modify(|s| s.phase = to);
        }
    }

    fn publish_active(&self) {
        metrics::ACTIVE_SUBSCRIPTIONS
            .with_label_values(&[&self.feed])
            .set(self.desired.len() as i64);
        let active = self.desired.clone();
        self.status.send_modify(|s| s.active = active);
    }
}
