use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use crate::ingest::liveness::{HealthSnapshot, LivenessView};
use crate::ingest::{Command, StaleReport};
use crate::observability::metrics;

/// Periodically samples liveness, logs health and throughput, and asks the
/// connection task to recycle a session that has gone quiet.
///
/// Staleness is reported at most once per streaming session; the connection
/// task decides whether the report still applies.
pub struct HealthMonitor {
    feed: String,
    view: LivenessView,
    commands: mpsc::Sender<Command>,
    interval: Duration,
    threshold: Duration,
    last_total: u64,
    flagged_session: Option<u64>,
}

impl HealthMonitor {
    pub fn new(
        feed: &str,
        view: LivenessView,
        commands: mpsc::Sender<Command>,
        interval: Duration,
        threshold: Duration,
    ) -> Self {
        HealthMonitor {
            feed: feed.to_string(),
            view,
            commands,
            interval,
            threshold,
            last_total: 0,
            flagged_session: None,
        }
    }

    /// Samples once; returns a staleness report if one should be raised.
    pub fn check(&mut self) -> Option<StaleReport> {
        let snapshot = self.view.snapshot();
        self.report(&snapshot);

        let stale = snapshot.connected
            && snapshot.since_last_message > self.threshold
            && self.flagged_session != Some(snapshot.session);
        if !stale {
            return None;
        }

        self.flagged_session = Some(snapshot.session);
        metrics::STALENESS_DETECTIONS.with_label_values(&[&self.feed]).inc();
        tracing::error!(
            feed = %self.feed,
            session = snapshot.session,
            seconds_since_last_message = snapshot.seconds_since_last_message(),
            threshold_secs = self.threshold.as_secs(),
            "Feed is stale, requesting reconnect"
        );

        Some(StaleReport {
            snapshot,
            threshold: self.threshold,
        })
    }

    pub async fn run(mut self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.commands.closed() => break,
                _ = ticker.tick() => {}
            }

            if let Some(report) = self.check() {
                if self.commands.send(Command::StaleDetected(report)).await.is_err() {
                    break;
                }
            }
        }

        tracing::debug!(feed = %self.feed, "Health monitor stopped");
    }

    fn report(&mut self, snapshot: &HealthSnapshot) {
        let received = snapshot.total_messages.saturating_sub(self.last_total);
        self.last_total = snapshot.total_messages;
        let per_second = received as f64 / self.interval.as_secs_f64();

        metrics::SECONDS_SINCE_LAST_MESSAGE
            .with_label_values(&[&self.feed])
            .set(snapshot.seconds_since_last_message());

        tracing::info!(
            feed = %self.feed,
            connected = snapshot.connected,
            seconds_since_last_message = snapshot.seconds_since_last_message(),
            total_messages = snapshot.total_messages,
            reconnect_count = snapshot.reconnect_count,
            "Health snapshot"
        );
        tracing::info!(
            feed = %self.feed,
            received,
            per_second,
            "Throughput"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::liveness::LivenessRecorder;

    fn monitor(recorder: &LivenessRecorder) -> (HealthMonitor, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel(8);
        let monitor = HealthMonitor::new(
            "test",
            recorder.view(),
            tx,
            Duration::from_secs(10),
            Duration::from_secs(60),
        );
        (monitor, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn flags_quiet_session_once() {
        let recorder = LivenessRecorder::new();
        let (mut monitor, _rx) = monitor(&recorder);
        recorder.mark_streaming(1);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(monitor.check().is_none());

        tokio::time::advance(Duration::from_secs(2)).await;
        let report = monitor.check().expect("stale session should be flagged");
        assert_eq!(report.snapshot.session, 1);
        assert_eq!(report.threshold, Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(monitor.check().is_none(), "same session must not be flagged twice");

        recorder.mark_streaming(2);
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(monitor.check().map(|r| r.snapshot.session), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_feed_is_never_stale() {
        let recorder = LivenessRecorder::new();
        let (mut monitor, _rx) = monitor(&recorder);
        recorder.mark_streaming(1);
        recorder.mark_disconnected();

        tokio::time::advance(Duration::from_secs(600)).await;
        assert!(monitor.check().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn run_sends_stale_command_and_stops_when_receiver_drops() {
        let recorder = LivenessRecorder::new();
        let (monitor, mut rx) = monitor(&recorder);
        recorder.mark_streaming(3);

        let task = tokio::spawn(monitor.run());

        match rx.recv().await {
            Some(Command::StaleDetected(report)) => {
                assert_eq!(report.snapshot.session, 3);
                assert!(report.snapshot.since_last_message > Duration::from_secs(60));
            }
            other => panic!("expected staleness report, got {:?}", other),
        }

        drop(rx);
        task.await.unwrap();
    }
}
