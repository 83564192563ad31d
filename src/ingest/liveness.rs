use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use serde::Serialize;
use tokio::time::Instant;

struct LivenessCells {
    origin: Instant,
    last_message_ms: AtomicU64,
    total_messages: AtomicU64,
    reconnect_count: AtomicU64,
    session: AtomicU64,
    connected: AtomicBool,
}

impl LivenessCells {
    fn now_ms(&self) -> u64 {
        Instant::now().duration_since(self.origin).as_millis() as u64
    }
}

/// Write side of the liveness statistics. Owned by the connection task.
pub struct LivenessRecorder {
    cells: Arc<LivenessCells>,
}

/// Read-only view handed to the health monitor.
#[derive(Clone)]
pub struct LivenessView {
    cells: Arc<LivenessCells>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub since_last_message: Duration,
    pub total_messages: u64,
    pub reconnect_count: u64,
    pub connected: bool,
    pub session: u64,
}

impl HealthSnapshot {
    pub fn seconds_since_last_message(&self) -> f64 {
        self.since_last_message.as_secs_f64()
    }
}

impl LivenessRecorder {
    pub fn new() -> Self {
        LivenessRecorder {
            cells: Arc::new(LivenessCells {
                origin: Instant::now(),
                last_message_ms: AtomicU64::new(0),
                total_messages: AtomicU64::new(0),
                reconnect_count: AtomicU64::new(0),
                session: AtomicU64::new(0),
                connected: AtomicBool::new(false),
            }),
        }
    }

    pub fn view(&self) -> LivenessView {
        LivenessView { cells: self.cells.clone() }
    }

    pub fn record_message(&self) {
        let now = self.cells.now_ms();
        self.cells.last_message_ms.store(now, Ordering::SeqCst);
        self.cells.total_messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Restarts the staleness clock for a freshly established session.
    pub fn mark_streaming(&self, session: u64) {
        let now = self.cells.now_ms();
        self.cells.last_message_ms.store(now, Ordering::SeqCst);
        self.cells.session.store(session, Ordering::SeqCst);
        self.cells.connected.store(true, Ordering::SeqCst);
    }

    pub fn mark_disconnected(&self) {
        self.cells.connected.store(false, Ordering::SeqCst);
    }

    pub fn record_reconnect(&self) {
        self.cells.reconnect_count.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for LivenessRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessView {
    pub fn snapshot(&self) -> HealthSnapshot {
        let now = self.cells.now_ms();
        let last = self.cells.last_message_ms.load(Ordering::SeqCst);
        HealthSnapshot {
            since_last_message: Duration::from_millis(now.saturating_sub(last)),
            total_messages: self.cells.total_messages.load(Ordering::Relaxed),
            reconnect_count: self.cells.reconnect_count.load(Ordering::Relaxed),
            connected: self.cells.connected.load(Ordering::SeqCst),
            session: self.cells.session.load(Ordering::SeqCst),
        }
    }
}
