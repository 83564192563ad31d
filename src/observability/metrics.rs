use lazy_static::lazy_static;
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Ingest metrics
    pub static ref TICKS_ACCEPTED: IntCounterVec = IntCounterVec::new(
        Opts::new("ltp_ticks_accepted_total", "Price ticks validated and forwarded to the store"),
        &["feed"]
    ).unwrap();

    pub static ref FRAMES_DROPPED: IntCounterVec = IntCounterVec::new(
        Opts::new("ltp_frames_dropped_total", "Inbound frames discarded without a store write"),
        &["feed", "reason"]
    ).unwrap();

    // Store metrics
    pub static ref STORE_WRITES: IntCounterVec = IntCounterVec::new(
        Opts::new("ltp_store_writes_total", "Successful price record upserts"),
        &["feed"]
    ).unwrap();

    pub static ref STORE_WRITE_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("ltp_store_write_failures_total", "Failed price record upserts"),
        &["feed"]
    ).unwrap();

    pub static ref STORE_WRITE_LATENCY: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "ltp_store_write_latency_seconds",
            "Price record upsert latency"
        ).buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
        &["feed"]
    ).unwrap();

    // Connection metrics
    pub static ref CONNECTION_PHASE: IntGaugeVec = IntGaugeVec::new(
        Opts::new("ltp_connection_phase", "Current connection phase (0=disconnected .. 6=shutting down)"),
        &["feed"]
    ).unwrap();

    pub static ref RECONNECTS: IntCounterVec = IntCounterVec::new(
        Opts::new("ltp_reconnects_total", "Connection attempts made after the first"),
        &["feed"]
    ).unwrap();

    pub static ref CONNECTION_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("ltp_connection_errors_total", "Sessions or polls ended by an error, by error kind"),
        &["feed", "kind"]
    ).unwrap();

    pub static ref ACTIVE_SUBSCRIPTIONS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("ltp_active_subscriptions", "Acknowledged instrument subscriptions"),
        &["feed"]
    ).unwrap();

    // Health metrics
    pub static ref SECONDS_SINCE_LAST_MESSAGE: GaugeVec = GaugeVec::new(
        Opts::new("ltp_seconds_since_last_message", "Age of the newest data frame"),
        &["feed"]
    ).unwrap();

    pub static ref STALENESS_DETECTIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("ltp_staleness_detections_total", "Sessions declared stale by the health monitor"),
        &["feed"]
    ).unwrap();
}

pub fn register_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(TICKS_ACCEPTED.clone()))?;
    REGISTRY.register(Box::new(FRAMES_DROPPED.clone()))?;
    REGISTRY.register(Box::new(STORE_WRITES.clone()))?;
    REGISTRY.register(Box::new(STORE_WRITE_FAILURES.clone()))?;
    REGISTRY.register(Box::new(STORE_WRITE_LATENCY.clone()))?;
    REGISTRY.register(Box::new(CONNECTION_PHASE.clone()))?;
    REGISTRY.register(Box::new(RECONNECTS.clone()))?;
    REGISTRY.register(Box::new(CONNECTION_ERRORS.clone()))?;
    REGISTRY.register(Box::new(ACTIVE_SUBSCRIPTIONS.clone()))?;
    REGISTRY.register(Box::new(SECONDS_SINCE_LAST_MESSAGE.clone()))?;
    REGISTRY.register(Box::new(STALENESS_DETECTIONS.clone()))?;
    Ok(())
}

/// Prometheus text exposition of everything registered.
pub fn render() -> String {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}
