use std::time::Duration;

/// Exponential reconnect delay: grows by `multiplier` from `base` up to `cap`.
#[derive(Clone, Debug)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    multiplier: f64,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, multiplier: f64) -> Self {
        let cap = cap.max(base);
        Backoff {
            base,
            cap,
            multiplier: if multiplier.is_finite() { multiplier.max(1.0) } else { 1.0 },
            current: base,
        }
    }

    /// Delay to wait now; advances the schedule for the next failure.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let grown = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.multiplier)
            .unwrap_or(self.cap);
        self.current = grown.min(self.cap);
        delay
    }

    pub fn peek(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }
}
