//! Synchronous timers driven by the stack's monotonic clock — no
//! `tokio::time`, no suspension points, just a `duration` checked against
//! `now` on every `process` tick.

/// A one-shot timer started against a point in time, checked for expiry by
/// comparing against the stack's `now`.
#[derive(Debug, Clone, Copy)]
pub struct StoreTimer {
    start: f64,
    duration: f64,
}

impl StoreTimer {
    pub fn new(now: f64, duration: f64) -> Self {
        StoreTimer { start: now, duration }
    }

    pub fn restart(&mut self, now: f64) {
        self.start = now;
    }

    pub fn restart_with(&mut self, now: f64, duration: f64) {
        self.start = now;
        self.duration = duration;
    }

    pub fn expired(&self, now: f64) -> bool {
        self.duration > 0.0 && now - self.start >= self.duration
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }
}

/// The exponential-backoff redo timer used by every initiator/correspondent
/// to pace retransmits between `min` and `max` seconds.
#[derive(Debug, Clone, Copy)]
pub struct RedoTimer {
    timer: StoreTimer,
    min: f64,
    max: f64,
}

impl RedoTimer {
    pub fn new(now: f64, min: f64, max: f64) -> Self {
        RedoTimer {
            timer: StoreTimer::new(now, min),
            min,
            max,
        }
    }

    pub fn restart(&mut self, now: f64) {
        self.timer.restart(now);
    }

    pub fn expired(&self, now: f64) -> bool {
        self.timer.expired(now)
    }

    /// Doubles the backoff (capped at `max`, floored at `min`) and restarts
    /// the timer against `now`.
    pub fn backoff(&mut self, now: f64) {
        let next = (self.timer.duration() * 2.0).clamp(self.min, self.max);
        self.timer = StoreTimer::new(now, next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redo_timer_doubles_up_to_max() {
        let mut t = RedoTimer::new(0.0, 1.0, 4.0);
        assert!((t.timer.duration() - 1.0).abs() < f64::EPSILON);
        t.backoff(1.0);
        assert!((t.timer.duration() - 2.0).abs() < f64::EPSILON);
        t.backoff(3.0);
        assert!((t.timer.duration() - 4.0).abs() < f64::EPSILON);
        t.backoff(7.0);
        assert!((t.timer.duration() - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn store_timer_with_zero_duration_never_expires() {
        let t = StoreTimer::new(0.0, 0.0);
        assert!(!t.expired(1_000_000.0));
    }
}
