use std::time::{Duration, Instant};

/// Rate limiter that never loses the last value of a burst.
///
/// The first value after a quiet period goes out immediately. Values offered
/// inside the window replace each other and the latest one goes out once the
/// window has elapsed.
#[derive(Debug)]
pub struct LosslessThrottle<T> {
    pending: Option<T>,
    last_emit: Option<Instant>,
    window: Duration,
}

impl<T> LosslessThrottle<T> {
    pub fn new(window: Duration) -> Self {
        Self {
            pending: None,
            last_emit: None,
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Offer a value; returns it back if it may be emitted right away
    pub fn offer(&mut self, now: Instant, value: T) -> Option<T> {
        if self.is_open(now) {
            self.pending = None;
            self.last_emit = Some(now);
            Some(value)
        } else {
            self.pending = Some(value);
            None
        }
    }

    /// Take the pending value once the window has elapsed
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        if self.pending.is_some() && self.is_open(now) {
            self.last_emit = Some(now);
            self.pending.take()
        } else {
            None
        }
    }

    /// When the pending value becomes due
    pub fn deadline(&self) -> Option<Instant> {
        match (&self.pending, self.last_emit) {
            (Some(_), Some(last)) => Some(last + self.window),
            (Some(_), None) => Some(Instant::now()),
            (None, _) => None,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Drop the pending value without emitting it
    pub fn discard(&mut self) {
        self.pending = None;
    }

    /// Take the pending value regardless of the window
    pub fn flush(&mut self) -> Option<T> {
        self.pending.take()
    }

    fn is_open(&self, now: Instant) -> bool {
        self.last_emit
            .map_or(true, |last| now.saturating_duration_since(last) >= self.window)
    }
}
