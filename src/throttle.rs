//! Time-windowed coalescing of high-frequency events.
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use iced::time::Instant;

/// Source of monotonic time, measured from an arbitrary origin.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn set(&self, to: Duration) {
        self.nanos.store(to.as_nanos() as u64, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Relaxed))
    }
}

/// Emits at most one payload per window. Payloads arriving inside the window
/// replace each other; the last one is emitted by [`poll`](Self::poll) once
/// the window has passed.
#[derive(Debug, Clone)]
pub struct Throttle<T> {
    window: Duration,
    last_emit: Option<Duration>,
    pending: Option<T>,
}

impl<T> Throttle<T> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_emit: None,
            pending: None,
        }
    }

    fn open(&self, now: Duration) -> bool {
        self.last_emit
            .is_none_or(|last| now.saturating_sub(last) >= self.window)
    }

    pub fn event(&mut self, now: Duration, payload: T) -> Option<T> {
        if self.open(now) {
            self.last_emit = Some(now);
            self.pending = None;
            Some(payload)
        } else {
            self.pending = Some(payload);
            None
        }
    }

    pub fn poll(&mut self, now: Duration) -> Option<T> {
        if self.pending.is_some() && self.open(now) {
            self.last_emit = Some(now);
            self.pending.take()
        } else {
            None
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// When a pending payload becomes due.
    pub fn deadline(&self) -> Option<Duration> {
        self.pending.as_ref()?;
        Some(self.last_emit.map_or(Duration::ZERO, |last| last + self.window))
    }
}
