//! Bounded polling with an injectable clock.
//!
//! Every wait in the setup flow goes through a [`Clock`] so tests can run
//! the discovery loops against a [`ManualClock`] instead of sleeping.

use std::cell::Cell;
use std::time::{Duration, Instant};

/// Source of time for polling loops.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by [`std::thread::sleep`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Deterministic clock: `sleep` advances `now` instantly.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Cell<Duration>,
    sleeps: Cell<u32>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Cell::new(Duration::ZERO),
            sleeps: Cell::new(0),
        }
    }

    /// Total simulated time since construction.
    pub fn elapsed(&self) -> Duration {
        self.elapsed.get()
    }

    /// Number of `sleep` calls observed.
    pub fn sleeps(&self) -> u32 {
        self.sleeps.get()
    }

    /// Move time forward without counting a sleep.
    pub fn advance(&self, duration: Duration) {
        self.elapsed.set(self.elapsed.get() + duration);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed.get()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.set(self.sleeps.get() + 1);
        self.advance(duration);
    }
}

/// Fixed-interval retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Upper bound on time spent sleeping if the deadline never intervenes.
    pub fn budget(&self) -> Duration {
        self.interval
            .saturating_mul(self.max_attempts.saturating_sub(1))
    }

    /// Run `check` until it yields a value, attempts run out, or `deadline`
    /// passes.
    ///
    /// Checks first, then sleeps. A sleep is clipped to the time left before
    /// `deadline`, so the loop never overshoots it by more than one check.
    pub fn poll<T>(
        &self,
        clock: &dyn Clock,
        deadline: Instant,
        mut check: impl FnMut(u32) -> Option<T>,
    ) -> Option<T> {
        for attempt in 1..=self.max_attempts {
            if clock.now() > deadline {
                tracing::debug!("poll deadline reached before attempt {attempt}");
                return None;
            }
            if let Some(value) = check(attempt) {
                return Some(value);
            }
            if attempt == self.max_attempts {
                break;
            }
            let remaining = deadline.saturating_duration_since(clock.now());
            if remaining.is_zero() {
                break;
            }
            clock.sleep(self.interval.min(remaining));
        }
        None
    }
}
