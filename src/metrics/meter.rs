//! Event meter with mean and moving-average rates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::clock::Clock;
use super::ewma::{Ewma, TICK_INTERVAL};

/// Counts events and tracks how fast they arrive.
///
/// A meter exposes four rates, all in events per second:
/// - the mean rate since the meter was created,
/// - one, five and fifteen minute exponentially weighted moving averages.
///
/// Marking and reading are lock-free. The moving averages are brought up to
/// date lazily on every mark or read; whichever caller first notices that a
/// tick is due claims it with a compare-and-swap and applies it for everyone.
#[derive(Debug)]
pub struct Meter {
    count: AtomicU64,
    m1: Ewma,
    m5: Ewma,
    m15: Ewma,
    start: Instant,
    /// Nanoseconds since `start` at which the current tick interval began
    last_tick: AtomicU64,
    clock: Arc<dyn Clock>,
}

/// Point-in-time view of a meter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterSnapshot {
    pub name: String,
    pub count: u64,
    pub mean_rate: f64,
    pub m1_rate: f64,
    pub m5_rate: f64,
    pub m15_rate: f64,
}

impl Meter {
    /// Create a meter that starts measuring now, according to `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let start = clock.now();
        Self {
            count: AtomicU64::new(0),
            m1: Ewma::one_minute(),
            m5: Ewma::five_minutes(),
            m15: Ewma::fifteen_minutes(),
            start,
            last_tick: AtomicU64::new(0),
            clock,
        }
    }

    /// Record one event.
    pub fn mark(&self) {
        self.mark_n(1);
    }

    /// Record `n` events.
    pub fn mark_n(&self, n: u64) {
        self.tick_if_necessary();
        self.count.fetch_add(n, Ordering::AcqRel);
        self.m1.update(n);
        self.m5.update(n);
        self.m15.update(n);
    }

    /// Total number of events recorded.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    /// Events per second since the meter was created.
    ///
    /// Zero for a meter that has never been marked. Events marked at the
    /// exact instant of creation yield an infinite rate.
    pub fn mean_rate(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            return 0.0;
        }
        let elapsed = self.clock.now().saturating_duration_since(self.start);
        count as f64 / elapsed.as_secs_f64()
    }

    /// One-minute exponentially weighted moving average.
    pub fn one_minute_rate(&self) -> f64 {
        self.tick_if_necessary();
        self.m1.rate()
    }

    /// Five-minute exponentially weighted moving average.
    pub fn five_minute_rate(&self) -> f64 {
        self.tick_if_necessary();
        self.m5.rate()
    }

    /// Fifteen-minute exponentially weighted moving average.
    pub fn fifteen_minute_rate(&self) -> f64 {
        self.tick_if_necessary();
        self.m15.rate()
    }

    /// Capture every rate of this meter under `name`.
    pub fn snapshot(&self, name: &str) -> MeterSnapshot {
        MeterSnapshot {
            name: name.to_string(),
            count: self.count(),
            mean_rate: self.mean_rate(),
            m1_rate: self.one_minute_rate(),
            m5_rate: self.five_minute_rate(),
            m15_rate: self.fifteen_minute_rate(),
        }
    }

    fn tick_if_necessary(&self) {
        let old_tick = self.last_tick.load(Ordering::Acquire);
        let now = self.elapsed_nanos();
        let age = now.saturating_sub(old_tick);
        let interval = TICK_INTERVAL.as_nanos() as u64;

        if age < interval {
            return;
        }

        let new_tick = now - age % interval;
        if self
            .last_tick
            .compare_exchange(old_tick, new_tick, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Another caller claimed this tick.
            return;
        }

        let required_ticks = age / interval;
        for ewma in [&self.m1, &self.m5, &self.m15] {
            ewma.tick();
            ewma.decay(required_ticks - 1);
        }
    }

    fn elapsed_nanos(&self) -> u64 {
        let elapsed = self.clock.now().saturating_duration_since(self.start);
        u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
    }

    #[cfg(test)]
    pub(crate) fn force_rates(&self, m1: f64, m5: f64, m15: f64) {
        self.m1.force_rate(m1);
        self.m5.force_rate(m5);
        self.m15.force_rate(m15);
    }
}
