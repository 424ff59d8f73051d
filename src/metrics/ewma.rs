//! Exponentially weighted moving average of an event rate.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// How often pending events are folded into the average.
pub const TICK_INTERVAL: Duration = Duration::from_secs(5);

const TICK_SECS: f64 = 5.0;
const SECONDS_PER_MINUTE: f64 = 60.0;

/// A lock-free EWMA over a fixed window.
///
/// Events are accumulated with [`Ewma::update`] and folded into the rate
/// once per [`TICK_INTERVAL`] by [`Ewma::tick`]. The caller is responsible
/// for calling `tick` on schedule and for making sure only one thread ticks
/// a given average at a time; [`Meter`](super::Meter) does both.
#[derive(Debug)]
pub struct Ewma {
    alpha: f64,
    /// Events seen since the last tick
    uncounted: AtomicU64,
    /// Current rate in events per second, stored as `f64` bits
    rate: AtomicU64,
    initialized: AtomicBool,
}

impl Ewma {
    /// Create an average with an explicit smoothing factor.
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            uncounted: AtomicU64::new(0),
            rate: AtomicU64::new(0f64.to_bits()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Create an average whose decay matches a window of `minutes`.
    pub fn with_window(minutes: f64) -> Self {
        Self::new(1.0 - (-TICK_SECS / SECONDS_PER_MINUTE / minutes).exp())
    }

    /// One-minute load-average style EWMA.
    pub fn one_minute() -> Self {
        Self::with_window(1.0)
    }

    /// Five-minute load-average style EWMA.
    pub fn five_minutes() -> Self {
        Self::with_window(5.0)
    }

    /// Fifteen-minute load-average style EWMA.
    pub fn fifteen_minutes() -> Self {
        Self::with_window(15.0)
    }

    /// The smoothing factor applied on each tick.
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Record `n` new events.
    pub fn update(&self, n: u64) {
        self.uncounted.fetch_add(n, Ordering::AcqRel);
    }

    /// Fold the events seen since the last tick into the rate.
    ///
    /// The first tick seeds the average with the instantaneous rate instead
    /// of decaying from zero.
    pub fn tick(&self) {
        let count = self.uncounted.swap(0, Ordering::AcqRel);
        let instant_rate = count as f64 / TICK_SECS;

        if self.initialized.load(Ordering::Acquire) {
            let rate = self.rate();
            self.store_rate(rate + self.alpha * (instant_rate - rate));
        } else {
            self.store_rate(instant_rate);
            self.initialized.store(true, Ordering::Release);
        }
    }

    /// Apply `ticks` ticks during which no events arrived.
    ///
    /// Equivalent to calling [`Ewma::tick`] `ticks` times with nothing
    /// pending, without the loop.
    pub fn decay(&self, ticks: u64) {
        if ticks == 0 {
            return;
        }
        if !self.initialized.load(Ordering::Acquire) {
            self.initialized.store(true, Ordering::Release);
            return;
        }
        let factor = (1.0 - self.alpha).powf(ticks as f64);
        self.store_rate(self.rate() * factor);
    }

    /// Current rate in events per second.
    pub fn rate(&self) -> f64 {
        f64::from_bits(self.rate.load(Ordering::Acquire))
    }

    fn store_rate(&self, rate: f64) {
        self.rate.store(rate.to_bits(), Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn force_rate(&self, rate: f64) {
        self.store_rate(rate);
        self.initialized.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn test_new_average_is_zero() {
        let ewma = Ewma::one_minute();
        assert_eq!(ewma.rate(), 0.0);
    }

    #[test]
    fn test_update_without_tick_does_not_change_rate() {
        let ewma = Ewma::one_minute();
        ewma.update(10);
        assert_eq!(ewma.rate(), 0.0);
    }

    #[test]
    fn test_first_tick_seeds_instant_rate() {
        let ewma = Ewma::five_minutes();
        ewma.update(3);
        ewma.tick();
        assert_close(ewma.rate(), 0.6);
    }

    #[test]
    fn test_one_minute_decays_like_load_average() {
        let ewma = Ewma::one_minute();
        ewma.update(3);
        ewma.tick();

        // Twelve quiet ticks make up one minute, one e-fold for this window.
        for _ in 0..12 {
            ewma.tick();
        }
        assert_close(ewma.rate(), 0.6 * (-1.0f64).exp());
    }

    #[test]
    fn test_decay_matches_repeated_ticks() {
        let looped = Ewma::fifteen_minutes();
        let closed_form = Ewma::fifteen_minutes();
        for ewma in [&looped, &closed_form] {
            ewma.update(7);
            ewma.tick();
        }

        for _ in 0..40 {
            looped.tick();
        }
        closed_form.decay(40);

        assert!((looped.rate() - closed_form.rate()).abs() < 1e-12);
    }

    #[test]
    fn test_decay_on_uninitialized_average_stays_zero() {
        let ewma = Ewma::one_minute();
        ewma.decay(5);
        assert_eq!(ewma.rate(), 0.0);

        // Subsequent ticks blend instead of seeding.
        ewma.update(5);
        ewma.tick();
        assert_close(ewma.rate(), ewma.alpha() * 1.0);
    }

    #[test]
    fn test_alpha_per_window() {
        assert_close(Ewma::one_minute().alpha(), 1.0 - (-5.0f64 / 60.0).exp());
        assert_close(Ewma::five_minutes().alpha(), 1.0 - (-5.0f64 / 300.0).exp());
        assert_close(Ewma::fifteen_minutes().alpha(), 1.0 - (-5.0f64 / 900.0).exp());
    }
}
