//! ratebreaker - Rate-Based Circuit Breaker
//!
//! This crate guards named operations with circuits that open while the
//! operation's failure rate is at or above a threshold. Failures are counted
//! by exponentially weighted moving-average meters; a circuit closes again
//! on its own once the selected rate decays below its threshold.

pub mod breaker;
pub mod config;
pub mod error;
pub mod metrics;

pub use breaker::{CircuitBreakerManager, CircuitStatus, RateType};
pub use error::{CircuitOpenError, GuardedError, RateBreakerError, Result};
pub use metrics::{Meter, MetricRegistry};
