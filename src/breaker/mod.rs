//! Rate-threshold circuit breaking.
//!
//! A circuit is open while the failure rate of its operation is at or above
//! the circuit's threshold, and closed otherwise. There is no half-open
//! state: the decision is recomputed from the live rate on every check.

mod manager;
pub mod naming;
mod rate_type;
mod registry;

pub use manager::{CircuitBreakerManager, CircuitStatus};
pub use rate_type::RateType;
pub use registry::{CircuitMeter, RateMeterRegistry};
