//! The circuit decision engine.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::naming::{is_rejection_meter_name, open_circuit_name};
use super::rate_type::RateType;
use super::registry::{CircuitMeter, RateMeterRegistry};
use crate::config::{check_threshold, CircuitBreakerConfig};
use crate::error::{CircuitOpenError, GuardedError, RateBreakerError, Result};
use crate::metrics::{Meter, MetricRegistry};

/// Opens circuits whose failure rate reaches their threshold.
///
/// A circuit is identified by name and backed by a failure meter. Whether it
/// is open is never stored: every check reads the meter's current rate for
/// the configured [`RateType`] and compares it to the circuit's threshold, so
/// a circuit closes again on its own once failures stop and the rate decays.
///
/// The manager is thread-safe and meant to be shared, e.g. behind an `Arc`.
///
/// ```
/// use ratebreaker::breaker::{CircuitBreakerManager, RateType};
/// use ratebreaker::metrics::MetricRegistry;
/// use std::sync::Arc;
///
/// let manager = CircuitBreakerManager::new(Arc::new(MetricRegistry::new()), 2.0, RateType::Mean);
/// manager.register("inventory.lookup", Some(0.5)).unwrap();
///
/// let result: Result<u32, String> = manager.wrap("inventory.lookup", |_meter| Ok(7));
/// assert_eq!(result, Ok(7));
/// assert!(!manager.is_open("inventory.lookup"));
/// ```
#[derive(Debug)]
pub struct CircuitBreakerManager {
    registry: RateMeterRegistry,
    rate_type: RateType,
    track_rejections: bool,
}

/// Point-in-time state of one circuit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitStatus {
    pub name: String,
    pub threshold: f64,
    pub rate_type: RateType,
    /// The rate selected by `rate_type`, in events per second
    pub rate: f64,
    /// Total failures recorded
    pub count: u64,
    pub open: bool,
}

impl CircuitBreakerManager {
    /// Create a manager publishing its meters in `catalog`.
    ///
    /// `default_threshold` is the failure rate, in events per second, used
    /// for every circuit not registered with its own threshold.
    pub fn new(catalog: Arc<MetricRegistry>, default_threshold: f64, rate_type: RateType) -> Self {
        debug_assert!(
            check_threshold("<default>", default_threshold).is_ok(),
            "invalid default threshold {default_threshold}"
        );
        Self {
            registry: RateMeterRegistry::new(catalog, default_threshold),
            rate_type,
            track_rejections: true,
        }
    }

    /// Build a manager from configuration and register its circuits.
    pub fn from_config(
        catalog: Arc<MetricRegistry>,
        config: &CircuitBreakerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let manager = Self::new(catalog, config.threshold, config.rate_type)
            .with_rejection_tracking(config.track_rejections);
        manager.register_all(&config.circuits)?;
        debug!(
            threshold = config.threshold,
            rate_type = %config.rate_type,
            circuits = config.circuits.len(),
            "Circuit breaker manager initialized"
        );
        Ok(manager)
    }

    /// Enable or disable the `<name>.openCircuit` rejection meters.
    pub fn with_rejection_tracking(mut self, enabled: bool) -> Self {
        self.track_rejections = enabled;
        self
    }

    /// Get the failure meter for `name`, creating it with the default
    /// threshold if needed.
    pub fn meter(&self, name: &str) -> Arc<Meter> {
        self.registry.get_or_create(name)
    }

    /// Get the failure meter for `name`, creating it with `threshold` if
    /// needed. An existing circuit keeps its original threshold.
    pub fn meter_with_threshold(&self, name: &str, threshold: f64) -> Arc<Meter> {
        self.registry.get_or_create_with_threshold(name, threshold)
    }

    /// Register a guarded operation ahead of its first call.
    ///
    /// `custom` overrides the default threshold. Registration must happen
    /// before the first [`is_open`](Self::is_open) for the name, otherwise
    /// the default threshold is already locked in.
    ///
    /// Fails for a negative or non-finite `custom` threshold, and for names
    /// ending in `.openCircuit`, which belong to rejection meters.
    pub fn register(&self, name: &str, custom: Option<f64>) -> Result<Arc<Meter>> {
        if is_rejection_meter_name(name) {
            return Err(RateBreakerError::ReservedCircuitName(name.to_string()));
        }
        let threshold = match custom {
            Some(threshold) => {
                check_threshold(name, threshold)?;
                threshold
            }
            None => self.registry.default_threshold(),
        };

        let circuit = self.registry.circuit(name, threshold);
        if self.track_rejections {
            self.registry.catalog().meter(&open_circuit_name(name));
        }
        if circuit.threshold() == threshold {
            debug!(circuit = %name, threshold, "Registered circuit");
        } else {
            debug!(
                circuit = %name,
                requested = threshold,
                threshold = circuit.threshold(),
                "Circuit already registered, keeping its threshold"
            );
        }
        Ok(Arc::clone(circuit.meter()))
    }

    /// Register every `(name, threshold)` pair in `circuits`.
    pub fn register_all(&self, circuits: &HashMap<String, f64>) -> Result<()> {
        for (name, threshold) in circuits {
            self.register(name, Some(*threshold))?;
        }
        Ok(())
    }

    /// Whether the circuit for `name` is open.
    ///
    /// Unknown names are created with the default threshold.
    pub fn is_open(&self, name: &str) -> bool {
        let circuit = self.registry.circuit(name, self.registry.default_threshold());
        let rate = self.rate_type.rate_of(circuit.meter());
        let open = rate >= circuit.threshold();
        trace!(
            circuit = %name,
            rate,
            threshold = circuit.threshold(),
            open,
            "Checked circuit"
        );
        open
    }

    /// Run `operation`, marking the circuit's meter if it fails.
    ///
    /// The operation always runs, whatever the state of the circuit, and its
    /// result is returned unchanged. A panic inside the operation also counts
    /// as a failure before it continues to unwind.
    pub fn wrap<T, E, F>(&self, name: &str, operation: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Meter) -> std::result::Result<T, E>,
    {
        let meter = self.registry.get_or_create(name);
        let guard = MarkOnUnwind { meter: &*meter };
        let result = operation(&*meter);
        std::mem::forget(guard);

        if result.is_err() {
            meter.mark();
            trace!(circuit = %name, count = meter.count(), "Operation failed");
        }
        result
    }

    /// Run `operation` unless the circuit for `name` is open.
    ///
    /// When open, the operation is not invoked and the failure meter is left
    /// untouched. Otherwise this behaves like [`wrap`](Self::wrap).
    pub fn wrap_guarded<T, E, F>(
        &self,
        name: &str,
        operation: F,
    ) -> std::result::Result<T, GuardedError<E>>
    where
        F: FnOnce(&Meter) -> std::result::Result<T, E>,
    {
        self.check_closed(name)?;
        self.wrap(name, operation).map_err(GuardedError::Operation)
    }

    /// Await `operation`, marking the circuit's meter if it fails.
    pub async fn wrap_async<T, E, Fut>(
        &self,
        name: &str,
        operation: Fut,
    ) -> std::result::Result<T, E>
    where
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let meter = self.registry.get_or_create(name);
        let result = operation.await;
        if result.is_err() {
            meter.mark();
            trace!(circuit = %name, count = meter.count(), "Operation failed");
        }
        result
    }

    /// Await `operation` unless the circuit for `name` is open.
    ///
    /// When open, the future is dropped without being polled.
    pub async fn wrap_guarded_async<T, E, Fut>(
        &self,
        name: &str,
        operation: Fut,
    ) -> std::result::Result<T, GuardedError<E>>
    where
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        self.check_closed(name)?;
        self.wrap_async(name, operation)
            .await
            .map_err(GuardedError::Operation)
    }

    fn check_closed(&self, name: &str) -> std::result::Result<(), CircuitOpenError> {
        if !self.is_open(name) {
            return Ok(());
        }
        if self.track_rejections {
            self.registry.catalog().meter(&open_circuit_name(name)).mark();
        }
        warn!(circuit = %name, "Circuit breaker open, rejecting call");
        Err(CircuitOpenError::new(name))
    }

    /// Number of calls rejected by the open circuit for `name`.
    ///
    /// Always zero when rejection tracking is disabled.
    pub fn rejections(&self, name: &str) -> u64 {
        self.registry
            .catalog()
            .get(&open_circuit_name(name))
            .map(|meter| meter.count())
            .unwrap_or(0)
    }

    /// Current state of an existing circuit. Does not create one.
    pub fn status(&self, name: &str) -> Option<CircuitStatus> {
        self.registry
            .get(name)
            .map(|circuit| self.status_of(name, &circuit))
    }

    /// Current state of every known circuit, sorted by name.
    pub fn statuses(&self) -> Vec<CircuitStatus> {
        self.registry
            .names()
            .into_iter()
            .filter_map(|name| self.status(&name))
            .collect()
    }

    fn status_of(&self, name: &str, circuit: &CircuitMeter) -> CircuitStatus {
        let rate = self.rate_type.rate_of(circuit.meter());
        CircuitStatus {
            name: name.to_string(),
            threshold: circuit.threshold(),
            rate_type: self.rate_type,
            rate,
            count: circuit.meter().count(),
            open: rate >= circuit.threshold(),
        }
    }

    /// Threshold recorded for `name`, if the circuit exists.
    pub fn threshold(&self, name: &str) -> Option<f64> {
        self.registry.get(name).map(|circuit| circuit.threshold())
    }

    pub fn default_threshold(&self) -> f64 {
        self.registry.default_threshold()
    }

    pub fn rate_type(&self) -> RateType {
        self.rate_type
    }

    /// The catalog the manager's meters are published in.
    pub fn catalog(&self) -> &Arc<MetricRegistry> {
        self.registry.catalog()
    }

    /// The underlying name-to-meter registry.
    pub fn registry(&self) -> &RateMeterRegistry {
        &self.registry
    }
}

/// Marks the meter if dropped, i.e. if the operation unwinds.
struct MarkOnUnwind<'a> {
    meter: &'a Meter,
}

impl Drop for MarkOnUnwind<'_> {
    fn drop(&mut self) {
        self.meter.mark();
    }
}
