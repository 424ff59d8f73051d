//! Per-circuit meters and thresholds.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use super::naming::is_rejection_meter_name;
use crate::metrics::{Meter, MetricRegistry};

/// A circuit's meter together with the threshold it was created with.
#[derive(Debug, Clone)]
pub struct CircuitMeter {
    meter: Arc<Meter>,
    threshold: f64,
}

impl CircuitMeter {
    /// The failure meter backing the circuit.
    pub fn meter(&self) -> &Arc<Meter> {
        &self.meter
    }

    /// Failure rate, in events per second, at or above which the circuit opens.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

/// Maps circuit names to their failure meters and thresholds.
///
/// Entries are write-once: the first caller to touch a name decides its
/// threshold, and every later caller gets the same meter back regardless of
/// the threshold it asks for.
///
/// Catalog names ending in `.openCircuit` belong to rejection meters. A
/// circuit whose own name ends that way gets a meter that is not published
/// in the catalog, so rejections can never feed a failure meter.
#[derive(Debug)]
pub struct RateMeterRegistry {
    circuits: DashMap<String, CircuitMeter>,
    catalog: Arc<MetricRegistry>,
    default_threshold: f64,
}

impl RateMeterRegistry {
    /// Create an empty registry whose meters are published in `catalog`.
    pub fn new(catalog: Arc<MetricRegistry>, default_threshold: f64) -> Self {
        Self {
            circuits: DashMap::new(),
            catalog,
            default_threshold,
        }
    }

    /// Get the meter for `name`, creating it with the default threshold.
    pub fn get_or_create(&self, name: &str) -> Arc<Meter> {
        self.get_or_create_with_threshold(name, self.default_threshold)
    }

    /// Get the meter for `name`, creating it with `threshold` if absent.
    pub fn get_or_create_with_threshold(&self, name: &str, threshold: f64) -> Arc<Meter> {
        Arc::clone(self.circuit(name, threshold).meter())
    }

    /// Get or create the full entry for `name`.
    pub(crate) fn circuit(&self, name: &str, threshold: f64) -> CircuitMeter {
        debug_assert!(
            threshold.is_finite() && threshold >= 0.0,
            "invalid threshold {threshold} for circuit {name}"
        );
        if let Some(existing) = self.circuits.get(name) {
            return existing.value().clone();
        }

        self.circuits
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(circuit = %name, threshold, "Creating circuit meter");
                let meter = if is_rejection_meter_name(name) {
                    warn!(circuit = %name, "Circuit name is reserved for rejection meters, not publishing its meter");
                    Arc::new(Meter::new(Arc::clone(self.catalog.clock())))
                } else {
                    self.catalog.meter(name)
                };
                CircuitMeter { meter, threshold }
            })
            .value()
            .clone()
    }

    /// Look up an existing entry without creating one.
    pub fn get(&self, name: &str) -> Option<CircuitMeter> {
        self.circuits.get(name).map(|entry| entry.value().clone())
    }

    /// Names of all known circuits, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.circuits.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of known circuits.
    pub fn len(&self) -> usize {
        self.circuits.len()
    }

    /// Whether no circuit has been created yet.
    pub fn is_empty(&self) -> bool {
        self.circuits.is_empty()
    }

    /// Threshold used for names created without an explicit one.
    pub fn default_threshold(&self) -> f64 {
        self.default_threshold
    }

    /// The catalog meters are published in.
    pub fn catalog(&self) -> &Arc<MetricRegistry> {
        &self.catalog
    }
}
