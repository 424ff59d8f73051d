//! Named catalog of meters.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::clock::{Clock, SystemClock};
use super::meter::{Meter, MeterSnapshot};

/// A catalog of meters keyed by name.
///
/// Every meter created through the catalog is reachable by its exact name
/// for as long as the catalog lives, which is what external dashboards and
/// alerting key off. The catalog is meant to be shared behind an `Arc`
/// between the code that marks meters and the code that reports them.
#[derive(Debug)]
pub struct MetricRegistry {
    meters: DashMap<String, Arc<Meter>>,
    clock: Arc<dyn Clock>,
}

impl MetricRegistry {
    /// Create an empty catalog using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create an empty catalog whose meters read time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            meters: DashMap::new(),
            clock,
        }
    }

    /// Get the meter registered as `name`, creating it if needed.
    pub fn meter(&self, name: &str) -> Arc<Meter> {
        if let Some(meter) = self.meters.get(name) {
            return Arc::clone(meter.value());
        }

        let meter = self.meters.entry(name.to_string()).or_insert_with(|| {
            debug!(meter = %name, "Registering meter");
            Arc::new(Meter::new(Arc::clone(&self.clock)))
        });
        Arc::clone(meter.value())
    }

    /// Get the meter registered as `name`, if any.
    pub fn get(&self, name: &str) -> Option<Arc<Meter>> {
        self.meters.get(name).map(|meter| Arc::clone(meter.value()))
    }

    /// Names of all registered meters, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.meters.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of registered meters.
    pub fn len(&self) -> usize {
        self.meters.len()
    }

    /// Whether no meter has been registered yet.
    pub fn is_empty(&self) -> bool {
        self.meters.is_empty()
    }

    /// The clock handed to new meters.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Snapshot every meter, sorted by name.
    pub fn snapshot(&self) -> Vec<MeterSnapshot> {
        let mut snapshots: Vec<MeterSnapshot> = self
            .meters
            .iter()
            .map(|entry| entry.value().snapshot(entry.key()))
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Render the snapshot as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.snapshot())
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ManualClock;
    use std::time::Duration;

    #[test]
    fn test_meter_is_created_once() {
        let registry = MetricRegistry::new();
        let first = registry.meter("db.query");
        let second = registry.meter("db.query");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_does_not_create() {
        let registry = MetricRegistry::new();
        assert!(registry.get("missing").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_first_access_yields_one_meter() {
        let registry = MetricRegistry::new();

        let meters: Vec<Arc<Meter>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| scope.spawn(|| registry.meter("contended")))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(registry.len(), 1);
        assert!(meters.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_snapshot_is_sorted_and_uses_exact_names() {
        let clock = ManualClock::new();
        let registry = MetricRegistry::with_clock(Arc::new(clock.clone()));
        registry.meter("b.second").mark();
        registry.meter("a.first").mark_n(2);
        clock.advance(Duration::from_secs(1));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].name, "a.first");
        assert_eq!(snapshot[0].count, 2);
        assert_eq!(snapshot[1].name, "b.second");
        assert_eq!(registry.names(), vec!["a.first", "b.second"]);
    }

    #[test]
    fn test_to_json_lists_meters() {
        let registry = MetricRegistry::new();
        registry.meter("payments.charge");

        let json = registry.to_json().unwrap();
        let parsed: Vec<MeterSnapshot> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0].name, "payments.charge");
        assert_eq!(parsed[0].count, 0);
    }
}
