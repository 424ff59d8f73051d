//! Conventional circuit and meter names.
//!
//! Guarded operations are registered explicitly by name. These helpers build
//! the names a handler method gets when it does not pick its own, so that
//! dashboards keyed on them keep working.

/// Suffix appended to method-derived circuit names.
pub const CIRCUIT_SUFFIX: &str = ".circuitBreaker";

/// Suffix of the meter that counts rejected calls for a circuit.
pub const OPEN_CIRCUIT_SUFFIX: &str = ".openCircuit";

/// Circuit name for `method` on the handler type at `type_path`.
///
/// `::` path separators are normalized to `.`.
pub fn method_circuit_name(type_path: &str, method: &str) -> String {
    format!("{}.{}{}", type_path.replace("::", "."), method, CIRCUIT_SUFFIX)
}

/// Circuit name for `method` on handler type `T`.
pub fn circuit_name_for<T: ?Sized>(method: &str) -> String {
    method_circuit_name(std::any::type_name::<T>(), method)
}

/// Name of the rejection meter belonging to `circuit`.
pub fn open_circuit_name(circuit: &str) -> String {
    format!("{}{}", circuit, OPEN_CIRCUIT_SUFFIX)
}

/// Whether `name` lies in the namespace reserved for rejection meters.
///
/// No circuit's failure meter is ever published under such a name.
pub fn is_rejection_meter_name(name: &str) -> bool {
    name.ends_with(OPEN_CIRCUIT_SUFFIX)
}
