//! Error types for ratebreaker.

use thiserror::Error;

/// Main error type for configuration and setup.
#[derive(Error, Debug)]
pub enum RateBreakerError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A threshold that is negative or not a finite number
    #[error("Invalid threshold {threshold} for circuit '{name}': must be a finite, non-negative rate")]
    InvalidThreshold { name: String, threshold: f64 },

    /// A circuit name that falls in the rejection meter namespace
    #[error("Circuit name '{0}' is reserved for rejection meters")]
    ReservedCircuitName(String),

    /// Errors from layered configuration loading
    #[error("Settings error: {0}")]
    Settings(#[from] ::config::ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for ratebreaker operations.
pub type Result<T> = std::result::Result<T, RateBreakerError>;

/// Returned instead of running an operation whose circuit is open.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Circuit breaker is currently opened: {name}")]
pub struct CircuitOpenError {
    name: String,
}

impl CircuitOpenError {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Name of the circuit that rejected the call.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Outcome of a guarded call that did not succeed.
#[derive(Error, Debug)]
pub enum GuardedError<E> {
    /// The circuit was open; the operation never ran
    #[error(transparent)]
    Open(#[from] CircuitOpenError),

    /// The operation ran and returned this error
    #[error(transparent)]
    Operation(E),
}

impl<E> GuardedError<E> {
    /// Whether the call was rejected by an open circuit.
    pub fn is_open(&self) -> bool {
        matches!(self, GuardedError::Open(_))
    }

    /// The operation's own error, if the operation ran.
    pub fn into_operation(self) -> Option<E> {
        match self {
            GuardedError::Operation(e) => Some(e),
            GuardedError::Open(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_open_message() {
        let err = CircuitOpenError::new("test.meter");
        assert_eq!(err.to_string(), "Circuit breaker is currently opened: test.meter");
        assert_eq!(err.name(), "test.meter");
    }

    #[test]
    fn test_guarded_error_preserves_operation_error() {
        let err: GuardedError<std::io::Error> =
            GuardedError::Operation(std::io::Error::other("disk on fire"));
        assert!(!err.is_open());
        assert_eq!(err.to_string(), "disk on fire");
        assert_eq!(err.into_operation().unwrap().to_string(), "disk on fire");
    }

    #[test]
    fn test_guarded_error_from_open() {
        let err: GuardedError<std::io::Error> = CircuitOpenError::new("x").into();
        assert!(err.is_open());
        assert!(err.into_operation().is_none());
    }

    #[derive(Error, Debug)]
    #[error("lookup failed")]
    struct LookupError(#[source] std::io::Error);

    #[test]
    fn test_guarded_error_keeps_operation_cause_chain() {
        use std::error::Error as _;

        let err: GuardedError<LookupError> =
            GuardedError::Operation(LookupError(std::io::Error::other("connection reset")));
        assert_eq!(err.to_string(), "lookup failed");
        assert_eq!(err.source().unwrap().to_string(), "connection reset");
    }

    #[test]
    fn test_open_error_has_no_source() {
        use std::error::Error as _;

        let err: GuardedError<LookupError> = CircuitOpenError::new("x").into();
        assert!(err.source().is_none());
    }

    #[test]
    fn test_invalid_threshold_message() {
        let err = RateBreakerError::InvalidThreshold {
            name: "orders".to_string(),
            threshold: -1.0,
        };
        assert!(err.to_string().contains("'orders'"));
    }
}
