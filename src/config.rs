//! Configuration management for ratebreaker.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::breaker::naming::is_rejection_meter_name;
use crate::breaker::RateType;
use crate::error::{RateBreakerError, Result};

/// Prefix for environment variable overrides, e.g.
/// `RATEBREAKER__CIRCUIT_BREAKER__THRESHOLD=0.5`.
pub const ENV_PREFIX: &str = "RATEBREAKER";

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateBreakerConfig {
    /// Circuit breaker configuration
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Default failure rate, in events per second, at which a circuit opens
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Rate window compared against thresholds
    #[serde(default)]
    pub rate_type: RateType,

    /// Count rejected calls in a separate `<name>.openCircuit` meter
    #[serde(default = "default_track_rejections")]
    pub track_rejections: bool,

    /// Per-circuit threshold overrides
    #[serde(default)]
    pub circuits: HashMap<String, f64>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            rate_type: RateType::default(),
            track_rejections: default_track_rejections(),
            circuits: HashMap::new(),
        }
    }
}

fn default_threshold() -> f64 {
    1.0
}

fn default_track_rejections() -> bool {
    true
}

impl CircuitBreakerConfig {
    /// Check thresholds and circuit names.
    pub fn validate(&self) -> Result<()> {
        check_threshold("<default>", self.threshold)?;
        for (name, threshold) in &self.circuits {
            if name.trim().is_empty() {
                return Err(RateBreakerError::Config(
                    "circuit names must not be empty".to_string(),
                ));
            }
            if is_rejection_meter_name(name) {
                return Err(RateBreakerError::ReservedCircuitName(name.clone()));
            }
            check_threshold(name, *threshold)?;
        }
        Ok(())
    }
}

/// Reject thresholds that are negative, NaN or infinite.
pub fn check_threshold(name: &str, threshold: f64) -> Result<()> {
    if threshold.is_finite() && threshold >= 0.0 {
        Ok(())
    } else {
        Err(RateBreakerError::InvalidThreshold {
            name: name.to_string(),
            threshold,
        })
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, overridden by `RUST_LOG` when set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl RateBreakerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: RateBreakerConfig = serde_yaml::from_str(yaml)
            .map_err(|e| RateBreakerError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional YAML file, then apply scalar
    /// overrides from environment variables prefixed by [`ENV_PREFIX`].
    ///
    /// Circuit overrides only come from the file: environment keys are
    /// case-folded, circuit names are not.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    fn load_with_prefix(path: Option<&Path>, prefix: &str) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        let overrides: EnvOverrides = ::config::Config::builder()
            .add_source(
                ::config::Environment::with_prefix(prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        overrides.apply(&mut config);

        config.validate()?;
        Ok(config)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.circuit_breaker.validate()
    }
}

#[derive(Debug, Default, Deserialize)]
struct EnvOverrides {
    #[serde(default)]
    circuit_breaker: CircuitBreakerOverrides,
    #[serde(default)]
    logging: LoggingOverrides,
}

#[derive(Debug, Default, Deserialize)]
struct CircuitBreakerOverrides {
    threshold: Option<f64>,
    rate_type: Option<RateType>,
    track_rejections: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingOverrides {
    level: Option<String>,
    format: Option<LogFormat>,
}

impl EnvOverrides {
    fn apply(self, config: &mut RateBreakerConfig) {
        let cb = self.circuit_breaker;
        if let Some(threshold) = cb.threshold {
            config.circuit_breaker.threshold = threshold;
        }
        if let Some(rate_type) = cb.rate_type {
            config.circuit_breaker.rate_type = rate_type;
        }
        if let Some(track) = cb.track_rejections {
            config.circuit_breaker.track_rejections = track;
        }
        if let Some(level) = self.logging.level {
            config.logging.level = level;
        }
        if let Some(format) = self.logging.format {
            config.logging.format = format;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RateBreakerConfig::default();
        assert_eq!(config.circuit_breaker.threshold, 1.0);
        assert_eq!(config.circuit_breaker.rate_type, RateType::OneMinute);
        assert!(config.circuit_breaker.track_rejections);
        assert!(config.circuit_breaker.circuits.is_empty());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
circuit_breaker:
  threshold: 0.5
  rate_type: ONE_MINUTE
  track_rejections: false
  circuits:
    orders.get.circuitBreaker: 0.2
    payments.charge: 3
logging:
  level: debug
  format: json
"#;
        let config = RateBreakerConfig::from_yaml(yaml).unwrap();
        let cb = &config.circuit_breaker;
        assert_eq!(cb.threshold, 0.5);
        assert_eq!(cb.rate_type, RateType::OneMinute);
        assert!(!cb.track_rejections);
        assert_eq!(cb.circuits["orders.get.circuitBreaker"], 0.2);
        assert_eq!(cb.circuits["payments.charge"], 3.0);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
circuit_breaker:
  rate_type: mean
"#;
        let config = RateBreakerConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.circuit_breaker.threshold, 1.0);
        assert_eq!(config.circuit_breaker.rate_type, RateType::Mean);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_unknown_rate_type_is_rejected() {
        let yaml = r#"
circuit_breaker:
  rate_type: hourly
"#;
        let err = RateBreakerConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, RateBreakerError::Config(_)));
    }

    #[test]
    fn test_negative_threshold_is_rejected() {
        let yaml = r#"
circuit_breaker:
  threshold: -1
"#;
        let err = RateBreakerConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, RateBreakerError::InvalidThreshold { .. }));
    }

    #[test]
    fn test_negative_custom_threshold_is_rejected() {
        let mut config = CircuitBreakerConfig::default();
        config.circuits.insert("bad".to_string(), -0.1);
        let err = config.validate().unwrap_err();
        match err {
            RateBreakerError::InvalidThreshold { name, .. } => assert_eq!(name, "bad"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_zero_threshold_is_valid() {
        let mut config = CircuitBreakerConfig::default();
        config.threshold = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_non_finite_thresholds_are_rejected() {
        assert!(check_threshold("x", f64::NAN).is_err());
        assert!(check_threshold("x", f64::INFINITY).is_err());
    }

    #[test]
    fn test_empty_circuit_name_is_rejected() {
        let mut config = CircuitBreakerConfig::default();
        config.circuits.insert("  ".to_string(), 1.0);
        assert!(matches!(config.validate(), Err(RateBreakerError::Config(_))));
    }

    #[test]
    fn test_load_from_yaml_file() {
        let path = std::env::temp_dir().join(format!(
            "ratebreaker-config-{}.yaml",
            std::process::id()
        ));
        std::fs::write(
            &path,
            "circuit_breaker:\n  threshold: 2.5\n  rate_type: five_minutes\n",
        )
        .unwrap();

        let loaded = RateBreakerConfig::load(Some(&path));
        let from_file = RateBreakerConfig::from_file(&path);
        std::fs::remove_file(&path).unwrap();

        let loaded = loaded.unwrap();
        assert_eq!(loaded.circuit_breaker.threshold, 2.5);
        assert_eq!(loaded.circuit_breaker.rate_type, RateType::FiveMinutes);
        assert_eq!(from_file.unwrap().circuit_breaker.threshold, 2.5);
    }

    struct EnvGuard(Vec<&'static str>);

    impl EnvGuard {
        fn set(vars: &[(&'static str, &str)]) -> Self {
            for (key, value) in vars {
                std::env::set_var(key, value);
            }
            Self(vars.iter().map(|(key, _)| *key).collect())
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for key in &self.0 {
                std::env::remove_var(key);
            }
        }
    }

    #[test]
    fn test_env_overrides_file_values() {
        let path = std::env::temp_dir().join(format!(
            "ratebreaker-env-{}.yaml",
            std::process::id()
        ));
        std::fs::write(
            &path,
            "circuit_breaker:\n  threshold: 0.5\n  rate_type: one_minute\n  circuits:\n    Orders.Get: 0.2\nlogging:\n  level: debug\n",
        )
        .unwrap();

        let loaded = {
            let _env = EnvGuard::set(&[
                ("RBENVTEST__CIRCUIT_BREAKER__THRESHOLD", "0.25"),
                ("RBENVTEST__CIRCUIT_BREAKER__RATE_TYPE", "FIVE_MINUTES"),
                ("RBENVTEST__CIRCUIT_BREAKER__TRACK_REJECTIONS", "false"),
                ("RBENVTEST__LOGGING__FORMAT", "json"),
            ]);
            RateBreakerConfig::load_with_prefix(Some(&path), "RBENVTEST")
        };
        std::fs::remove_file(&path).unwrap();

        let config = loaded.unwrap();
        let cb = &config.circuit_breaker;
        assert_eq!(cb.threshold, 0.25);
        assert_eq!(cb.rate_type, RateType::FiveMinutes);
        assert!(!cb.track_rejections);
        assert_eq!(cb.circuits["Orders.Get"], 0.2);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(std::env::var("RBENVTEST__CIRCUIT_BREAKER__THRESHOLD").is_err());
    }

    #[test]
    fn test_invalid_env_threshold_is_rejected() {
        let result = {
            let _env = EnvGuard::set(&[("RBENVBAD__CIRCUIT_BREAKER__THRESHOLD", "-1")]);
            RateBreakerConfig::load_with_prefix(None, "RBENVBAD")
        };
        assert!(matches!(
            result,
            Err(RateBreakerError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn test_rejection_meter_name_is_not_a_circuit() {
        let yaml = "circuit_breaker:\n  circuits:\n    orders.openCircuit: 0.5\n";
        let err = RateBreakerConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, RateBreakerError::ReservedCircuitName(name) if name == "orders.openCircuit"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = RateBreakerConfig::from_file("/nonexistent/ratebreaker.yaml").unwrap_err();
        assert!(matches!(err, RateBreakerError::Io(_)));
    }
}
