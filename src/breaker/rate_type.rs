//! Which rate window drives the open/closed decision.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RateBreakerError;
use crate::metrics::Meter;

/// The meter rate compared against a circuit's threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateType {
    /// Mean rate since the meter was created
    #[serde(alias = "MEAN")]
    Mean,
    /// One-minute moving average
    #[default]
    #[serde(alias = "ONE_MINUTE")]
    OneMinute,
    /// Five-minute moving average
    #[serde(alias = "FIVE_MINUTES")]
    FiveMinutes,
    /// Fifteen-minute moving average
    #[serde(alias = "FIFTEEN_MINUTES")]
    FifteenMinutes,
}

impl RateType {
    /// All rate types, shortest window first.
    pub const ALL: [RateType; 4] = [
        RateType::Mean,
        RateType::OneMinute,
        RateType::FiveMinutes,
        RateType::FifteenMinutes,
    ];

    /// Read the rate this type selects from `meter`.
    pub fn rate_of(&self, meter: &Meter) -> f64 {
        match self {
            RateType::Mean => meter.mean_rate(),
            RateType::OneMinute => meter.one_minute_rate(),
            RateType::FiveMinutes => meter.five_minute_rate(),
            RateType::FifteenMinutes => meter.fifteen_minute_rate(),
        }
    }

    /// Configuration spelling of this rate type.
    pub fn as_str(&self) -> &'static str {
        match self {
            RateType::Mean => "mean",
            RateType::OneMinute => "one_minute",
            RateType::FiveMinutes => "five_minutes",
            RateType::FifteenMinutes => "fifteen_minutes",
        }
    }
}

impl fmt::Display for RateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RateType {
    type Err = RateBreakerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "mean" => Ok(RateType::Mean),
            "one_minute" => Ok(RateType::OneMinute),
            "five_minutes" => Ok(RateType::FiveMinutes),
            "fifteen_minutes" => Ok(RateType::FifteenMinutes),
            other => Err(RateBreakerError::Config(format!(
                "unknown rate type '{}', expected one of mean, one_minute, five_minutes, fifteen_minutes",
                other
            ))),
        }
    }
}
