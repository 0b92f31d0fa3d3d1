//! Circuit breaker configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ConfigError;

/// Upper bound for every circuit duration (one year).
pub const MAX_CIRCUIT_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitSettings {
    /// Failure percentage (0-100] at which the circuit opens
    pub failure_threshold: f64,

    /// Requests in the window before the failure rate is trusted
    pub volume_threshold: u32,

    /// Deadline for a single call
    #[serde(with = "crate::duration")]
    pub timeout: Duration,

    /// How long the circuit stays open before a probe is allowed
    #[serde(with = "crate::duration")]
    pub reset_timeout: Duration,

    /// Width of the rolling statistics window
    #[serde(with = "crate::duration")]
    pub monitoring_period: Duration,
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 50.0,
            volume_threshold: 10,
            timeout: Duration::from_millis(10_000),
            reset_timeout: Duration::from_millis(30_000),
            monitoring_period: Duration::from_millis(60_000),
        }
    }
}

impl CircuitSettings {
    /// Every problem with these settings, in field order.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if !(self.failure_threshold > 0.0 && self.failure_threshold <= 100.0) {
            problems.push(format!(
                "circuit.failure_threshold must be in (0, 100] (got {})",
                self.failure_threshold
            ));
        }
        if self.volume_threshold == 0 {
            problems.push("circuit.volume_threshold must be at least 1".to_string());
        }
        for (field, value) in [
            ("timeout", self.timeout),
            ("reset_timeout", self.reset_timeout),
            ("monitoring_period", self.monitoring_period),
        ] {
            if value.is_zero() {
                problems.push(format!("circuit.{field} must be greater than zero"));
            } else if value > MAX_CIRCUIT_DURATION {
                problems.push(format!(
                    "circuit.{field} must be at most {} (got {})",
                    humantime::format_duration(MAX_CIRCUIT_DURATION),
                    humantime::format_duration(value)
                ));
            }
        }

        problems
    }

    /// Check the settings, returning the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.problems().into_iter().next() {
            Some(reason) => Err(ConfigError::InvalidValue {
                field: "circuit",
                reason,
            }),
            None => Ok(()),
        }
    }
}

/// Partial circuit settings for a named breaker, merged over the shared ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitOverrides {
    pub failure_threshold: Option<f64>,

    pub volume_threshold: Option<u32>,

    #[serde(with = "crate::duration::option", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,

    #[serde(with = "crate::duration::option", skip_serializing_if = "Option::is_none")]
    pub reset_timeout: Option<Duration>,

    #[serde(with = "crate::duration::option", skip_serializing_if = "Option::is_none")]
    pub monitoring_period: Option<Duration>,
}

impl CircuitOverrides {
    /// Merge onto `base`. Validation is left to the caller.
    pub fn merge(&self, base: &CircuitSettings) -> CircuitSettings {
        CircuitSettings {
            failure_threshold: self.failure_threshold.unwrap_or(base.failure_threshold),
            volume_threshold: self.volume_threshold.unwrap_or(base.volume_threshold),
            timeout: self.timeout.unwrap_or(base.timeout),
            reset_timeout: self.reset_timeout.unwrap_or(base.reset_timeout),
            monitoring_period: self.monitoring_period.unwrap_or(base.monitoring_period),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = CircuitSettings::default();
        assert_eq!(settings.failure_threshold, 50.0);
        assert_eq!(settings.volume_threshold, 10);
        assert_eq!(settings.timeout, Duration::from_secs(10));
        assert_eq!(settings.reset_timeout, Duration::from_secs(30));
        assert_eq!(settings.monitoring_period, Duration::from_secs(60));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_collects_all_problems() {
        let settings = CircuitSettings {
            failure_threshold: 150.0,
            volume_threshold: 0,
            timeout: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(settings.problems().len(), 3);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rejects_durations_beyond_a_year() {
        let settings = CircuitSettings {
            reset_timeout: Duration::from_secs(400_000_000_000 * 31_557_600),
            monitoring_period: MAX_CIRCUIT_DURATION,
            ..Default::default()
        };
        let problems = settings.problems();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].starts_with("circuit.reset_timeout must be at most"));
    }

    #[test]
    fn test_overrides_merge() {
        let overrides = CircuitOverrides {
            volume_threshold: Some(3),
            reset_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let merged = overrides.merge(&CircuitSettings::default());
        assert_eq!(merged.volume_threshold, 3);
        assert_eq!(merged.reset_timeout, Duration::from_secs(5));
        assert_eq!(merged.failure_threshold, 50.0);
    }
}
