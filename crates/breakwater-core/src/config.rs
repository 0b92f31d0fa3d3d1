//! Configuration loading from YAML/JSON.
//!
//! A config file holds the shared retry settings, the shared circuit
//! settings, and optional per-breaker overrides:
//!
//! ```yaml
//! retry:
//!   max_retries: 5
//!   initial_delay: 200ms
//! circuit:
//!   failure_threshold: 50
//!   reset_timeout: 30s
//! breakers:
//!   payments:
//!     volume_threshold: 20
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::circuit::{CircuitOverrides, CircuitSettings};
use crate::retry::RetrySettings;

/// Errors that can occur when building or loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid {field} setting: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Configuration validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Retry settings used when a call site passes no overrides
    pub retry: RetrySettings,

    /// Circuit settings shared by every breaker
    pub circuit: CircuitSettings,

    /// Per-breaker overrides keyed by breaker name
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub breakers: BTreeMap<String, CircuitOverrides>,
}

impl ResilienceConfig {
    /// Parse from a YAML string and validate.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from a JSON string and validate.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file; `.json` files are parsed as JSON, anything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            Self::from_json(&content)
        } else {
            Self::from_yaml(&content)
        }
    }

    /// Serialize back to YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Circuit settings for `name`, with its overrides applied.
    pub fn circuit_for(&self, name: &str) -> CircuitSettings {
        match self.breakers.get(name) {
            Some(overrides) => overrides.merge(&self.circuit),
            None => self.circuit.clone(),
        }
    }

    /// Check every section, reporting all problems at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = self.retry.problems();
        problems.extend(self.circuit.problems());

        for (name, overrides) in &self.breakers {
            let merged = overrides.merge(&self.circuit);
            problems.extend(
                merged
                    .problems()
                    .into_iter()
                    .map(|p| format!("breakers.{name}: {p}")),
            );
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(problems))
        }
    }
}
