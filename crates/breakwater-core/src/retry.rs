//! Retry settings and presets.
//!
//! [`RetrySettings`] holds the numeric half of a retry policy: how many times
//! to retry and how the delay between attempts grows. The predicate and the
//! observer live with the async engine in `breakwater-runtime`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::backoff::BackoffSchedule;
use crate::config::ConfigError;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first retry.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(1000);

/// Default upper bound on any single delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);

/// Default growth factor between consecutive delays.
pub const DEFAULT_FACTOR: f64 = 2.0;

/// Numeric retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Retries allowed after the first attempt (total attempts = this + 1)
    pub max_retries: u32,

    /// Delay before the first retry
    #[serde(with = "crate::duration")]
    pub initial_delay: Duration,

    /// Cap applied to every computed delay
    #[serde(with = "crate::duration")]
    pub max_delay: Duration,

    /// Multiplier per attempt. 1 gives constant spacing, 0 a fixed delay.
    pub factor: f64,

    /// Add up to 20% random delay on top of the computed value
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            factor: DEFAULT_FACTOR,
            jitter: true,
        }
    }
}

/// Named presets kept for interchangeability with existing call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPreset {
    /// Doubling delays with jitter
    Exponential,
    /// Constant spacing
    Linear,
    /// One configurable delay, no jitter
    Fixed,
}

impl std::str::FromStr for RetryPreset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "exponential" => Ok(Self::Exponential),
            "linear" => Ok(Self::Linear),
            "fixed" => Ok(Self::Fixed),
            other => Err(ConfigError::InvalidValue {
                field: "preset",
                reason: format!("unknown preset '{other}' (expected exponential, linear or fixed)"),
            }),
        }
    }
}

impl RetrySettings {
    /// Build validated settings from explicit values.
    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        factor: f64,
        jitter: bool,
    ) -> Result<Self, ConfigError> {
        let settings = Self {
            max_retries,
            initial_delay,
            max_delay,
            factor,
            jitter,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Exponential preset: factor 2, jitter on.
    pub fn exponential(initial_delay: Duration, max_delay: Duration) -> Result<Self, ConfigError> {
        Self::new(DEFAULT_MAX_RETRIES, initial_delay, max_delay, DEFAULT_FACTOR, true)
    }

    /// Linear preset: every retry waits `delay`.
    pub fn linear(delay: Duration) -> Result<Self, ConfigError> {
        Self::new(DEFAULT_MAX_RETRIES, delay, DEFAULT_MAX_DELAY.max(delay), 1.0, true)
    }

    /// Fixed preset: factor 0, jitter off, every retry waits exactly `delay`.
    pub fn fixed(delay: Duration) -> Result<Self, ConfigError> {
        Self::new(DEFAULT_MAX_RETRIES, delay, delay, 0.0, false)
    }

    /// Build a preset from its name and base delay.
    pub fn preset(preset: RetryPreset, delay: Duration) -> Result<Self, ConfigError> {
        match preset {
            RetryPreset::Exponential => Self::exponential(delay, DEFAULT_MAX_DELAY.max(delay)),
            RetryPreset::Linear => Self::linear(delay),
            RetryPreset::Fixed => Self::fixed(delay),
        }
    }

    /// Replace the retry count.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Toggle jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Every problem with these settings, in field order.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if !self.factor.is_finite() {
            problems.push(format!("retry.factor must be finite (got {})", self.factor));
        } else if self.factor < 0.0 {
            problems.push(format!("retry.factor must not be negative (got {})", self.factor));
        }

        if self.max_delay < self.initial_delay {
            problems.push(format!(
                "retry.max_delay ({:?}) must be at least retry.initial_delay ({:?})",
                self.max_delay, self.initial_delay
            ));
        }

        problems
    }

    /// Check the settings, returning the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.problems().into_iter().next() {
            Some(reason) => Err(ConfigError::InvalidValue {
                field: "retry",
                reason,
            }),
            None => Ok(()),
        }
    }

    /// Delays slept before attempts 2..=max_retries+1.
    pub fn schedule(&self) -> BackoffSchedule {
        BackoffSchedule::new(self.clone())
    }
}

/// Partial retry settings merged over a base.
///
/// Unset fields keep the base value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOverrides {
    pub max_retries: Option<u32>,

    #[serde(with = "crate::duration::option", skip_serializing_if = "Option::is_none")]
    pub initial_delay: Option<Duration>,

    #[serde(with = "crate::duration::option", skip_serializing_if = "Option::is_none")]
    pub max_delay: Option<Duration>,

    pub factor: Option<f64>,

    pub jitter: Option<bool>,
}

impl RetryOverrides {
    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Merge onto `base` and validate the result.
    pub fn apply_to(&self, base: &RetrySettings) -> Result<RetrySettings, ConfigError> {
        let merged = RetrySettings {
            max_retries: self.max_retries.unwrap_or(base.max_retries),
            initial_delay: self.initial_delay.unwrap_or(base.initial_delay),
            max_delay: self.max_delay.unwrap_or(base.max_delay),
            factor: self.factor.unwrap_or(base.factor),
            jitter: self.jitter.unwrap_or(base.jitter),
        };
        merged.validate()?;
        Ok(merged)
    }
}
