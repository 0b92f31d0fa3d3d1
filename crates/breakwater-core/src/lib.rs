//! # breakwater-core
//!
//! Deterministic building blocks of the Breakwater resilience layer.
//!
//! This crate contains everything that does not need an async runtime:
//! - Backoff delay calculation (exponential, linear, fixed; partial jitter)
//! - Retry settings with construction-time validation
//! - Transient/permanent error classification
//! - The circuit breaker state machine, driven by an injected clock
//! - YAML/JSON configuration
//!
//! ## Key Guarantees
//!
//! 1. **Bounded delays**: every computed delay is `<= max_delay`
//! 2. **Jitter only inflates**: `base <= delay <= base * 1.2`
//! 3. **No premature trips**: the failure rate is ignored until the volume
//!    threshold is reached within the rolling window
//! 4. **Reproducible**: the state machine never reads the clock
//!
//! ## Example
//!
//! ```rust
//! use breakwater_core::{CircuitCore, CircuitSettings, Outcome};
//! use std::time::Instant;
//!
//! let mut circuit = CircuitCore::new("inventory", CircuitSettings::default());
//! let now = Instant::now();
//!
//! let admission = circuit.try_acquire(now).expect("closed circuits admit calls");
//! circuit.record(Outcome::Success, &admission, now);
//! assert_eq!(circuit.counts(now).successes, 1);
//! ```

pub mod backoff;
pub mod circuit;
pub mod classify;
pub mod config;
pub mod duration;
pub mod retry;

// Re-export main types at crate root
pub use backoff::{base_delay, delay_for_attempt, delay_with_fraction, BackoffSchedule, JITTER_RATIO};
pub use circuit::{
    Admission, CircuitCore, CircuitOpenError, CircuitOpenReason, CircuitOverrides,
    CircuitSettings, CircuitState, CircuitStats, Outcome, StateChange, WindowCounts,
    MAX_CIRCUIT_DURATION,
};
pub use classify::{is_server_error, is_timeout_message, is_transient, Classify};
pub use config::{ConfigError, ResilienceConfig};
pub use retry::{RetryOverrides, RetryPreset, RetrySettings};
