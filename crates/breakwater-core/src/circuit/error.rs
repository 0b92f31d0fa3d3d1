//! Circuit breaker error types.
//!
//! Defines the error returned when the circuit breaker rejects a call.

use std::fmt;
use std::time::Duration;

/// Reason why the circuit breaker rejected a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitOpenReason {
    /// Circuit is open due to failures (or was forced open)
    Open,
    /// Circuit is half-open with a probe already in flight
    ProbeInFlight,
}

/// Error returned when the circuit breaker rejects a call.
///
/// The protected operation was not invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitOpenError {
    /// Name of the breaker that rejected the call
    pub name: String,

    pub reason: CircuitOpenReason,

    /// Time left until a probe will be admitted, when known
    pub retry_after: Option<Duration>,
}

impl fmt::Display for CircuitOpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.reason, self.retry_after) {
            (CircuitOpenReason::Open, Some(wait)) => {
                write!(f, "Circuit breaker '{}' is open (retry in {:?})", self.name, wait)
            }
            (CircuitOpenReason::Open, None) => {
                write!(f, "Circuit breaker '{}' is open", self.name)
            }
            (CircuitOpenReason::ProbeInFlight, _) => write!(
                f,
                "Circuit breaker '{}' is testing recovery (probe in flight)",
                self.name
            ),
        }
    }
}

impl std::error::Error for CircuitOpenError {}
