//! Circuit breaker state machine.
//!
//! Defines the three states a circuit breaker can be in:
//! - **Closed**: Normal operation, requests allowed
//! - **Open**: Failure rate too high, requests rejected
//! - **HalfOpen**: Testing recovery, only ONE probe request allowed

use serde::{Deserialize, Serialize};
use std::fmt;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation
    #[default]
    Closed,

    /// Calls are rejected until the reset timeout elapses
    Open,

    /// A single probe is testing whether the dependency recovered
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        })
    }
}

/// A transition between two different states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub from: CircuitState,
    pub to: CircuitState,
}

impl StateChange {
    /// `Some` only when the state actually changed.
    pub(crate) fn between(from: CircuitState, to: CircuitState) -> Option<Self> {
        (from != to).then_some(Self { from, to })
    }
}

/// Result of a completed call, as seen by the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn is_failure(self) -> bool {
        self == Outcome::Failure
    }
}
