//! Errors surfaced by resilient calls.

use breakwater_core::{Classify, CircuitOpenError};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Error from a call routed through the retry engine and/or a breaker.
///
/// When retries are exhausted the caller gets `Operation` holding the last
/// error the operation produced, not a synthetic wrapper.
#[derive(Error, Debug)]
pub enum ResilienceError<E> {
    /// The breaker short-circuited the call; the operation never ran.
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// A single attempt exceeded the breaker's per-call timeout.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The caller's cancellation token fired.
    #[error("Operation cancelled")]
    Cancelled,

    /// The operation's own error, unmodified.
    #[error("{0}")]
    Operation(E),
}

impl<E> ResilienceError<E> {
    /// The operation's error, if that is what this is.
    pub fn into_operation(self) -> Option<E> {
        match self {
            ResilienceError::Operation(e) => Some(e),
            _ => None,
        }
    }

    /// Borrow the operation's error, if that is what this is.
    pub fn operation(&self) -> Option<&E> {
        match self {
            ResilienceError::Operation(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ResilienceError::CircuitOpen(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ResilienceError::Timeout(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ResilienceError::Cancelled)
    }

    /// Convert the operation error, leaving the other variants intact.
    pub fn map_operation<F, U>(self, f: F) -> ResilienceError<U>
    where
        F: FnOnce(E) -> U,
    {
        match self {
            ResilienceError::CircuitOpen(e) => ResilienceError::CircuitOpen(e),
            ResilienceError::Timeout(d) => ResilienceError::Timeout(d),
            ResilienceError::Cancelled => ResilienceError::Cancelled,
            ResilienceError::Operation(e) => ResilienceError::Operation(f(e)),
        }
    }
}

impl<E: Classify> Classify for ResilienceError<E> {
    fn is_transport_failure(&self) -> bool {
        self.operation().is_some_and(Classify::is_transport_failure)
    }

    fn status_code(&self) -> Option<u16> {
        self.operation().and_then(Classify::status_code)
    }

    fn is_timeout(&self) -> bool {
        match self {
            ResilienceError::Timeout(_) => true,
            ResilienceError::Operation(e) => e.is_timeout(),
            _ => false,
        }
    }
}

/// Plain string error, handy for closures that fail with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageError(pub String);

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for MessageError {}

impl Classify for MessageError {}

impl From<&str> for MessageError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<String> for MessageError {
    fn from(message: String) -> Self {
        Self(message)
    }
}
