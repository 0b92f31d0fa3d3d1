//! Resilience patterns for breakwater-runtime.
//!
//! This module provides:
//! - Retry with backoff
//! - Circuit breaker to prevent cascade failures
//! - Retry composed behind a breaker

mod circuit_breaker;
mod composed;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitPermit, StateObserver};
pub use composed::ResilientCall;
pub use retry::{
    run_with_retry, run_with_retry_cancellable, RetryObserver, RetryPolicy, RetryPredicate,
};

use std::panic::{catch_unwind, AssertUnwindSafe};

/// Run an observer callback, logging instead of propagating a panic.
pub(crate) fn isolate_observer(observer: &'static str, callback: impl FnOnce()) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(callback)) {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        tracing::warn!(observer, panic = %message, "Observer panicked; call continues");
    }
}
