//! # breakwater-runtime
//!
//! Async resilience for calls to unreliable dependencies.
//!
//! This crate runs the deterministic pieces from `breakwater-core` on tokio:
//! - [`run_with_retry`]: retry with exponential backoff and jitter
//! - [`CircuitBreaker`]: fail fast while a dependency is unhealthy
//! - [`ResilientCall`]: retry inside a breaker, one outcome per call
//! - [`ResilientFetch`]: HTTP fetch built on the two
//! - [`ResilienceRegistry`]: named breakers built from one configuration
//!
//! ## Example
//!
//! ```rust,ignore
//! use breakwater_runtime::{CircuitBreaker, ResilientCall, RetryPolicy};
//! use breakwater_core::{CircuitSettings, RetrySettings};
//! use std::sync::Arc;
//!
//! let breaker = Arc::new(CircuitBreaker::new("inventory", CircuitSettings::default())?);
//! let call = ResilientCall::new(breaker);
//! let policy = RetryPolicy::new(RetrySettings::default());
//!
//! let stock = call.execute(|| client.stock("A-1"), &policy).await?;
//! ```
//!
//! ## Cancellation
//!
//! Every entry point has a variant taking a [`CancellationToken`]. Cancelling
//! stops the attempt in flight and any pending backoff; the call returns
//! [`ResilienceError::Cancelled`] and the breaker records nothing.

pub mod error;
pub mod fetch;
pub mod registry;
pub mod resilience;

pub use error::{MessageError, ResilienceError};
pub use fetch::{FetchError, HttpResponse, Method, RequestOptions, ResilientFetch, Transport};
pub use registry::ResilienceRegistry;
pub use resilience::{
    run_with_retry, run_with_retry_cancellable, CircuitBreaker, CircuitPermit, ResilientCall,
    RetryObserver, RetryPolicy, RetryPredicate, StateObserver,
};
pub use tokio_util::sync::CancellationToken;

#[cfg(feature = "http")]
pub use fetch::ReqwestTransport;
