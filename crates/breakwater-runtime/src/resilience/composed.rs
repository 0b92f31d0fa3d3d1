//! Retry inside a circuit breaker.
//!
//! Admission is decided once per logical call. An admitted call gets the
//! whole retry budget, each attempt bounded by the breaker's per-call
//! timeout, and the breaker records one outcome for the whole sequence.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::circuit_breaker::CircuitBreaker;
use super::retry::{retry_attempts, RetryPolicy};
use crate::error::ResilienceError;

/// A circuit breaker paired with retry, for one dependency.
#[derive(Debug, Clone)]
pub struct ResilientCall {
    breaker: Arc<CircuitBreaker>,
}

impl ResilientCall {
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self { breaker }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Run `operation` with retries behind the breaker.
    pub async fn execute<T, E, F, Fut>(
        &self,
        operation: F,
        policy: &RetryPolicy<E>,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.run(operation, policy, None).await
    }

    /// Like [`execute`](Self::execute); cancelling stops the in-flight
    /// attempt and any pending backoff, and nothing is recorded.
    pub async fn execute_with_cancel<T, E, F, Fut>(
        &self,
        operation: F,
        policy: &RetryPolicy<E>,
        cancel: &CancellationToken,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.run(operation, policy, Some(cancel)).await
    }

    /// Turn `operation` into a zero-argument callable that runs through
    /// this breaker and `policy` every time it is invoked.
    pub fn wrap<T, E, F, Fut>(
        &self,
        operation: F,
        policy: RetryPolicy<E>,
    ) -> impl Fn() -> BoxFuture<'static, Result<T, ResilienceError<E>>> + Clone + Send + Sync
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let call = self.clone();
        let operation = Arc::new(operation);
        let policy = Arc::new(policy);

        move || {
            let call = call.clone();
            let operation = Arc::clone(&operation);
            let policy = Arc::clone(&policy);
            async move { call.execute(|| (*operation)(), &*policy).await }.boxed()
        }
    }

    async fn run<T, E, F, Fut>(
        &self,
        mut operation: F,
        policy: &RetryPolicy<E>,
        cancel: Option<&CancellationToken>,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let breaker: &CircuitBreaker = &self.breaker;
        let permit = breaker.acquire()?;
        let result = retry_attempts(policy, cancel, move || breaker.timed(operation())).await;
        permit.complete(&result);
        result
    }
}
