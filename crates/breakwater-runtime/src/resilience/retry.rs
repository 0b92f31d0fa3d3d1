//! Retry engine.
//!
//! Attempts run strictly one after another. Between attempts the engine
//! sleeps for the backoff delay; both the attempt and the sleep race against
//! an optional cancellation token, so cancelling stops the whole sequence.

use breakwater_core::{
    delay_for_attempt, is_transient, Classify, ConfigError, RetryOverrides, RetrySettings,
};
use futures::TryFutureExt;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::isolate_observer;
use crate::error::ResilienceError;

/// Decides whether an operation error is worth another attempt.
pub type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Notified before each retry with the failed attempt's error and the
/// number of the retry about to happen (1-based).
pub type RetryObserver<E> = Arc<dyn Fn(&ResilienceError<E>, u32) + Send + Sync>;

/// A full retry policy: numeric settings plus predicate and observer.
pub struct RetryPolicy<E> {
    settings: RetrySettings,
    retry_if: RetryPredicate<E>,
    on_retry: Option<RetryObserver<E>>,
    retry_on_timeout: bool,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            settings: self.settings.clone(),
            retry_if: Arc::clone(&self.retry_if),
            on_retry: self.on_retry.clone(),
            retry_on_timeout: self.retry_on_timeout,
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("settings", &self.settings)
            .field("retry_on_timeout", &self.retry_on_timeout)
            .field("on_retry", &self.on_retry.as_ref().map(|_| "<observer>"))
            .finish()
    }
}

impl<E> RetryPolicy<E>
where
    E: Classify + fmt::Display + 'static,
{
    /// Policy using the default predicate (transport, 5xx, timeouts).
    pub fn new(settings: RetrySettings) -> Self {
        Self::with_predicate(settings, |e: &E| is_transient(e))
    }

    /// Default settings with `overrides` merged in.
    pub fn from_overrides(overrides: &RetryOverrides) -> Result<Self, ConfigError> {
        Ok(Self::new(overrides.apply_to(&RetrySettings::default())?))
    }
}

impl<E> Default for RetryPolicy<E>
where
    E: Classify + fmt::Display + 'static,
{
    fn default() -> Self {
        Self::new(RetrySettings::default())
    }
}

impl<E> RetryPolicy<E> {
    /// Policy with a custom predicate; works for any error type.
    pub fn with_predicate<P>(settings: RetrySettings, predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        Self {
            settings,
            retry_if: Arc::new(predicate),
            on_retry: None,
            retry_on_timeout: true,
        }
    }

    /// Replace the retry predicate.
    pub fn retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.retry_if = Arc::new(predicate);
        self
    }

    /// Attach an observer called before every retry.
    pub fn on_retry<O>(mut self, observer: O) -> Self
    where
        O: Fn(&ResilienceError<E>, u32) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    /// Whether attempts cut off by the per-call timeout are retried (default true).
    pub fn retry_on_timeout(mut self, retry: bool) -> Self {
        self.retry_on_timeout = retry;
        self
    }

    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }

    pub fn max_retries(&self) -> u32 {
        self.settings.max_retries
    }

    /// Whether `error` from a failed attempt should be retried.
    pub fn should_retry(&self, error: &ResilienceError<E>) -> bool {
        match error {
            ResilienceError::Operation(e) => (self.retry_if)(e),
            ResilienceError::Timeout(_) => self.retry_on_timeout,
            ResilienceError::CircuitOpen(_) | ResilienceError::Cancelled => false,
        }
    }

    fn notify_retry(&self, error: &ResilienceError<E>, retry: u32) {
        if let Some(observer) = &self.on_retry {
            isolate_observer("on_retry", || observer(error, retry));
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or the retry budget
/// is spent.
///
/// At most `max_retries + 1` invocations happen. A permanent or final error
/// is returned as [`ResilienceError::Operation`] holding the operation's own
/// error.
pub async fn run_with_retry<T, E, F, Fut>(
    mut operation: F,
    policy: &RetryPolicy<E>,
) -> Result<T, ResilienceError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    retry_attempts(policy, None, || operation().map_err(ResilienceError::Operation)).await
}

/// Like [`run_with_retry`], stopping with [`ResilienceError::Cancelled`] as
/// soon as `cancel` fires, whether an attempt or a backoff sleep is pending.
pub async fn run_with_retry_cancellable<T, E, F, Fut>(
    mut operation: F,
    policy: &RetryPolicy<E>,
    cancel: &CancellationToken,
) -> Result<T, ResilienceError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    retry_attempts(policy, Some(cancel), || {
        operation().map_err(ResilienceError::Operation)
    })
    .await
}

/// The retry loop shared by the plain engine and the composed call.
pub(crate) async fn retry_attempts<T, E, F, Fut>(
    policy: &RetryPolicy<E>,
    cancel: Option<&CancellationToken>,
    mut attempt_fn: F,
) -> Result<T, ResilienceError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ResilienceError<E>>>,
    E: fmt::Display,
{
    let max_retries = policy.settings.max_retries;
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(ResilienceError::Cancelled);
        }

        let result = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(ResilienceError::Cancelled),
                result = attempt_fn() => result,
            },
            None => attempt_fn().await,
        };

        let error = match result {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(ResilienceError::Cancelled) => return Err(ResilienceError::Cancelled),
            Err(error) => error,
        };

        if !policy.should_retry(&error) {
            tracing::debug!(attempt = attempt + 1, error = %error, "Permanent failure, not retrying");
            return Err(error);
        }
        if attempt >= max_retries {
            tracing::warn!(attempts = attempt + 1, error = %error, "Retries exhausted");
            return Err(error);
        }

        policy.notify_retry(&error, attempt + 1);

        let delay = delay_for_attempt(attempt, &policy.settings);
        tracing::debug!(
            retry = attempt + 1,
            max_retries,
            delay = ?delay,
            error = %error,
            "Retrying after backoff"
        );
        drop(error);

        match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(ResilienceError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            None => tokio::time::sleep(delay).await,
        }

        attempt += 1;
    }
}
