//! Circuit breaker to prevent cascade failures.
//!
//! When calls to a dependency keep failing, the circuit opens and
//! subsequent calls are rejected immediately instead of piling up on a
//! struggling service. After the reset timeout a single probe call decides
//! whether the circuit closes again.

use breakwater_core::{
    Admission, CircuitCore, CircuitOpenError, CircuitSettings, CircuitState, CircuitStats, ConfigError,
    Outcome, StateChange, WindowCounts,
};
use chrono::Utc;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::isolate_observer;
use crate::error::ResilienceError;

/// Called with the breaker name after every state transition.
pub type StateObserver = Arc<dyn Fn(&str, StateChange) + Send + Sync>;

/// Current time on tokio's clock, so paused-clock tests drive the breaker.
fn clock_now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Named circuit breaker guarding one dependency.
pub struct CircuitBreaker {
    name: String,
    core: Mutex<CircuitCore>,
    timeout: Duration,
    on_state_change: Option<StateObserver>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a closed breaker, rejecting invalid settings.
    pub fn new(name: impl Into<String>, settings: CircuitSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self::from_valid(name.into(), settings))
    }

    /// Settings were validated by the caller (the registry validates the
    /// whole configuration up front).
    pub(crate) fn from_valid(name: String, settings: CircuitSettings) -> Self {
        let timeout = settings.timeout;
        Self {
            core: Mutex::new(CircuitCore::new(name.clone(), settings)),
            name,
            timeout,
            on_state_change: None,
        }
    }

    /// Attach a state-change observer.
    pub fn with_observer<O>(mut self, observer: O) -> Self
    where
        O: Fn(&str, StateChange) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Arc::new(observer));
        self
    }

    pub(crate) fn with_shared_observer(mut self, observer: Option<StateObserver>) -> Self {
        self.on_state_change = observer;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Per-call timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn state(&self) -> CircuitState {
        self.core.lock().state()
    }

    /// Window counts as of now.
    pub fn counts(&self) -> WindowCounts {
        self.core.lock().counts(clock_now())
    }

    /// Ask for admission. The returned permit must be resolved with the
    /// call's outcome; dropping it unresolved records nothing.
    pub fn acquire(&self) -> Result<CircuitPermit<'_>, CircuitOpenError> {
        let admission = self.core.lock().try_acquire(clock_now());
        match admission {
            Ok(admission) => {
                if let Some(change) = admission.transition {
                    self.notify(change);
                }
                Ok(CircuitPermit {
                    breaker: self,
                    admission,
                    resolved: false,
                })
            }
            Err(err) => {
                tracing::debug!(breaker = %self.name, reason = ?err.reason, "Call rejected by open circuit");
                Err(err)
            }
        }
    }

    /// Run `operation` through the breaker with the per-call timeout.
    ///
    /// An OPEN breaker rejects without invoking `operation`. A timeout
    /// counts as a failure.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.acquire()?;
        let result = self.timed(operation()).await;
        permit.complete(&result);
        result
    }

    /// Like [`execute`](Self::execute), abandoning the call when `cancel`
    /// fires. Cancelled calls are not recorded.
    pub async fn execute_with_cancel<T, E, F, Fut>(
        &self,
        operation: F,
        cancel: &CancellationToken,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.acquire()?;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ResilienceError::Cancelled),
            result = self.timed(operation()) => result,
        };
        permit.complete(&result);
        result
    }

    /// Race `fut` against the per-call timeout.
    pub(crate) async fn timed<T, E, Fut>(&self, fut: Fut) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(ResilienceError::Operation),
            Err(_) => {
                tracing::debug!(breaker = %self.name, timeout = ?self.timeout, "Call timed out");
                Err(ResilienceError::Timeout(self.timeout))
            }
        }
    }

    /// Open the circuit now, regardless of statistics.
    pub fn force_open(&self) {
        let change = self.core.lock().force_open(clock_now());
        if let Some(change) = change {
            self.notify(change);
        }
    }

    /// Close the circuit and clear all statistics.
    pub fn force_reset(&self) {
        let change = self.core.lock().force_reset();
        if let Some(change) = change {
            self.notify(change);
        }
    }

    /// Read-only snapshot for monitoring.
    pub fn stats(&self) -> CircuitStats {
        self.core.lock().stats(clock_now(), Utc::now())
    }

    fn record(&self, outcome: Outcome, admission: &Admission) {
        let change = self.core.lock().record(outcome, admission, clock_now());
        if let Some(change) = change {
            self.notify(change);
        }
    }

    fn abandon(&self, admission: &Admission) {
        self.core.lock().abandon(admission);
        if admission.probe {
            tracing::debug!(breaker = %self.name, "Probe abandoned, slot released");
        }
    }

    // Runs with the lock released.
    fn notify(&self, change: StateChange) {
        tracing::debug!(breaker = %self.name, from = %change.from, to = %change.to, "Circuit state changed");
        if let Some(observer) = &self.on_state_change {
            isolate_observer("on_state_change", || observer(&self.name, change));
        }
    }
}

/// Admission ticket for one call through a [`CircuitBreaker`].
#[must_use = "a permit records nothing unless it is resolved"]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    resolved: bool,
}

impl CircuitPermit<'_> {
    /// Whether this call is the half-open probe.
    pub fn is_probe(&self) -> bool {
        self.admission.probe
    }

    pub fn success(self) {
        self.resolve(Outcome::Success);
    }

    pub fn failure(self) {
        self.resolve(Outcome::Failure);
    }

    /// Record the outcome of `result`. Cancellation and circuit rejections
    /// are not outcomes of the guarded dependency and release the permit
    /// without recording.
    pub fn complete<T, E>(self, result: &Result<T, ResilienceError<E>>) {
        match result {
            Ok(_) => self.success(),
            Err(ResilienceError::Cancelled) | Err(ResilienceError::CircuitOpen(_)) => drop(self),
            Err(_) => self.failure(),
        }
    }

    fn resolve(mut self, outcome: Outcome) {
        self.resolved = true;
        self.breaker.record(outcome, &self.admission);
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.abandon(&self.admission);
        }
    }
}
