//! Circuit breaker state machine with an injected clock.
//!
//! [`CircuitCore`] is the synchronous heart of the breaker: it decides
//! whether a call is admitted and how a completed call moves the state. It
//! never reads the clock itself, so every transition is reproducible in
//! tests. `breakwater-runtime` wraps it in a mutex and adds timeouts.
//!
//! ## States
//!
//! ```text
//! CLOSED --(failure rate >= threshold, volume reached)--> OPEN
//! OPEN   --(call at/after next_attempt)----------------> HALF_OPEN (this call is the probe)
//! HALF_OPEN --(probe succeeds)--> CLOSED (window cleared)
//! HALF_OPEN --(probe fails)-----> OPEN   (next_attempt = now + reset_timeout)
//! ```
//!
//! ## Window
//!
//! Statistics are a strict rolling window: each completed call is stored
//! with its timestamp and anything older than `monitoring_period` is dropped
//! before the failure rate is evaluated.

mod error;
mod settings;
mod state;
mod stats;
mod window;

pub use error::{CircuitOpenError, CircuitOpenReason};
pub use settings::{CircuitOverrides, CircuitSettings, MAX_CIRCUIT_DURATION};
pub use state::{CircuitState, Outcome, StateChange};
pub use stats::CircuitStats;
pub use window::WindowCounts;

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

use window::RollingWindow;

/// A call that was let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// This call is the single half-open probe
    pub probe: bool,

    /// Transition caused by admitting the call (OPEN -> HALF_OPEN)
    pub transition: Option<StateChange>,

    /// Probe generation the call was admitted under
    epoch: u64,
}

/// Synchronous circuit breaker state.
#[derive(Debug, Clone)]
pub struct CircuitCore {
    name: String,
    settings: CircuitSettings,
    state: CircuitState,
    window: RollingWindow,
    last_failure: Option<Instant>,
    next_attempt: Option<Instant>,
    probe_in_flight: bool,
    probe_epoch: u64,
}

impl CircuitCore {
    /// Create a closed breaker.
    pub fn new(name: impl Into<String>, settings: CircuitSettings) -> Self {
        let window = RollingWindow::new(settings.monitoring_period);
        Self {
            name: name.into(),
            settings,
            state: CircuitState::Closed,
            window,
            last_failure: None,
            next_attempt: None,
            probe_in_flight: false,
            probe_epoch: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &CircuitSettings {
        &self.settings
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Decide whether a call may start at `now`.
    ///
    /// Admitting the first call at/after `next_attempt` moves OPEN to
    /// HALF_OPEN and marks that call as the probe. While the probe is in
    /// flight every other call is rejected. An OPEN circuit whose reopen
    /// time could not be represented stays open.
    pub fn try_acquire(&mut self, now: Instant) -> Result<Admission, CircuitOpenError> {
        match self.state {
            CircuitState::Closed => Ok(Admission {
                probe: false,
                transition: None,
                epoch: self.probe_epoch,
            }),
            CircuitState::Open => {
                match self.next_attempt {
                    Some(at) if now >= at => {}
                    Some(at) => {
                        return Err(self.rejection(CircuitOpenReason::Open, Some(at - now)))
                    }
                    None => return Err(self.rejection(CircuitOpenReason::Open, None)),
                }
                let transition = self.transition(CircuitState::HalfOpen);
                tracing::info!(breaker = %self.name, "Circuit half-open, admitting one call to probe the dependency");
                Ok(self.admit_probe(transition))
            }
            CircuitState::HalfOpen => {
                if self.probe_in_flight {
                    return Err(self.rejection(CircuitOpenReason::ProbeInFlight, None));
                }
                // previous probe was abandoned; this call takes its place
                Ok(self.admit_probe(None))
            }
        }
    }

    /// Record the outcome of an admitted call.
    ///
    /// Only the current probe resolves HALF_OPEN; a probe admitted before a
    /// forced transition is counted like any other late call.
    pub fn record(
        &mut self,
        outcome: Outcome,
        admission: &Admission,
        now: Instant,
    ) -> Option<StateChange> {
        self.window.trim(now);
        self.window.push(now, outcome);
        if outcome.is_failure() {
            self.last_failure = Some(now);
        }

        if self.is_current_probe(admission) {
            self.probe_in_flight = false;
            return match outcome {
                Outcome::Success => {
                    self.window.clear();
                    self.next_attempt = None;
                    tracing::info!(breaker = %self.name, "Circuit closed after successful recovery");
                    self.transition(CircuitState::Closed)
                }
                Outcome::Failure => {
                    self.next_attempt = self.reopen_at(now);
                    tracing::warn!(breaker = %self.name, "Circuit reopened after failed recovery attempt");
                    self.transition(CircuitState::Open)
                }
            };
        }

        if self.state == CircuitState::Closed && self.should_trip() {
            let counts = self.window.counts();
            self.next_attempt = self.reopen_at(now);
            tracing::warn!(
                breaker = %self.name,
                failures = counts.failures,
                total = counts.total(),
                failure_rate = counts.failure_rate(),
                "Circuit opened after failure rate crossed threshold"
            );
            return self.transition(CircuitState::Open);
        }

        None
    }

    /// Release an admitted call that ended without an outcome (cancelled or
    /// dropped). Nothing is recorded; an abandoned probe frees the probe slot.
    pub fn abandon(&mut self, admission: &Admission) {
        if self.is_current_probe(admission) {
            self.probe_in_flight = false;
        }
    }

    /// Open the circuit immediately with a fresh `next_attempt`.
    pub fn force_open(&mut self, now: Instant) -> Option<StateChange> {
        self.next_attempt = self.reopen_at(now);
        self.release_probe();
        tracing::warn!(breaker = %self.name, "Circuit forced open");
        self.transition(CircuitState::Open)
    }

    /// Close the circuit and forget all statistics.
    pub fn force_reset(&mut self) -> Option<StateChange> {
        self.window.clear();
        self.last_failure = None;
        self.next_attempt = None;
        self.release_probe();
        tracing::info!(breaker = %self.name, "Circuit forced closed");
        self.transition(CircuitState::Closed)
    }

    /// Counts over the window ending at `now`.
    pub fn counts(&self, now: Instant) -> WindowCounts {
        self.window.counts_at(now)
    }

    /// Snapshot for monitoring. `wall_now` must correspond to `now`.
    pub fn stats(&self, now: Instant, wall_now: DateTime<Utc>) -> CircuitStats {
        let counts = self.window.counts_at(now);
        let next_attempt = match self.state {
            CircuitState::Open => self.next_attempt,
            _ => None,
        };

        CircuitStats {
            name: self.name.clone(),
            state: self.state,
            failures: counts.failures,
            successes: counts.successes,
            total_requests: counts.total(),
            failure_rate: counts.failure_rate(),
            last_failure: self
                .last_failure
                .map(|at| stats::wall_time(at, now, wall_now)),
            next_attempt: next_attempt.map(|at| stats::wall_time(at, now, wall_now)),
        }
    }

    fn admit_probe(&mut self, transition: Option<StateChange>) -> Admission {
        self.probe_epoch += 1;
        self.probe_in_flight = true;
        Admission {
            probe: true,
            transition,
            epoch: self.probe_epoch,
        }
    }

    /// Invalidate any probe still running.
    fn release_probe(&mut self) {
        self.probe_epoch += 1;
        self.probe_in_flight = false;
    }

    fn is_current_probe(&self, admission: &Admission) -> bool {
        admission.probe
            && admission.epoch == self.probe_epoch
            && self.state == CircuitState::HalfOpen
    }

    /// `None` when `now + reset_timeout` overflows the clock.
    fn reopen_at(&self, now: Instant) -> Option<Instant> {
        let at = now.checked_add(self.settings.reset_timeout);
        if at.is_none() {
            tracing::warn!(breaker = %self.name, "Reset timeout out of range, circuit stays open until reset");
        }
        at
    }

    fn should_trip(&self) -> bool {
        let counts = self.window.counts();
        counts.total() >= self.settings.volume_threshold
            && counts.failure_rate() >= self.settings.failure_threshold
    }

    fn transition(&mut self, to: CircuitState) -> Option<StateChange> {
        let change = StateChange::between(self.state, to);
        self.state = to;
        change
    }

    fn rejection(
        &self,
        reason: CircuitOpenReason,
        retry_after: Option<Duration>,
    ) -> CircuitOpenError {
        CircuitOpenError {
            name: self.name.clone(),
            reason,
            retry_after,
        }
    }
}
