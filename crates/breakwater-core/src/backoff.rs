//! Backoff delay calculation.
//!
//! `delay = min(initial_delay * factor^n, max_delay)`, optionally inflated by
//! a uniform random amount in `[0, 0.2 * delay]`. Jitter only ever adds, and
//! the result is re-capped at `max_delay`.

use rand::Rng;
use std::time::Duration;

use crate::retry::RetrySettings;

/// Upper bound of the additive jitter, as a fraction of the base delay.
pub const JITTER_RATIO: f64 = 0.2;

/// Delay before the retry following attempt `attempt` (0-based), without jitter.
pub fn base_delay(attempt: u32, settings: &RetrySettings) -> Duration {
    let cap = settings.max_delay;

    // factor 0 means "fixed": every retry waits initial_delay
    let multiplier = if settings.factor == 0.0 {
        1.0
    } else {
        settings.factor.powi(attempt.min(i32::MAX as u32) as i32)
    };

    let nanos = settings.initial_delay.as_nanos() as f64 * multiplier;
    if !nanos.is_finite() || nanos >= cap.as_nanos() as f64 {
        return cap;
    }

    Duration::from_nanos(nanos.max(0.0).round() as u64).min(cap)
}

/// Inflate `base` by `fraction * JITTER_RATIO`, capped at `cap`.
///
/// `fraction` is clamped into `[0, 1]`.
pub fn apply_jitter(base: Duration, cap: Duration, fraction: f64) -> Duration {
    let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
    let extra = base.as_nanos() as f64 * JITTER_RATIO * fraction;
    base.saturating_add(Duration::from_nanos(extra.round() as u64))
        .min(cap.max(base))
}

/// Delay for `attempt` with an explicit jitter draw in `[0, 1]`.
///
/// Ignores `fraction` when jitter is disabled.
pub fn delay_with_fraction(attempt: u32, settings: &RetrySettings, fraction: f64) -> Duration {
    let base = base_delay(attempt, settings);
    if settings.jitter {
        apply_jitter(base, settings.max_delay, fraction)
    } else {
        base
    }
}

/// Delay for `attempt`, drawing jitter from the thread RNG when enabled.
pub fn delay_for_attempt(attempt: u32, settings: &RetrySettings) -> Duration {
    let fraction = if settings.jitter {
        rand::thread_rng().gen::<f64>()
    } else {
        0.0
    };
    delay_with_fraction(attempt, settings, fraction)
}

/// Iterator over the delays slept between attempts.
///
/// Yields exactly `max_retries` values. Also usable as a [`backon`] backoff.
#[derive(Debug, Clone)]
pub struct BackoffSchedule {
    settings: RetrySettings,
    next: u32,
}

impl BackoffSchedule {
    pub(crate) fn new(settings: RetrySettings) -> Self {
        Self { settings, next: 0 }
    }
}

impl Iterator for BackoffSchedule {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.next >= self.settings.max_retries {
            return None;
        }
        let delay = delay_for_attempt(self.next, &self.settings);
        self.next += 1;
        Some(delay)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.settings.max_retries.saturating_sub(self.next) as usize;
        (left, Some(left))
    }
}

impl backon::BackoffBuilder for RetrySettings {
    type Backoff = BackoffSchedule;

    fn build(self) -> Self::Backoff {
        BackoffSchedule::new(self)
    }
}
