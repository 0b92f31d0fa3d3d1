//! Read-only breaker snapshot for dashboards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::state::CircuitState;

/// Point-in-time view of a circuit breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitStats {
    pub name: String,
    pub state: CircuitState,
    pub failures: u32,
    pub successes: u32,
    pub total_requests: u32,

    /// Failure percentage over the current window
    pub failure_rate: f64,

    pub last_failure: Option<DateTime<Utc>>,

    /// When the next probe is allowed; only set while OPEN
    pub next_attempt: Option<DateTime<Utc>>,
}

/// Map a monotonic instant onto the wall clock, relative to a known pair.
pub(crate) fn wall_time(at: Instant, now: Instant, wall_now: DateTime<Utc>) -> DateTime<Utc> {
    let offset = |d: std::time::Duration| {
        chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
    };
    if at <= now {
        wall_now
            .checked_sub_signed(offset(now - at))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    } else {
        wall_now
            .checked_add_signed(offset(at - now))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
