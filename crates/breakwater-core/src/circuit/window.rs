//! Rolling statistics window.
//!
//! Every completed call is stored with its timestamp. Entries older than the
//! monitoring period are dropped before each evaluation, so counts always
//! describe exactly the last `monitoring_period` of traffic.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::state::Outcome;

/// Failure/success counts at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowCounts {
    pub failures: u32,
    pub successes: u32,
}

impl WindowCounts {
    pub fn total(&self) -> u32 {
        self.failures + self.successes
    }

    /// Failure percentage, 0 when empty.
    pub fn failure_rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => f64::from(self.failures) / f64::from(total) * 100.0,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RollingWindow {
    period: Duration,
    entries: VecDeque<(Instant, Outcome)>,
    counts: WindowCounts,
}

impl RollingWindow {
    pub(crate) fn new(period: Duration) -> Self {
        Self {
            period,
            entries: VecDeque::new(),
            counts: WindowCounts::default(),
        }
    }

    fn cutoff(&self, now: Instant) -> Option<Instant> {
        now.checked_sub(self.period)
    }

    /// Drop entries that fell out of the window.
    pub(crate) fn trim(&mut self, now: Instant) {
        let Some(cutoff) = self.cutoff(now) else {
            return;
        };
        while let Some(&(at, outcome)) = self.entries.front() {
            if at >= cutoff {
                break;
            }
            self.entries.pop_front();
            match outcome {
                Outcome::Failure => self.counts.failures -= 1,
                Outcome::Success => self.counts.successes -= 1,
            }
        }
    }

    pub(crate) fn push(&mut self, now: Instant, outcome: Outcome) {
        self.entries.push_back((now, outcome));
        match outcome {
            Outcome::Failure => self.counts.failures += 1,
            Outcome::Success => self.counts.successes += 1,
        }
    }

    /// Counts as of the last trim.
    pub(crate) fn counts(&self) -> WindowCounts {
        self.counts
    }

    /// Counts as of `now`, without mutating.
    pub(crate) fn counts_at(&self, now: Instant) -> WindowCounts {
        let cutoff = self.cutoff(now);
        self.entries
            .iter()
            .filter(|(at, _)| cutoff.map_or(true, |c| *at >= c))
            .fold(WindowCounts::default(), |mut acc, (_, outcome)| {
                match outcome {
                    Outcome::Failure => acc.failures += 1,
                    Outcome::Success => acc.successes += 1,
                }
                acc
            })
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.counts = WindowCounts::default();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
