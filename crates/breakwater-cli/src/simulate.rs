//! Replay a call pattern through the breaker state machine.
//!
//! The clock is simulated: each step advances it by a fixed interval, so a
//! pattern spanning minutes replays instantly and always gives the same
//! result.

use anyhow::{bail, Context, Result};
use breakwater_core::{CircuitCore, CircuitOpenReason, CircuitState, Outcome};
use std::fmt;
use std::time::{Duration, Instant};

/// One step of a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A call that succeeds if admitted (`s` or `.`)
    Success,
    /// A call that fails if admitted (`f` or `x`)
    Failure,
    /// No call; only time passes (`-` or `_`)
    Idle,
}

impl Step {
    fn symbol(self) -> char {
        match self {
            Step::Success => 's',
            Step::Failure => 'f',
            Step::Idle => '-',
        }
    }
}

/// Parse a pattern such as `"ffff sfff --- s"`. Whitespace is ignored.
pub fn parse_pattern(pattern: &str) -> Result<Vec<Step>> {
    let mut steps = Vec::with_capacity(pattern.len());
    for (i, c) in pattern.chars().enumerate() {
        let step = match c.to_ascii_lowercase() {
            's' | '.' => Step::Success,
            'f' | 'x' => Step::Failure,
            '-' | '_' => Step::Idle,
            c if c.is_whitespace() => continue,
            other => bail!("invalid pattern character '{other}' at position {i} (use s, f or -)"),
        };
        steps.push(step);
    }
    if steps.is_empty() {
        bail!("pattern is empty");
    }
    Ok(steps)
}

/// What happened at one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    Recorded { probe: bool },
    Rejected(CircuitOpenReason),
    Idle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub offset: Duration,
    pub step: Step,
    pub result: StepResult,
    pub state: CircuitState,
}

impl fmt::Display for StepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match &self.result {
            StepResult::Recorded { probe: true } => "probe".to_string(),
            StepResult::Recorded { probe: false } => "recorded".to_string(),
            StepResult::Rejected(CircuitOpenReason::Open) => "rejected (open)".to_string(),
            StepResult::Rejected(CircuitOpenReason::ProbeInFlight) => {
                "rejected (probe in flight)".to_string()
            }
            StepResult::Idle => "idle".to_string(),
        };
        write!(
            f,
            "{:>10}  {}  {:<26} {}",
            humantime::format_duration(self.offset).to_string(),
            self.step.symbol(),
            result,
            self.state
        )
    }
}

/// Run `steps` against `core`, starting at `start` and advancing by
/// `interval` before each step after the first.
pub fn replay(
    core: &mut CircuitCore,
    steps: &[Step],
    start: Instant,
    interval: Duration,
) -> Result<Vec<StepReport>> {
    let mut reports = Vec::with_capacity(steps.len());
    let mut offset = Duration::ZERO;

    for (i, &step) in steps.iter().enumerate() {
        if i > 0 {
            offset = offset
                .checked_add(interval)
                .with_context(|| format!("simulated clock overflows at step {}", i + 1))?;
        }
        let Some(now) = start.checked_add(offset) else {
            bail!("simulated clock overflows at step {}", i + 1);
        };

        let result = match step {
            Step::Idle => StepResult::Idle,
            Step::Success | Step::Failure => match core.try_acquire(now) {
                Ok(admission) => {
                    let outcome = if step == Step::Success {
                        Outcome::Success
                    } else {
                        Outcome::Failure
                    };
                    core.record(outcome, &admission, now);
                    StepResult::Recorded {
                        probe: admission.probe,
                    }
                }
                Err(err) => StepResult::Rejected(err.reason),
            },
        };

        reports.push(StepReport {
            offset,
            step,
            result,
            state: core.state(),
        });
    }

    Ok(reports)
}
