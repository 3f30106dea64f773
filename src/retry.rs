//! Retry policy and the per-item attempt state machine.
//!
//! Both schedulers retry the same way: run an item, and while it fails and
//! budget remains, run it again on the same worker with the framework's
//! re-run modifier applied. Only the last attempt decides the item's state.
//!
//! ```text
//!  Pending ──start──► Running ──record(ok)───► Passed
//!                       ▲   │
//!                  start│   └──record(fail)──► Retrying      (budget left)
//!                       └────────────────────┘
//!                           └──record(fail)──► FailedFinal   (budget spent)
//! ```

use crate::command::{Command, CommandResult};
use crate::framework::RerunModifier;
use crate::report::ItemOutcome;
use crate::worker::Worker;

/// How many times an item may be re-run and how retries are altered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    retries: usize,
    modifier: RerunModifier,
}

impl RetryPolicy {
    /// A policy allowing `retries` extra attempts, re-running unchanged.
    pub fn new(retries: usize) -> Self {
        Self {
            retries,
            modifier: RerunModifier::none(),
        }
    }

    /// Applies `modifier` to every attempt after the first.
    pub fn with_modifier(mut self, modifier: RerunModifier) -> Self {
        self.modifier = modifier;
        self
    }

    /// Extra attempts allowed after the first.
    pub fn retries(&self) -> usize {
        self.retries
    }

    /// Upper bound on attempts per item.
    pub fn max_attempts(&self) -> usize {
        self.retries + 1
    }

    /// The command for 1-based `attempt`.
    pub fn command_for_attempt(&self, base: &Command, attempt: usize) -> Command {
        if attempt <= 1 {
            base.clone()
        } else {
            self.modifier.apply(base)
        }
    }
}

/// Where an item is in its retry lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    /// Not started.
    Pending,
    /// Attempt `n` (1-based) is running.
    Running(usize),
    /// Attempt `n` failed and another is allowed.
    Retrying(usize),
    /// Attempt `n` passed.
    Passed(usize),
    /// Attempt `n` failed and the budget is spent.
    FailedFinal(usize),
}

impl AttemptState {
    /// Returns `true` for `Passed` and `FailedFinal`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptState::Passed(_) | AttemptState::FailedFinal(_))
    }
}

/// Drives one item through [`AttemptState`] and keeps every attempt.
#[derive(Debug)]
pub struct AttemptMachine {
    max_attempts: usize,
    state: AttemptState,
    attempts: Vec<CommandResult>,
}

impl AttemptMachine {
    /// A machine for `policy`, in `Pending`.
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            max_attempts: policy.max_attempts(),
            state: AttemptState::Pending,
            attempts: Vec::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> AttemptState {
        self.state
    }

    /// Moves to `Running` and returns the attempt number, or `None` once
    /// the item is terminal.
    pub fn start(&mut self) -> Option<usize> {
        let attempt = match self.state {
            AttemptState::Pending => 1,
            AttemptState::Retrying(n) => n + 1,
            AttemptState::Running(n) => n,
            AttemptState::Passed(_) | AttemptState::FailedFinal(_) => return None,
        };
        self.state = AttemptState::Running(attempt);
        Some(attempt)
    }

    /// Records the running attempt's result and returns the new state.
    ///
    /// Ignored unless an attempt is running.
    pub fn record(&mut self, result: CommandResult) -> AttemptState {
        let AttemptState::Running(n) = self.state else {
            return self.state;
        };
        let passed = result.success();
        self.attempts.push(result);
        self.state = if passed {
            AttemptState::Passed(n)
        } else if n < self.max_attempts {
            AttemptState::Retrying(n)
        } else {
            AttemptState::FailedFinal(n)
        };
        self.state
    }

    /// All recorded attempts, in order.
    pub fn into_attempts(self) -> Vec<CommandResult> {
        self.attempts
    }
}

/// Runs `command` on `worker` until it passes or `policy` is exhausted.
///
/// Runner errors (spawn failure, broken pipes) count as failed attempts
/// with [`SPAWN_FAILED_EXIT_CODE`](crate::command::SPAWN_FAILED_EXIT_CODE)
/// and the error text as output. Retries stay on `worker` and are strictly
/// sequential.
pub async fn run_with_retries(
    worker: &Worker,
    command: &Command,
    policy: &RetryPolicy,
    label: &str,
) -> ItemOutcome {
    let mut machine = AttemptMachine::new(policy);

    while let Some(attempt) = machine.start() {
        let cmd = policy.command_for_attempt(command, attempt);
        let result = match worker.run(&cmd).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("[{}] {}: {}", worker.id(), label, e);
                CommandResult::infrastructure_failure(e.to_string())
            }
        };
        let exit_code = result.exit_code;
        let timed_out = result.timed_out;

        match machine.record(result) {
            AttemptState::Passed(n) if n > 1 => {
                tracing::info!("[{}] {} passed on attempt {}", worker.id(), label, n);
            }
            AttemptState::Retrying(n) => {
                tracing::warn!(
                    "[{}] {} failed (exit code {}{}), retrying {}/{}",
                    worker.id(),
                    label,
                    exit_code,
                    if timed_out { ", timed out" } else { "" },
                    n,
                    policy.retries()
                );
            }
            AttemptState::FailedFinal(n) => {
                tracing::error!(
                    "[{}] {} failed after {} attempt(s) (exit code {})",
                    worker.id(),
                    label,
                    n,
                    exit_code
                );
            }
            _ => {}
        }
    }

    ItemOutcome::from_attempts(label, worker.id(), machine.into_attempts())
}
