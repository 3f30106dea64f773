//! Per-item outcomes and the aggregated run verdict.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::command::{CommandResult, duration_secs};
use crate::config::Strategy;

/// Final state of a shard or test after its retry budget.
///
/// | State | Meaning | Counts as success |
/// |-------|---------|-------------------|
/// | `PASS` | first attempt exited 0 | yes |
/// | `PASS-ON-RETRY` | a later attempt exited 0 | yes |
/// | `FAIL` | every attempt failed | no |
/// | `TIMEOUT` | every attempt failed, the last by idle timeout | no |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TerminalState {
    #[serde(rename = "PASS")]
    Pass,
    #[serde(rename = "PASS-ON-RETRY")]
    PassOnRetry,
    #[serde(rename = "FAIL")]
    Fail,
    #[serde(rename = "TIMEOUT")]
    Timeout,
}

impl TerminalState {
    /// Derives the state from the ordered attempts of one item.
    ///
    /// Only the last attempt decides; an item with no attempts failed.
    pub fn from_attempts(attempts: &[CommandResult]) -> Self {
        match attempts.last() {
            Some(last) if last.success() && attempts.len() == 1 => TerminalState::Pass,
            Some(last) if last.success() => TerminalState::PassOnRetry,
            Some(last) if last.timed_out => TerminalState::Timeout,
            _ => TerminalState::Fail,
        }
    }

    /// Returns `true` for `PASS` and `PASS-ON-RETRY`.
    pub fn is_success(&self) -> bool {
        matches!(self, TerminalState::Pass | TerminalState::PassOnRetry)
    }

    /// The label used in reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalState::Pass => "PASS",
            TerminalState::PassOnRetry => "PASS-ON-RETRY",
            TerminalState::Fail => "FAIL",
            TerminalState::Timeout => "TIMEOUT",
        }
    }
}

impl std::fmt::Display for TerminalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The final record of one shard or one test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemOutcome {
    /// Shard label (`shard 1/4`) or test name.
    pub label: String,

    /// Id of the worker that ran every attempt.
    pub worker: String,

    /// Final state.
    pub state: TerminalState,

    /// Every attempt in order; the last one is final.
    pub attempts: Vec<CommandResult>,
}

impl ItemOutcome {
    /// Builds an outcome from its attempts.
    pub fn from_attempts(
        label: impl Into<String>,
        worker: impl Into<String>,
        attempts: Vec<CommandResult>,
    ) -> Self {
        Self {
            label: label.into(),
            worker: worker.into(),
            state: TerminalState::from_attempts(&attempts),
            attempts,
        }
    }

    /// Records an item that never reached a final state on any worker.
    pub fn not_run(label: impl Into<String>, message: impl Into<String>) -> Self {
        Self::from_attempts(
            label,
            "-",
            vec![CommandResult::infrastructure_failure(message)],
        )
    }

    /// Returns `true` if the final attempt passed.
    pub fn passed(&self) -> bool {
        self.state.is_success()
    }

    /// Number of attempts made.
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    /// The deciding attempt.
    pub fn final_result(&self) -> Option<&CommandResult> {
        self.attempts.last()
    }

    /// Time spent across all attempts.
    pub fn duration(&self) -> Duration {
        self.attempts.iter().map(|a| a.duration).sum()
    }
}

/// Count of items per terminal state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub passed_on_retry: usize,
    pub failed: usize,
    pub timed_out: usize,
}

/// The aggregated outcome of one scheduling pass.
#[derive(Debug, Clone, Serialize)]
pub struct RunVerdict {
    /// Unique id of this run.
    pub run_id: Uuid,

    /// When the pass started.
    pub started_at: DateTime<Utc>,

    /// Strategy that produced the items.
    pub strategy: Strategy,

    /// One entry per shard or test.
    pub items: Vec<ItemOutcome>,

    /// `true` iff every item's final state is a success.
    pub success: bool,

    /// Wall-clock time of the pass.
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

impl RunVerdict {
    /// Process exit code: 0 on success, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.success { 0 } else { 1 }
    }

    /// Counts per terminal state.
    pub fn summary(&self) -> Summary {
        let mut summary = Summary {
            total: self.items.len(),
            ..Summary::default()
        };
        for item in &self.items {
            match item.state {
                TerminalState::Pass => summary.passed += 1,
                TerminalState::PassOnRetry => summary.passed_on_retry += 1,
                TerminalState::Fail => summary.failed += 1,
                TerminalState::Timeout => summary.timed_out += 1,
            }
        }
        summary
    }

    /// Items whose final state is a failure.
    pub fn failed_items(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.items.iter().filter(|item| !item.passed())
    }

    /// Total number of command invocations across all items.
    pub fn invocations(&self) -> usize {
        self.items.iter().map(ItemOutcome::attempt_count).sum()
    }
}

/// Merges item outcomes into a [`RunVerdict`].
///
/// Created when a pass starts so the verdict carries the pass's start time
/// and wall-clock duration.
#[derive(Debug)]
pub struct ResultAggregator {
    strategy: Strategy,
    run_id: Uuid,
    started_at: DateTime<Utc>,
    start: Instant,
}

impl ResultAggregator {
    /// Starts timing a pass.
    pub fn start(strategy: Strategy) -> Self {
        Self {
            strategy,
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            start: Instant::now(),
        }
    }

    /// Id assigned to this run.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Computes the verdict over final outcomes. An empty set succeeds.
    pub fn aggregate(self, items: Vec<ItemOutcome>) -> RunVerdict {
        let success = items.iter().all(ItemOutcome::passed);
        RunVerdict {
            run_id: self.run_id,
            started_at: self.started_at,
            strategy: self.strategy,
            items,
            success,
            duration: self.start.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(exit_code: i32, timed_out: bool) -> CommandResult {
        CommandResult {
            exit_code,
            combined_output: String::new(),
            timed_out,
            duration: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_terminal_state_from_attempts() {
        assert_eq!(
            TerminalState::from_attempts(&[result(0, false)]),
            TerminalState::Pass
        );
        assert_eq!(
            TerminalState::from_attempts(&[result(1, false), result(0, false)]),
            TerminalState::PassOnRetry
        );
        assert_eq!(
            TerminalState::from_attempts(&[result(1, false), result(124, true)]),
            TerminalState::Timeout
        );
        assert_eq!(
            TerminalState::from_attempts(&[result(124, true), result(2, false)]),
            TerminalState::Fail
        );
        assert_eq!(TerminalState::from_attempts(&[]), TerminalState::Fail);
    }

    #[test]
    fn test_empty_run_succeeds() {
        let verdict = ResultAggregator::start(Strategy::Queue).aggregate(Vec::new());
        assert!(verdict.success);
        assert_eq!(verdict.exit_code(), 0);
        assert_eq!(verdict.summary().total, 0);
    }

    #[test]
    fn test_pass_on_retry_keeps_exit_zero() {
        let items = vec![
            ItemOutcome::from_attempts("a", "gpu0", vec![result(0, false)]),
            ItemOutcome::from_attempts("b", "gpu1", vec![result(1, false), result(0, false)]),
        ];
        let verdict = ResultAggregator::start(Strategy::Shard).aggregate(items);
        assert!(verdict.success);
        assert_eq!(verdict.invocations(), 3);
        assert_eq!(verdict.summary().passed_on_retry, 1);
    }

    #[test]
    fn test_any_failure_fails_run() {
        let items = vec![
            ItemOutcome::from_attempts("a", "gpu0", vec![result(0, false)]),
            ItemOutcome::not_run("b", "not run (worker aborted)"),
        ];
        let verdict = ResultAggregator::start(Strategy::Queue).aggregate(items);
        assert!(!verdict.success);
        assert_eq!(verdict.exit_code(), 1);
        assert_eq!(verdict.failed_items().count(), 1);
        assert_eq!(verdict.items[1].worker, "-");
    }

    #[test]
    fn test_verdict_serializes_states() {
        let items = vec![ItemOutcome::from_attempts(
            "a",
            "gpu0",
            vec![result(1, false), result(0, false)],
        )];
        let verdict = ResultAggregator::start(Strategy::Shard).aggregate(items);
        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(json["items"][0]["state"], "PASS-ON-RETRY");
        assert_eq!(json["strategy"], "shard");
        assert_eq!(json["success"], true);
    }
}
