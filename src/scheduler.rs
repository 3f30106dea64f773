//! Scheduling strategies.
//!
//! | Strategy | Entry point | Unit of work | Retries |
//! |----------|-------------|--------------|---------|
//! | shard | [`run_sharded`] | one static shard per worker | shard re-runs with the framework's re-run modifier |
//! | queue | [`run_queued`] | one test, pulled from a shared FIFO | test re-runs unchanged on the same worker |
//!
//! Both strategies run one tokio task per worker, joined through a
//! [`JoinSet`](tokio::task::JoinSet). Each task owns its own clone of the
//! worker, so no worker is ever driven by two tasks. A task that panics is
//! converted into failed outcomes for whatever it had not finished.

pub mod queue;
pub mod shard;

use crate::framework::FrameworkError;
use crate::runner::RunnerError;

pub use queue::{TestQueue, TestQueueItem, enumerate_tests, run_queued};
pub use shard::{ShardAssignment, run_sharded};

/// Result type for scheduling.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Structural failures that abort a pass before any parallel execution.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The enumeration command could not be run.
    #[error("Test enumeration could not run: {0}")]
    EnumerationSpawn(#[from] RunnerError),

    /// The enumeration command produced no output for the idle timeout.
    #[error("Test enumeration timed out")]
    EnumerationTimeout,

    /// The enumeration command exited non-zero.
    #[error("Test enumeration exited with code {exit_code}:\n{output}")]
    EnumerationFailed { exit_code: i32, output: String },

    /// The enumeration output could not be parsed.
    #[error(transparent)]
    EnumerationParse(#[from] FrameworkError),
}

/// Message recorded for items whose worker task died before finishing them.
pub const WORKER_ABORTED: &str = "not run (worker aborted)";
