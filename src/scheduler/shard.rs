//! Static sharding: shard `i` of `N` runs on worker `i`.
//!
//! Shards never move between workers and are never rebalanced. A shard that
//! fails is retried on its own worker with the framework's re-run modifier
//! until it passes or the retry budget is spent.

use std::sync::Arc;

use tokio::task::JoinSet;

use super::WORKER_ABORTED;
use crate::command::{Command, CommandResult};
use crate::config::Strategy;
use crate::framework::TestFramework;
use crate::report::{ItemOutcome, ResultAggregator, Reporter, RunVerdict};
use crate::retry::{RetryPolicy, run_with_retries};
use crate::worker::WorkerPool;

/// Binds one shard to one worker for a single pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardAssignment {
    /// Id of the worker that owns the shard.
    pub worker_id: String,
    /// 0-based shard index.
    pub shard_index: usize,
    /// Total number of shards.
    pub shard_count: usize,
}

impl ShardAssignment {
    /// Report label, e.g. `shard 2/4`.
    pub fn label(&self) -> String {
        format!("shard {}/{}", self.shard_index + 1, self.shard_count)
    }
}

/// One assignment per worker, in pool order.
pub fn assign_shards(pool: &WorkerPool) -> Vec<ShardAssignment> {
    let shard_count = pool.len();
    pool.workers()
        .iter()
        .enumerate()
        .map(|(shard_index, worker)| ShardAssignment {
            worker_id: worker.id().to_string(),
            shard_index,
            shard_count,
        })
        .collect()
}

/// Runs every shard of `base` concurrently, one per worker.
///
/// The verdict holds one item per shard, in shard order.
pub async fn run_sharded(
    pool: &WorkerPool,
    framework: Arc<dyn TestFramework>,
    base: &Command,
    retries: usize,
    reporter: Arc<dyn Reporter>,
) -> RunVerdict {
    let aggregator = ResultAggregator::start(Strategy::Shard);
    let policy = RetryPolicy::new(retries).with_modifier(framework.rerun_modifier());
    let assignments = assign_shards(pool);

    tracing::info!(
        "Running {} shard(s) with {} (retries: {})",
        assignments.len(),
        framework.name(),
        retries
    );
    let labels: Vec<String> = assignments.iter().map(ShardAssignment::label).collect();
    reporter.on_discovery_complete(&labels).await;

    let mut tasks = JoinSet::new();
    for (worker, assignment) in pool.workers().iter().cloned().zip(assignments.clone()) {
        let framework = Arc::clone(&framework);
        let reporter = Arc::clone(&reporter);
        let policy = policy.clone();
        let base = base.clone();

        tasks.spawn(async move {
            let label = assignment.label();
            let command = framework.shard_command(&base, &assignment);
            reporter.on_item_start(&label, worker.id()).await;
            let outcome = run_with_retries(&worker, &command, &policy, &label).await;
            reporter.on_item_complete(&outcome).await;
            (assignment.shard_index, outcome)
        });
    }

    let mut outcomes: Vec<Option<ItemOutcome>> = vec![None; assignments.len()];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, outcome)) => outcomes[index] = Some(outcome),
            Err(e) => tracing::error!("Shard task aborted: {}", e),
        }
    }

    let items: Vec<ItemOutcome> = outcomes
        .into_iter()
        .zip(assignments)
        .map(|(outcome, assignment)| {
            outcome.unwrap_or_else(|| {
                ItemOutcome::from_attempts(
                    assignment.label(),
                    assignment.worker_id,
                    vec![CommandResult::infrastructure_failure(WORKER_ABORTED)],
                )
            })
        })
        .collect();

    let verdict = aggregator.aggregate(items);
    reporter.on_run_complete(&verdict).await;
    verdict
}
