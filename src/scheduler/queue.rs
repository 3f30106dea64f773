//! Queue mode: enumerate once, then workers pull single tests.
//!
//! ```text
//!   enumerate (worker 0, once)
//!            │
//!            ▼
//!   TestQueue [t1, t2, ..., tK]   (filled before any consumer starts)
//!      │        │          │
//!    gpu0     gpu1  ...  gpuN-1   pop → run_one(t) with retries → pop ...
//! ```
//!
//! Retries stay with the consumer that popped the test and never re-enter
//! the queue, so every enumerated name reaches exactly one final state.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;

use super::{SchedulerError, SchedulerResult, WORKER_ABORTED};
use crate::command::Command;
use crate::config::Strategy;
use crate::framework::{TestFramework, dedup_preserving_order};
use crate::report::{ItemOutcome, ResultAggregator, Reporter, RunVerdict};
use crate::retry::{RetryPolicy, run_with_retries};
use crate::worker::{Worker, WorkerPool};

/// One test waiting to be claimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestQueueItem {
    pub test_name: String,
}

/// The shared FIFO of tests for one pass.
///
/// Filled completely at construction. [`pop`](Self::pop) hands each item to
/// exactly one caller.
#[derive(Debug)]
pub struct TestQueue {
    items: Mutex<VecDeque<TestQueueItem>>,
    len: usize,
}

impl TestQueue {
    /// Builds a queue from `names`, dropping duplicates but keeping order.
    pub fn new<I>(names: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let items: VecDeque<TestQueueItem> = dedup_preserving_order(names)
            .into_iter()
            .map(|test_name| TestQueueItem { test_name })
            .collect();
        let len = items.len();
        Self {
            items: Mutex::new(items),
            len,
        }
    }

    /// Number of items the queue was filled with.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the queue was filled with nothing.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Claims the next item, or `None` once drained.
    pub async fn pop(&self) -> Option<TestQueueItem> {
        self.items.lock().await.pop_front()
    }

    /// Items not yet claimed.
    pub async fn remaining(&self) -> usize {
        self.items.lock().await.len()
    }
}

/// Runs the framework's enumeration once on `worker` and parses the result.
///
/// # Errors
///
/// Every failure is structural: spawn errors, idle timeout, non-zero exit,
/// and unparsable output.
pub async fn enumerate_tests(
    worker: &Worker,
    framework: &dyn TestFramework,
    base: &Command,
) -> SchedulerResult<Vec<String>> {
    let command = framework.enumerate_command(base);
    let result = worker.run(&command).await?;

    if result.timed_out {
        return Err(SchedulerError::EnumerationTimeout);
    }
    if result.exit_code != 0 {
        return Err(SchedulerError::EnumerationFailed {
            exit_code: result.exit_code,
            output: result.combined_output,
        });
    }

    let names = framework.parse_enumeration(&result.combined_output)?;
    tracing::info!("Enumerated {} test(s) with {}", names.len(), framework.name());
    Ok(names)
}

/// Enumerates tests, then drains them through one consumer per worker.
///
/// The verdict holds one item per enumerated test, in enumeration order.
/// Zero tests is a successful no-op.
///
/// # Errors
///
/// Returns [`SchedulerError`] if enumeration fails; nothing runs in that
/// case.
pub async fn run_queued(
    pool: &WorkerPool,
    framework: Arc<dyn TestFramework>,
    template: &Command,
    retries: usize,
    reporter: Arc<dyn Reporter>,
) -> SchedulerResult<RunVerdict> {
    let aggregator = ResultAggregator::start(Strategy::Queue);
    let Some(first) = pool.workers().first() else {
        return Ok(aggregator.aggregate(Vec::new()));
    };

    let names = enumerate_tests(first, framework.as_ref(), template).await?;
    let queue = Arc::new(TestQueue::new(names));
    let order = queue_names(&queue).await;
    reporter.on_discovery_complete(&order).await;

    if queue.is_empty() {
        tracing::info!("No tests enumerated, nothing to run");
        let verdict = aggregator.aggregate(Vec::new());
        reporter.on_run_complete(&verdict).await;
        return Ok(verdict);
    }

    let policy = RetryPolicy::new(retries);
    let (tx, mut rx) = mpsc::unbounded_channel::<ItemOutcome>();

    tracing::info!(
        "Draining {} test(s) across {} worker(s) (retries: {})",
        queue.len(),
        pool.len(),
        retries
    );

    let mut tasks = JoinSet::new();
    for worker in pool.workers().iter().cloned() {
        let queue = Arc::clone(&queue);
        let framework = Arc::clone(&framework);
        let reporter = Arc::clone(&reporter);
        let policy = policy.clone();
        let template = template.clone();
        let tx = tx.clone();

        tasks.spawn(async move {
            let mut ran = 0usize;
            while let Some(item) = queue.pop().await {
                let command = framework.run_one_command(&template, &item.test_name);
                reporter.on_item_start(&item.test_name, worker.id()).await;
                let outcome = run_with_retries(&worker, &command, &policy, &item.test_name).await;
                reporter.on_item_complete(&outcome).await;
                ran += 1;
                if tx.send(outcome).is_err() {
                    break;
                }
            }
            tracing::debug!("[{}] queue drained after {} test(s)", worker.id(), ran);
        });
    }
    drop(tx);

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            tracing::error!("Queue consumer aborted: {}", e);
        }
    }

    let mut finished: HashMap<String, ItemOutcome> = HashMap::new();
    while let Some(outcome) = rx.recv().await {
        finished.insert(outcome.label.clone(), outcome);
    }

    let items: Vec<ItemOutcome> = order
        .into_iter()
        .map(|name| match finished.remove(&name) {
            Some(outcome) => outcome,
            None => {
                tracing::error!("{} never reached a final state", name);
                ItemOutcome::not_run(name, WORKER_ABORTED)
            }
        })
        .collect();

    let verdict = aggregator.aggregate(items);
    reporter.on_run_complete(&verdict).await;
    Ok(verdict)
}

async fn queue_names(queue: &TestQueue) -> Vec<String> {
    queue
        .items
        .lock()
        .await
        .iter()
        .map(|item| item.test_name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::{EnumerationFormat, TemplateConfig};
    use crate::framework::{GtestFramework, TemplateFramework};
    use crate::report::{NullReporter, TerminalState};
    use crate::runner::CommandRunner;
    use crate::worker::StaticDiscoverer;

    async fn pool(count: u32) -> WorkerPool {
        let pin_env = vec!["HIP_VISIBLE_DEVICES".to_string()];
        let discoverer = StaticDiscoverer::with_count(count, pin_env);
        WorkerPool::discover(&discoverer, CommandRunner::new(Duration::from_secs(10)))
            .await
            .unwrap()
    }

    fn lines_framework() -> Arc<dyn TestFramework> {
        Arc::new(TemplateFramework::new(TemplateConfig {
            enumeration_format: EnumerationFormat::Lines,
            ..TemplateConfig::default()
        }))
    }

    /// Lists `test1..test{count}` when called without arguments, otherwise
    /// logs the test name and runs `body`.
    fn suite(count: usize, log: &std::path::Path, body: &str) -> Command {
        let script = format!(
            "if [ -z \"$1\" ]; then i=1; while [ $i -le {count} ]; do echo test$i; i=$((i+1)); done; exit 0; fi\n\
             echo \"$1\" >> {log}\n\
             {body}",
            count = count,
            log = log.display(),
            body = body
        );
        Command::new("sh").arg("-c").arg(script).arg("suite")
    }

    #[tokio::test]
    async fn test_queue_pop_is_exactly_once() {
        let queue = Arc::new(TestQueue::new(
            ["a", "b", "a", "c"].into_iter().map(String::from),
        ));
        assert_eq!(queue.len(), 3);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Some(item) = queue.pop().await {
                    got.push(item.test_name);
                }
                got
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort();
        assert_eq!(all, vec!["a", "b", "c"]);
        assert_eq!(queue.remaining().await, 0);
    }

    #[tokio::test]
    async fn test_flaky_test_seven() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("invocations");
        let marker = dir.path().join("flaked");
        let body = format!(
            "if [ \"$1\" = test7 ] && [ ! -f {0} ]; then touch {0}; exit 1; fi",
            marker.display()
        );

        let pool = pool(4).await;
        let verdict = run_queued(
            &pool,
            lines_framework(),
            &suite(10, &log, &body),
            2,
            Arc::new(NullReporter),
        )
        .await
        .unwrap();

        assert!(verdict.success);
        assert_eq!(verdict.exit_code(), 0);
        assert_eq!(verdict.items.len(), 10);
        assert_eq!(verdict.items[6].label, "test7");
        assert_eq!(verdict.items[6].state, TerminalState::PassOnRetry);
        assert_eq!(verdict.summary().passed, 9);
        assert_eq!(verdict.invocations(), 11);

        let logged = std::fs::read_to_string(&log).unwrap();
        assert_eq!(logged.lines().count(), 11);
    }

    #[tokio::test]
    async fn test_zero_tests_is_noop_success() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("invocations");
        let verdict = run_queued(
            &pool(2).await,
            lines_framework(),
            &suite(0, &log, "exit 1"),
            1,
            Arc::new(NullReporter),
        )
        .await
        .unwrap();

        assert!(verdict.success);
        assert!(verdict.items.is_empty());
        assert!(!log.exists());
    }

    #[tokio::test]
    async fn test_single_test_many_workers() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("invocations");
        let verdict = run_queued(
            &pool(4).await,
            lines_framework(),
            &suite(1, &log, "exit 0"),
            1,
            Arc::new(NullReporter),
        )
        .await
        .unwrap();

        assert_eq!(verdict.items.len(), 1);
        assert_eq!(verdict.invocations(), 1);
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "test1\n");
    }

    #[tokio::test]
    async fn test_failing_test_exhausts_retries_without_requeue() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("invocations");
        let body = "[ \"$1\" != test2 ]";
        let verdict = run_queued(
            &pool(2).await,
            lines_framework(),
            &suite(3, &log, body),
            2,
            Arc::new(NullReporter),
        )
        .await
        .unwrap();

        assert!(!verdict.success);
        assert_eq!(verdict.items[1].state, TerminalState::Fail);
        assert_eq!(verdict.items[1].attempt_count(), 3);
        assert_eq!(verdict.invocations(), 5);
        assert!(verdict.items[1].worker.starts_with("gpu"));
    }

    #[tokio::test]
    async fn test_enumeration_failure_is_structural() {
        let base = Command::new("sh").arg("-c").arg("echo broken; exit 2");
        let err = run_queued(
            &pool(2).await,
            Arc::new(GtestFramework::new()),
            &base,
            1,
            Arc::new(NullReporter),
        )
        .await
        .unwrap_err();

        match err {
            SchedulerError::EnumerationFailed { exit_code, output } => {
                assert_eq!(exit_code, 2);
                assert!(output.contains("broken"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unparsable_enumeration_is_structural() {
        let base = Command::new("sh").arg("-c").arg("echo '  orphan'");
        let err = run_queued(
            &pool(1).await,
            Arc::new(GtestFramework::new()),
            &base,
            0,
            Arc::new(NullReporter),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SchedulerError::EnumerationParse(_)));
    }
}
