//! Result aggregation and reporting.
//!
//! Schedulers push events to a [`Reporter`] as a pass progresses and hand
//! the final [`RunVerdict`] to [`Reporter::on_run_complete`]. Built-in
//! reporters:
//!
//! | Reporter | Output |
//! |----------|--------|
//! | [`ConsoleReporter`] | progress bar, live failures, final table |
//! | [`MarkdownReporter`] | Markdown table file and `$GITHUB_STEP_SUMMARY` |
//! | [`JUnitReporter`] | JUnit XML |
//! | [`JsonReporter`] | the verdict as JSON |

pub mod json;
pub mod junit;
pub mod markdown;
pub mod table;
pub mod verdict;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};

use crate::runner::{OutputCallback, OutputLine};

pub use json::JsonReporter;
pub use junit::JUnitReporter;
pub use markdown::MarkdownReporter;
pub use verdict::{ItemOutcome, ResultAggregator, RunVerdict, Summary, TerminalState};

/// Receives events during a scheduling pass.
///
/// Called concurrently from every worker task.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Called once the set of items (shards or tests) is known.
    async fn on_discovery_complete(&self, items: &[String]);

    /// Called when a worker starts an item.
    async fn on_item_start(&self, label: &str, worker: &str);

    /// Called when an item reaches its final state.
    async fn on_item_complete(&self, outcome: &ItemOutcome);

    /// Called with the aggregated verdict.
    async fn on_run_complete(&self, verdict: &RunVerdict);
}

/// A reporter that does nothing.
pub struct NullReporter;

#[async_trait]
impl Reporter for NullReporter {
    async fn on_discovery_complete(&self, _items: &[String]) {}
    async fn on_item_start(&self, _label: &str, _worker: &str) {}
    async fn on_item_complete(&self, _outcome: &ItemOutcome) {}
    async fn on_run_complete(&self, _verdict: &RunVerdict) {}
}

/// Fans events out to several reporters in order.
pub struct MultiReporter {
    reporters: Vec<Box<dyn Reporter>>,
}

impl MultiReporter {
    /// Creates an empty multi-reporter.
    pub fn new() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    /// Adds a reporter.
    pub fn with_reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }

    /// Number of reporters.
    pub fn len(&self) -> usize {
        self.reporters.len()
    }

    /// Returns `true` if no reporters were added.
    pub fn is_empty(&self) -> bool {
        self.reporters.is_empty()
    }
}

impl Default for MultiReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reporter for MultiReporter {
    async fn on_discovery_complete(&self, items: &[String]) {
        for reporter in &self.reporters {
            reporter.on_discovery_complete(items).await;
        }
    }

    async fn on_item_start(&self, label: &str, worker: &str) {
        for reporter in &self.reporters {
            reporter.on_item_start(label, worker).await;
        }
    }

    async fn on_item_complete(&self, outcome: &ItemOutcome) {
        for reporter in &self.reporters {
            reporter.on_item_complete(outcome).await;
        }
    }

    async fn on_run_complete(&self, verdict: &RunVerdict) {
        for reporter in &self.reporters {
            reporter.on_run_complete(verdict).await;
        }
    }
}

/// Console reporter with a progress bar and a final results table.
pub struct ConsoleReporter {
    progress: ProgressBar,
    title: String,
    verbose: bool,
}

impl ConsoleReporter {
    /// Creates a console reporter.
    pub fn new(title: impl Into<String>, verbose: bool) -> Self {
        let progress = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            progress.set_style(style.progress_chars("#>-"));
        }
        Self {
            progress,
            title: title.into(),
            verbose,
        }
    }

    /// A runner callback that prints `[worker] line` above the progress
    /// bar.
    pub fn output_callback(&self) -> OutputCallback {
        let progress = self.progress.clone();
        std::sync::Arc::new(move |worker: &str, line: &OutputLine| {
            let text = match line {
                OutputLine::Stdout(s) => s,
                OutputLine::Stderr(s) => s,
            };
            progress.println(format!("[{}] {}", worker, text));
        })
    }
}

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn on_discovery_complete(&self, items: &[String]) {
        self.progress.println(format!("Scheduling {} item(s)", items.len()));
        self.progress.set_length(items.len() as u64);
    }

    async fn on_item_start(&self, label: &str, worker: &str) {
        if self.verbose {
            self.progress.println(format!("Running: {} on {}", label, worker));
        }
    }

    async fn on_item_complete(&self, outcome: &ItemOutcome) {
        self.progress.inc(1);

        let status = match outcome.state {
            TerminalState::Pass => console::style("PASS").green(),
            TerminalState::PassOnRetry => console::style("PASS-ON-RETRY").yellow(),
            TerminalState::Fail => console::style("FAIL").red(),
            TerminalState::Timeout => console::style("TIMEOUT").red().bold(),
        };
        if self.verbose || outcome.state != TerminalState::Pass {
            self.progress
                .println(format!("{} {} [{}]", status, outcome.label, outcome.worker));
        }
    }

    async fn on_run_complete(&self, verdict: &RunVerdict) {
        self.progress.finish_and_clear();

        println!();
        println!("{}", table::render_text(verdict, &self.title));

        let summary = verdict.summary();
        println!("  Total:         {}", summary.total);
        println!("  Passed:        {}", console::style(summary.passed).green());
        if summary.passed_on_retry > 0 {
            println!(
                "  Pass on retry: {}",
                console::style(summary.passed_on_retry).yellow()
            );
        }
        println!("  Failed:        {}", console::style(summary.failed).red());
        if summary.timed_out > 0 {
            println!(
                "  Timed out:     {}",
                console::style(summary.timed_out).red().bold()
            );
        }
        println!("  Duration:      {}", table::format_duration(verdict.duration));

        println!();
        if verdict.success {
            println!("{}", console::style("All items passed!").green().bold());
        } else {
            println!("{}", console::style("Some items failed.").red().bold());
            for item in verdict.failed_items() {
                println!("  - {} [{}] {}", item.label, item.worker, item.state);
            }
        }
    }
}

/// Creates the parent directory of `path` if needed.
pub(crate) fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
            std::fs::create_dir_all(parent)
        }
        _ => Ok(()),
    }
}

/// Resolves a report file name against the output directory.
///
/// Absolute paths are used as-is.
pub fn report_path(output_dir: &Path, file: &Path) -> PathBuf {
    if file.is_absolute() {
        file.to_path_buf()
    } else {
        output_dir.join(file)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::config::Strategy;

    #[derive(Default)]
    struct CountingReporter {
        completed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Reporter for CountingReporter {
        async fn on_discovery_complete(&self, _items: &[String]) {}
        async fn on_item_start(&self, _label: &str, _worker: &str) {}
        async fn on_item_complete(&self, _outcome: &ItemOutcome) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
        async fn on_run_complete(&self, _verdict: &RunVerdict) {}
    }

    #[tokio::test]
    async fn test_multi_reporter_fans_out() {
        let a = CountingReporter::default();
        let b = CountingReporter::default();
        let (ca, cb) = (Arc::clone(&a.completed), Arc::clone(&b.completed));
        let multi = MultiReporter::new().with_reporter(a).with_reporter(b);
        assert_eq!(multi.len(), 2);

        let outcome = ItemOutcome::not_run("t", "x");
        multi.on_item_complete(&outcome).await;
        multi
            .on_run_complete(&ResultAggregator::start(Strategy::Queue).aggregate(vec![outcome]))
            .await;

        assert_eq!(ca.load(Ordering::SeqCst), 1);
        assert_eq!(cb.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_multi_reporter_is_noop() {
        let multi = MultiReporter::new();
        assert!(multi.is_empty());
        tokio_test::block_on(async {
            multi.on_discovery_complete(&["a".to_string()]).await;
            multi.on_item_start("a", "gpu0").await;
            NullReporter.on_item_start("a", "gpu0").await;
        });
    }

    #[test]
    fn test_report_path_resolution() {
        let dir = Path::new("results");
        assert_eq!(
            report_path(dir, Path::new("junit.xml")),
            PathBuf::from("results/junit.xml")
        );
        assert_eq!(
            report_path(dir, Path::new("/tmp/out.xml")),
            PathBuf::from("/tmp/out.xml")
        );
    }

    #[test]
    fn test_ensure_parent_dir_creates_nested() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/report.md");
        ensure_parent_dir(&path).unwrap();
        assert!(dir.path().join("a/b").is_dir());
    }
}
