//! Markdown report output.
//!
//! Writes the results table to a file and, when running under GitHub
//! Actions, appends the same fragment to `$GITHUB_STEP_SUMMARY` so it shows
//! on the workflow run page.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{ItemOutcome, Reporter, RunVerdict, ensure_parent_dir, table};

/// Environment variable GitHub Actions sets to the step summary file.
pub const GITHUB_STEP_SUMMARY: &str = "GITHUB_STEP_SUMMARY";

/// Reporter that renders the verdict as a Markdown table.
pub struct MarkdownReporter {
    title: String,
    output_path: Option<PathBuf>,
    step_summary: Option<PathBuf>,
}

impl MarkdownReporter {
    /// Creates a reporter with no destinations.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            output_path: None,
            step_summary: None,
        }
    }

    /// Writes (overwrites) the table to `path`.
    pub fn with_file(mut self, path: PathBuf) -> Self {
        self.output_path = Some(path);
        self
    }

    /// Appends the table to `path`.
    pub fn with_step_summary(mut self, path: PathBuf) -> Self {
        self.step_summary = Some(path);
        self
    }

    /// Appends to the file named by `$GITHUB_STEP_SUMMARY`, if set.
    pub fn with_github_step_summary(self) -> Self {
        match std::env::var_os(GITHUB_STEP_SUMMARY) {
            Some(path) if !path.is_empty() => self.with_step_summary(PathBuf::from(path)),
            _ => self,
        }
    }

    /// Returns `true` if the reporter writes anywhere.
    pub fn has_destination(&self) -> bool {
        self.output_path.is_some() || self.step_summary.is_some()
    }

    fn write_file(path: &Path, content: &str) -> std::io::Result<()> {
        ensure_parent_dir(path)?;
        std::fs::write(path, content)
    }

    fn append_file(path: &Path, content: &str) -> std::io::Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(file, "{}", content)
    }
}

#[async_trait]
impl Reporter for MarkdownReporter {
    async fn on_discovery_complete(&self, _items: &[String]) {}

    async fn on_item_start(&self, _label: &str, _worker: &str) {}

    async fn on_item_complete(&self, _outcome: &ItemOutcome) {}

    async fn on_run_complete(&self, verdict: &RunVerdict) {
        let content = table::render_markdown(verdict, &self.title);

        if let Some(path) = &self.output_path {
            match Self::write_file(path, &content) {
                Ok(()) => tracing::info!("Markdown report written to: {}", path.display()),
                Err(e) => tracing::error!("Failed to write Markdown report: {}", e),
            }
        }

        if let Some(path) = &self.step_summary {
            match Self::append_file(path, &content) {
                Ok(()) => tracing::debug!("Appended step summary to {}", path.display()),
                Err(e) => tracing::error!("Failed to append step summary: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Strategy;
    use crate::report::ResultAggregator;

    #[tokio::test]
    async fn test_writes_file_and_appends_summary() {
        let dir = tempfile::tempdir().unwrap();
        let report = dir.path().join("out/report.md");
        let summary = dir.path().join("summary.md");
        std::fs::write(&summary, "existing\n").unwrap();

        let reporter = MarkdownReporter::new("GPU Tests")
            .with_file(report.clone())
            .with_step_summary(summary.clone());
        assert!(reporter.has_destination());

        let verdict = ResultAggregator::start(Strategy::Shard)
            .aggregate(vec![ItemOutcome::not_run("shard 1/1", "boom")]);
        reporter.on_run_complete(&verdict).await;

        let written = std::fs::read_to_string(report).unwrap();
        assert!(written.starts_with("## GPU Tests"));
        assert!(written.contains("| shard 1/1 | - | FAIL | 1 | 00:00:00 |"));

        let appended = std::fs::read_to_string(summary).unwrap();
        assert!(appended.starts_with("existing\n## GPU Tests"));
    }

    #[test]
    fn test_no_destination_by_default() {
        assert!(!MarkdownReporter::new("x").has_destination());
    }
}
