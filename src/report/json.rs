//! Machine-readable verdict output.

use std::path::PathBuf;

use async_trait::async_trait;

use super::{ItemOutcome, Reporter, RunVerdict, ensure_parent_dir};

/// Writes the full [`RunVerdict`], including every attempt's output, as
/// pretty-printed JSON.
pub struct JsonReporter {
    output_path: PathBuf,
}

impl JsonReporter {
    /// Creates a reporter writing to `output_path`.
    pub fn new(output_path: PathBuf) -> Self {
        Self { output_path }
    }
}

#[async_trait]
impl Reporter for JsonReporter {
    async fn on_discovery_complete(&self, _items: &[String]) {}

    async fn on_item_start(&self, _label: &str, _worker: &str) {}

    async fn on_item_complete(&self, _outcome: &ItemOutcome) {}

    async fn on_run_complete(&self, verdict: &RunVerdict) {
        let json = match serde_json::to_string_pretty(verdict) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Failed to serialize verdict: {}", e);
                return;
            }
        };

        let written =
            ensure_parent_dir(&self.output_path).and_then(|()| std::fs::write(&self.output_path, json));
        match written {
            Ok(()) => tracing::info!("Verdict written to: {}", self.output_path.display()),
            Err(e) => tracing::error!("Failed to write verdict: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Strategy;
    use crate::report::ResultAggregator;

    #[tokio::test]
    async fn test_writes_verdict() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("verdict.json");
        let verdict = ResultAggregator::start(Strategy::Queue)
            .aggregate(vec![ItemOutcome::not_run("Suite.Test", "not run")]);

        JsonReporter::new(path.clone()).on_run_complete(&verdict).await;

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["items"][0]["label"], "Suite.Test");
        assert_eq!(value["items"][0]["attempts"][0]["exit_code"], 127);
        assert_eq!(value["run_id"], verdict.run_id.to_string());
    }
}
