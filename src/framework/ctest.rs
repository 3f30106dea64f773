//! CTest integration.
//!
//! | Operation | Syntax |
//! |-----------|--------|
//! | shard `i` of `n` | `--tests-information {i+1},,{n}` (strided, 1-based start) |
//! | re-run failed | `--rerun-failed` |
//! | run one test | `--tests-regex ^<escaped name>$` |
//! | enumerate | `--show-only=json-v1` |
//!
//! With `junit_per_shard`, each shard also writes
//! `--output-junit report_<worker>.xml` relative to the test directory.

use super::{FrameworkResult, RerunModifier, TestFramework, parse_json_listing};
use crate::command::Command;
use crate::config::CtestConfig;
use crate::scheduler::ShardAssignment;

/// Drives `ctest`.
pub struct CtestFramework {
    config: CtestConfig,
}

impl CtestFramework {
    /// Creates the integration from its configuration.
    pub fn new(config: CtestConfig) -> Self {
        Self { config }
    }
}

impl TestFramework for CtestFramework {
    fn name(&self) -> &'static str {
        "ctest"
    }

    fn shard_command(&self, base: &Command, assignment: &ShardAssignment) -> Command {
        let mut cmd = base.clone().args([
            "--tests-information".to_string(),
            format!("{},,{}", assignment.shard_index + 1, assignment.shard_count),
        ]);
        if self.config.junit_per_shard {
            cmd = cmd.args([
                "--output-junit".to_string(),
                format!("report_{}.xml", assignment.worker_id),
            ]);
        }
        cmd
    }

    fn rerun_modifier(&self) -> RerunModifier {
        RerunModifier::with_args(["--rerun-failed"])
    }

    fn enumerate_command(&self, base: &Command) -> Command {
        base.clone().arg("--show-only=json-v1")
    }

    fn parse_enumeration(&self, output: &str) -> FrameworkResult<Vec<String>> {
        parse_json_listing(output)
    }

    fn run_one_command(&self, template: &Command, test_name: &str) -> Command {
        template.clone().args([
            "--tests-regex".to_string(),
            format!("^{}$", regex::escape(test_name)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment(index: usize, count: usize) -> ShardAssignment {
        ShardAssignment {
            worker_id: format!("gpu{}", index),
            shard_index: index,
            shard_count: count,
        }
    }

    #[test]
    fn test_shard_uses_one_based_stride() {
        let framework = CtestFramework::new(CtestConfig::default());
        let cmd = framework.shard_command(&Command::new("ctest"), &assignment(2, 4));
        assert_eq!(cmd.args, vec!["--tests-information", "3,,4"]);
    }

    #[test]
    fn test_shard_junit_per_worker() {
        let framework = CtestFramework::new(CtestConfig {
            junit_per_shard: true,
            ..CtestConfig::default()
        });
        let cmd = framework.shard_command(&Command::new("ctest"), &assignment(0, 2));
        assert_eq!(
            cmd.args,
            vec![
                "--tests-information",
                "1,,2",
                "--output-junit",
                "report_gpu0.xml"
            ]
        );
    }

    #[test]
    fn test_run_one_escapes_regex() {
        let framework = CtestFramework::new(CtestConfig::default());
        let cmd = framework.run_one_command(&Command::new("ctest"), "math.add(int)");
        assert_eq!(cmd.args, vec!["--tests-regex", r"^math\.add\(int\)$"]);
    }

    #[test]
    fn test_parse_show_only_json() {
        let framework = CtestFramework::new(CtestConfig::default());
        let output = r#"{
            "kind": "ctestInfo",
            "version": {"major": 1, "minor": 0},
            "tests": [
                {"name": "unit_a", "command": ["./a"]},
                {"name": "unit_b", "command": ["./b"]}
            ]
        }"#;
        assert_eq!(
            framework.parse_enumeration(output).unwrap(),
            vec!["unit_a", "unit_b"]
        );
    }
}
