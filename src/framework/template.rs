//! Template framework for anything without a built-in integration.
//!
//! Each operation is described by argument lists in the configuration.
//! Placeholders are substituted in every argument (and in shard environment
//! values):
//!
//! | Placeholder | Value |
//! |-------------|-------|
//! | `{index}` | 0-based shard index |
//! | `{index1}` | 1-based shard index |
//! | `{total}` | shard count |
//! | `{test}` | one test name |
//!
//! # Example: pytest-xdist style splitting
//!
//! ```toml
//! [framework]
//! type = "template"
//! command = "python -m pytest tests"
//! shard_args = ["--splits", "{total}", "--group", "{index1}"]
//! rerun_args = ["--last-failed"]
//! enumerate_args = ["--collect-only", "-q"]
//! enumeration_format = "lines"
//! run_one_args = ["{test}"]
//! ```
//!
//! When `run_one_args` is empty the test name is appended as the last
//! argument.

use super::{
    FrameworkResult, RerunModifier, TestFramework, dedup_preserving_order, parse_json_listing,
};
use crate::command::Command;
use crate::config::{EnumerationFormat, TemplateConfig};
use crate::scheduler::ShardAssignment;

/// Drives an arbitrary command through configured argument templates.
pub struct TemplateFramework {
    config: TemplateConfig,
}

impl TemplateFramework {
    /// Creates the integration from its configuration.
    pub fn new(config: TemplateConfig) -> Self {
        Self { config }
    }
}

fn expand_shard(template: &str, assignment: &ShardAssignment) -> String {
    template
        .replace("{index1}", &(assignment.shard_index + 1).to_string())
        .replace("{index}", &assignment.shard_index.to_string())
        .replace("{total}", &assignment.shard_count.to_string())
}

impl TestFramework for TemplateFramework {
    fn name(&self) -> &'static str {
        "template"
    }

    fn shard_command(&self, base: &Command, assignment: &ShardAssignment) -> Command {
        base.clone()
            .args(
                self.config
                    .shard_args
                    .iter()
                    .map(|arg| expand_shard(arg, assignment)),
            )
            .envs(
                self.config
                    .shard_env
                    .iter()
                    .map(|(key, value)| (key.clone(), expand_shard(value, assignment))),
            )
    }

    fn rerun_modifier(&self) -> RerunModifier {
        RerunModifier::with_args(self.config.rerun_args.iter().cloned())
    }

    fn enumerate_command(&self, base: &Command) -> Command {
        base.clone().args(self.config.enumerate_args.iter().cloned())
    }

    fn parse_enumeration(&self, output: &str) -> FrameworkResult<Vec<String>> {
        match self.config.enumeration_format {
            EnumerationFormat::Json => parse_json_listing(output),
            EnumerationFormat::Lines => Ok(dedup_preserving_order(
                output
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty() && !line.starts_with('#'))
                    .map(String::from),
            )),
        }
    }

    fn run_one_command(&self, template: &Command, test_name: &str) -> Command {
        if self.config.run_one_args.is_empty() {
            return template.clone().arg(test_name);
        }
        template.clone().args(
            self.config
                .run_one_args
                .iter()
                .map(|arg| arg.replace("{test}", test_name)),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn framework() -> TemplateFramework {
        TemplateFramework::new(TemplateConfig {
            command: "./suite".to_string(),
            shard_args: vec!["--shard={index}".to_string(), "{index1}/{total}".to_string()],
            shard_env: BTreeMap::from([("SHARD".to_string(), "{index}".to_string())]),
            rerun_args: vec!["--failed".to_string()],
            enumerate_args: vec!["--list".to_string()],
            enumeration_format: EnumerationFormat::Lines,
            run_one_args: vec!["--only".to_string(), "{test}".to_string()],
            ..TemplateConfig::default()
        })
    }

    #[test]
    fn test_shard_placeholders() {
        let assignment = ShardAssignment {
            worker_id: "gpu1".to_string(),
            shard_index: 1,
            shard_count: 4,
        };
        let cmd = framework().shard_command(&Command::new("./suite"), &assignment);
        assert_eq!(cmd.args, vec!["--shard=1", "2/4"]);
        assert_eq!(cmd.env_value("SHARD"), Some("1"));
    }

    #[test]
    fn test_lines_listing_skips_comments() {
        let names = framework()
            .parse_enumeration("# header\nalpha\n\n  beta  \nalpha\n")
            .unwrap();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_run_one_substitutes_name() {
        let cmd = framework().run_one_command(&Command::new("./suite"), "alpha");
        assert_eq!(cmd.args, vec!["--only", "alpha"]);

        let bare = TemplateFramework::new(TemplateConfig::default());
        let cmd = bare.run_one_command(&Command::new("./suite"), "alpha");
        assert_eq!(cmd.args, vec!["alpha"]);
    }

    #[test]
    fn test_rerun_and_enumerate_args() {
        let fw = framework();
        assert_eq!(fw.rerun_modifier().args, vec!["--failed"]);
        assert_eq!(
            fw.enumerate_command(&Command::new("./suite")).args,
            vec!["--list"]
        );
    }
}
