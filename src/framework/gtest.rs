//! GoogleTest integration.
//!
//! Sharding uses GoogleTest's native environment protocol
//! (`GTEST_SHARD_INDEX`, `GTEST_TOTAL_SHARDS`). There is no "re-run only
//! failed" flag, so a failing shard re-runs whole.
//!
//! # Listing format
//!
//! `--gtest_list_tests` prints suites unindented with a trailing dot and
//! their tests indented beneath them. Parameterised entries carry a
//! trailing `# GetParam() = ...` comment which is stripped:
//!
//! ```text
//! Running main() from gtest_main.cc
//! MathTest.
//!   Add
//!   Sub
//! Param/ValueTest.
//!   Check/0  # GetParam() = 1
//! ```

use super::{FrameworkError, FrameworkResult, RerunModifier, TestFramework, dedup_preserving_order};
use crate::command::Command;
use crate::scheduler::ShardAssignment;

/// Drives a GoogleTest binary.
#[derive(Debug, Default)]
pub struct GtestFramework;

impl GtestFramework {
    /// Creates the integration.
    pub fn new() -> Self {
        Self
    }
}

fn strip_comment(line: &str) -> &str {
    let content = match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    };
    content.trim()
}

impl TestFramework for GtestFramework {
    fn name(&self) -> &'static str {
        "gtest"
    }

    fn shard_command(&self, base: &Command, assignment: &ShardAssignment) -> Command {
        base.clone()
            .env("GTEST_SHARD_INDEX", assignment.shard_index.to_string())
            .env("GTEST_TOTAL_SHARDS", assignment.shard_count.to_string())
    }

    fn rerun_modifier(&self) -> RerunModifier {
        RerunModifier::none()
    }

    fn enumerate_command(&self, base: &Command) -> Command {
        base.clone().arg("--gtest_list_tests")
    }

    fn parse_enumeration(&self, output: &str) -> FrameworkResult<Vec<String>> {
        let mut suite: Option<String> = None;
        let mut names = Vec::new();

        for raw in output.lines() {
            if raw.trim().is_empty() {
                continue;
            }
            let indented = raw.starts_with(' ') || raw.starts_with('\t');
            let line = strip_comment(raw);

            if !indented {
                // Banner lines such as "Running main() from ..." are not suites.
                suite = line.ends_with('.').then(|| line.to_string());
                continue;
            }

            if line.is_empty() {
                continue;
            }
            match &suite {
                Some(prefix) => names.push(format!("{}{}", prefix, line)),
                None => {
                    return Err(FrameworkError::ParseError(format!(
                        "test {:?} listed outside any suite",
                        line
                    )));
                }
            }
        }

        Ok(dedup_preserving_order(names))
    }

    fn run_one_command(&self, template: &Command, test_name: &str) -> Command {
        template.clone().arg(format!("--gtest_filter={}", test_name))
    }
}
