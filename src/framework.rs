//! Test framework integrations.
//!
//! shardrun never implements a test framework. It drives an external one
//! through the [`TestFramework`] trait, which owns the concrete flag and
//! environment syntax for four operations:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        TestFramework                             │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  shard_command(base, shard i of n) ──► Command   (shard mode)    │
//! │  rerun_modifier() ───────────────────► args/env  (retries)       │
//! │  enumerate_command(base) ────────────► Command   (queue mode)    │
//! │  parse_enumeration(output) ──────────► Vec<test name>            │
//! │  run_one_command(base, name) ────────► Command   (queue mode)    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Built-in Frameworks
//!
//! | Implementation | Shard selection | Re-run failed | Enumeration |
//! |----------------|-----------------|---------------|-------------|
//! | [`ctest::CtestFramework`] | `--tests-information i,,n` | `--rerun-failed` | `--show-only=json-v1` |
//! | [`gtest::GtestFramework`] | `GTEST_SHARD_INDEX` / `GTEST_TOTAL_SHARDS` | none | `--gtest_list_tests` |
//! | [`template::TemplateFramework`] | configured templates | configured | configured |

pub mod ctest;
pub mod gtest;
pub mod template;

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;

use crate::command::Command;
use crate::config::FrameworkConfig;
use crate::scheduler::ShardAssignment;

pub use ctest::CtestFramework;
pub use gtest::GtestFramework;
pub use template::TemplateFramework;

/// Result type for framework operations.
pub type FrameworkResult<T> = Result<T, FrameworkError>;

/// Errors raised by framework integrations.
#[derive(Debug, thiserror::Error)]
pub enum FrameworkError {
    /// The enumeration output could not be interpreted.
    #[error("Failed to parse test listing: {0}")]
    ParseError(String),
}

/// Extra arguments and environment appended to a command on retry attempts.
///
/// An empty modifier re-runs the command unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RerunModifier {
    /// Arguments appended after the command's own.
    pub args: Vec<String>,
    /// Environment appended after the command's own.
    pub env: Vec<(String, String)>,
}

impl RerunModifier {
    /// A modifier that leaves commands unchanged.
    pub fn none() -> Self {
        Self::default()
    }

    /// A modifier that appends `args`.
    pub fn with_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            env: Vec::new(),
        }
    }

    /// Returns `true` if applying this modifier changes nothing.
    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.env.is_empty()
    }

    /// Returns `command` with the modifier applied.
    pub fn apply(&self, command: &Command) -> Command {
        command
            .clone()
            .args(self.args.iter().cloned())
            .envs(self.env.iter().cloned())
    }
}

/// Adapter between shardrun and one external test framework.
///
/// Implementations are stateless with respect to a run and are shared
/// across worker tasks behind an [`Arc`].
pub trait TestFramework: Send + Sync {
    /// Short name for logs and reports.
    fn name(&self) -> &'static str;

    /// Builds the command that runs shard `assignment` of `base`.
    fn shard_command(&self, base: &Command, assignment: &ShardAssignment) -> Command;

    /// The modifier appended to a failing shard's retry attempts.
    fn rerun_modifier(&self) -> RerunModifier;

    /// Builds the dry-run command that lists every test `base` would run.
    fn enumerate_command(&self, base: &Command) -> Command;

    /// Parses the output of [`enumerate_command`](Self::enumerate_command)
    /// into test names, in order and without duplicates.
    fn parse_enumeration(&self, output: &str) -> FrameworkResult<Vec<String>>;

    /// Builds the command that runs exactly one named test.
    fn run_one_command(&self, template: &Command, test_name: &str) -> Command;
}

/// Builds the framework integration selected by `config`.
pub fn from_config(config: &FrameworkConfig) -> Arc<dyn TestFramework> {
    match config {
        FrameworkConfig::Ctest(cfg) => Arc::new(CtestFramework::new(cfg.clone())),
        FrameworkConfig::Gtest(_) => Arc::new(GtestFramework::new()),
        FrameworkConfig::Template(cfg) => Arc::new(TemplateFramework::new(cfg.clone())),
    }
}

/// Removes repeated names, keeping the first occurrence.
pub fn dedup_preserving_order<I>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    names
        .into_iter()
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

#[derive(Deserialize)]
struct JsonListing {
    tests: Vec<JsonTest>,
}

#[derive(Deserialize)]
struct JsonTest {
    name: String,
}

/// Parses a `{"tests": [{"name": ...}, ...]}` listing.
///
/// Text before the first `{` is skipped, since some tools print a banner
/// ahead of the document. Only the first document is read; anything after
/// it (stderr warnings in the combined output) is ignored.
pub(crate) fn parse_json_listing(output: &str) -> FrameworkResult<Vec<String>> {
    let start = output
        .find('{')
        .ok_or_else(|| FrameworkError::ParseError("no JSON object in output".to_string()))?;
    let listing: JsonListing = serde_json::Deserializer::from_str(&output[start..])
        .into_iter::<JsonListing>()
        .next()
        .ok_or_else(|| FrameworkError::ParseError("no JSON object in output".to_string()))?
        .map_err(|e| FrameworkError::ParseError(e.to_string()))?;
    Ok(dedup_preserving_order(
        listing.tests.into_iter().map(|t| t.name),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rerun_modifier_appends() {
        let modifier = RerunModifier {
            args: vec!["--rerun-failed".to_string()],
            env: vec![("RETRY".to_string(), "1".to_string())],
        };
        let cmd = modifier.apply(&Command::new("ctest").arg("-V"));
        assert_eq!(cmd.args, vec!["-V", "--rerun-failed"]);
        assert_eq!(cmd.env_value("RETRY"), Some("1"));
        assert!(RerunModifier::none().is_empty());
    }

    #[test]
    fn test_dedup_keeps_first() {
        let names = dedup_preserving_order(
            ["b", "a", "b", "c", "a"].into_iter().map(String::from),
        );
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_parse_json_listing_skips_banner() {
        let output = "ctest banner\n{\"kind\":\"ctestInfo\",\"tests\":[{\"name\":\"a\"},{\"name\":\"b\"},{\"name\":\"a\"}]}\n";
        assert_eq!(parse_json_listing(output).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_parse_json_listing_ignores_trailing_stderr() {
        let output = "{\"kind\":\"ctestInfo\",\"tests\":[{\"name\":\"a\"}]}\nCMake Warning: something\n";
        assert_eq!(parse_json_listing(output).unwrap(), vec!["a"]);
    }

    #[test]
    fn test_parse_json_listing_rejects_garbage() {
        assert!(matches!(
            parse_json_listing("nothing here"),
            Err(FrameworkError::ParseError(_))
        ));
        assert!(parse_json_listing("{\"tests\": 3}").is_err());
    }

    #[test]
    fn test_from_config_selects_framework() {
        let framework = from_config(&FrameworkConfig::default());
        assert_eq!(framework.name(), "ctest");
    }
}
