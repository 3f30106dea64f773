//! Configuration schema definitions for shardrun.
//!
//! Every section is optional; an empty file (or no file at all) yields a run
//! that discovers render nodes and shards `ctest` across them.
//!
//! ```text
//! Config (root)
//! ├── ShardrunConfig        - Strategy, retries, idle timeout
//! ├── WorkersConfig         - Tagged enum selecting device discovery
//! │   ├── RenderNodes       - Count /dev/dri/renderD* nodes
//! │   └── Static            - Fixed count or index list
//! ├── FrameworkConfig       - Tagged enum selecting the test framework
//! │   ├── Ctest             - CTest flags and JSON enumeration
//! │   ├── Gtest             - GoogleTest env sharding and filters
//! │   └── Template          - User-defined argument templates
//! └── ReportConfig          - Output files and summaries
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
///
/// # Example
///
/// ```
/// use shardrun::config::{Config, FrameworkConfig, Strategy};
///
/// let config: Config = toml::from_str(r#"
///     [shardrun]
///     strategy = "queue"
///     retries = 2
///
///     [workers]
///     type = "static"
///     count = 4
///
///     [framework]
///     type = "ctest"
///     command = "ctest --test-dir build"
/// "#).unwrap();
///
/// assert_eq!(config.shardrun.strategy, Strategy::Queue);
/// assert!(matches!(config.framework, FrameworkConfig::Ctest(_)));
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Core settings.
    #[serde(default)]
    pub shardrun: ShardrunConfig,

    /// How workers are discovered.
    #[serde(default)]
    pub workers: WorkersConfig,

    /// Which test framework integration builds the commands.
    #[serde(default)]
    pub framework: FrameworkConfig,

    /// Report outputs.
    #[serde(default)]
    pub report: ReportConfig,
}

/// Scheduling strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// One static shard per worker.
    #[default]
    Shard,
    /// Enumerate once, then workers pull single tests from a shared queue.
    Queue,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Shard => write!(f, "shard"),
            Strategy::Queue => write!(f, "queue"),
        }
    }
}

/// Core execution settings.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `strategy` | `shard` |
/// | `retries` | 3 |
/// | `idle_timeout_secs` | 1200 (20 minutes) |
/// | `stream_output` | true |
/// | `working_dir` | None (current directory) |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShardrunConfig {
    /// Scheduling strategy.
    #[serde(default)]
    pub strategy: Strategy,

    /// Extra attempts for a failing shard or test. 0 disables retries.
    #[serde(default = "default_retries")]
    pub retries: usize,

    /// Kill a command after this many seconds without output.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Mirror test output to the console while it runs.
    #[serde(default = "default_true")]
    pub stream_output: bool,

    /// Directory the test commands run in. `~` and `$VARS` are expanded.
    pub working_dir: Option<PathBuf>,
}

impl Default for ShardrunConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            retries: default_retries(),
            idle_timeout_secs: default_idle_timeout(),
            stream_output: true,
            working_dir: None,
        }
    }
}

fn default_retries() -> usize {
    3
}

fn default_idle_timeout() -> u64 {
    1200
}

fn default_true() -> bool {
    true
}

/// Worker discovery configuration.
///
/// ```toml
/// [workers]
/// type = "render-nodes"
/// dri_dir = "/dev/dri"
/// pin_env = ["HIP_VISIBLE_DEVICES", "HSA_VISIBLE_DEVICES"]
///
/// # or
/// [workers]
/// type = "static"
/// devices = [0, 2, 3]
/// pin_env = ["CUDA_VISIBLE_DEVICES"]
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkersConfig {
    /// One worker per DRM render node.
    RenderNodes(RenderNodeWorkersConfig),
    /// A fixed set of device indices.
    Static(StaticWorkersConfig),
}

impl Default for WorkersConfig {
    fn default() -> Self {
        WorkersConfig::RenderNodes(RenderNodeWorkersConfig::default())
    }
}

/// Settings for render-node discovery.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RenderNodeWorkersConfig {
    /// Directory holding `renderD*` nodes.
    #[serde(default = "default_dri_dir")]
    pub dri_dir: PathBuf,

    /// Variables set to the device index for each worker.
    #[serde(default = "default_pin_env")]
    pub pin_env: Vec<String>,
}

impl Default for RenderNodeWorkersConfig {
    fn default() -> Self {
        Self {
            dri_dir: default_dri_dir(),
            pin_env: default_pin_env(),
        }
    }
}

/// Settings for static discovery.
///
/// `devices` wins over `count` when both are present.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StaticWorkersConfig {
    /// Number of workers, indexed `0..count`.
    pub count: Option<u32>,

    /// Explicit device indices.
    #[serde(default)]
    pub devices: Vec<u32>,

    /// Variables set to the device index for each worker.
    #[serde(default = "default_pin_env")]
    pub pin_env: Vec<String>,
}

fn default_dri_dir() -> PathBuf {
    PathBuf::from("/dev/dri")
}

/// Pinning variables understood by the ROCm/HIP runtime.
pub fn default_pin_env() -> Vec<String> {
    vec![
        "HIP_VISIBLE_DEVICES".to_string(),
        "HSA_VISIBLE_DEVICES".to_string(),
    ]
}

/// Test framework configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FrameworkConfig {
    /// CTest.
    Ctest(CtestConfig),
    /// A GoogleTest binary.
    Gtest(GtestConfig),
    /// Anything else, described with argument templates.
    Template(TemplateConfig),
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        FrameworkConfig::Ctest(CtestConfig::default())
    }
}

impl FrameworkConfig {
    /// Short name of the selected framework.
    pub fn name(&self) -> &'static str {
        match self {
            FrameworkConfig::Ctest(_) => "ctest",
            FrameworkConfig::Gtest(_) => "gtest",
            FrameworkConfig::Template(_) => "template",
        }
    }

    /// The base command string.
    pub fn command(&self) -> &str {
        match self {
            FrameworkConfig::Ctest(c) => &c.command,
            FrameworkConfig::Gtest(c) => &c.command,
            FrameworkConfig::Template(c) => &c.command,
        }
    }

    /// Extra environment for every invocation.
    pub fn env(&self) -> &BTreeMap<String, String> {
        match self {
            FrameworkConfig::Ctest(c) => &c.env,
            FrameworkConfig::Gtest(c) => &c.env,
            FrameworkConfig::Template(c) => &c.env,
        }
    }
}

/// CTest integration settings.
///
/// ```toml
/// [framework]
/// type = "ctest"
/// command = "ctest --test-dir build --output-on-failure"
/// junit_per_shard = true
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CtestConfig {
    /// Base command; shard and filter flags are appended to it.
    #[serde(default = "default_ctest_command")]
    pub command: String,

    /// Extra environment for every invocation.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Ask CTest to write `report_<worker>.xml` for each shard.
    #[serde(default)]
    pub junit_per_shard: bool,
}

impl Default for CtestConfig {
    fn default() -> Self {
        Self {
            command: default_ctest_command(),
            env: BTreeMap::new(),
            junit_per_shard: false,
        }
    }
}

fn default_ctest_command() -> String {
    "ctest".to_string()
}

/// GoogleTest integration settings.
///
/// ```toml
/// [framework]
/// type = "gtest"
/// command = "./build/bin/unit_tests --gtest_brief=1"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GtestConfig {
    /// The test binary plus any fixed arguments.
    pub command: String,

    /// Extra environment for every invocation.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Output format of a template framework's enumeration command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnumerationFormat {
    /// `{"tests": [{"name": "..."}, ...]}`
    #[default]
    Json,
    /// One test name per line; blank lines and `#` comments ignored.
    Lines,
}

/// Template framework settings.
///
/// Placeholders: `{index}` (0-based shard), `{index1}` (1-based shard),
/// `{total}` (shard count), `{test}` (one test name).
///
/// ```toml
/// [framework]
/// type = "template"
/// command = "./run_suite.sh"
/// shard_args = ["--shard", "{index}/{total}"]
/// rerun_args = ["--only-failed"]
/// enumerate_args = ["--list"]
/// enumeration_format = "lines"
/// run_one_args = ["--filter", "{test}"]
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TemplateConfig {
    /// Base command.
    pub command: String,

    /// Extra environment for every invocation.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Arguments selecting one shard.
    #[serde(default)]
    pub shard_args: Vec<String>,

    /// Environment selecting one shard.
    #[serde(default)]
    pub shard_env: BTreeMap<String, String>,

    /// Arguments appended on retry attempts.
    #[serde(default)]
    pub rerun_args: Vec<String>,

    /// Arguments that turn the base command into a dry-run listing.
    #[serde(default)]
    pub enumerate_args: Vec<String>,

    /// How to parse the listing.
    #[serde(default)]
    pub enumeration_format: EnumerationFormat,

    /// Arguments selecting exactly one test.
    #[serde(default)]
    pub run_one_args: Vec<String>,
}

/// Report configuration.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `output_dir` | `test-results` |
/// | `title` | `Test Report` |
/// | `markdown` / `markdown_file` | true / `report.md` |
/// | `junit` / `junit_file` | true / `junit.xml` |
/// | `json` / `json_file` | false / `verdict.json` |
/// | `github_step_summary` | true (only used when `$GITHUB_STEP_SUMMARY` is set) |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportConfig {
    /// Directory for report files.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Report title.
    #[serde(default = "default_title")]
    pub title: String,

    /// Write a Markdown table.
    #[serde(default = "default_true")]
    pub markdown: bool,

    /// Markdown file name inside `output_dir`.
    #[serde(default = "default_markdown_file")]
    pub markdown_file: PathBuf,

    /// Write JUnit XML.
    #[serde(default = "default_true")]
    pub junit: bool,

    /// JUnit file name inside `output_dir`.
    #[serde(default = "default_junit_file")]
    pub junit_file: PathBuf,

    /// Write the verdict as JSON.
    #[serde(default)]
    pub json: bool,

    /// JSON file name inside `output_dir`.
    #[serde(default = "default_json_file")]
    pub json_file: PathBuf,

    /// Append the Markdown table to `$GITHUB_STEP_SUMMARY`.
    #[serde(default = "default_true")]
    pub github_step_summary: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            title: default_title(),
            markdown: true,
            markdown_file: default_markdown_file(),
            junit: true,
            junit_file: default_junit_file(),
            json: false,
            json_file: default_json_file(),
            github_step_summary: true,
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("test-results")
}

fn default_title() -> String {
    "Test Report".to_string()
}

fn default_markdown_file() -> PathBuf {
    PathBuf::from("report.md")
}

fn default_junit_file() -> PathBuf {
    PathBuf::from("junit.xml")
}

fn default_json_file() -> PathBuf {
    PathBuf::from("verdict.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.shardrun.strategy, Strategy::Shard);
        assert_eq!(config.shardrun.retries, 3);
        assert_eq!(config.shardrun.idle_timeout_secs, 1200);
        assert!(matches!(config.workers, WorkersConfig::RenderNodes(_)));
        assert_eq!(config.framework.command(), "ctest");
        assert!(config.report.junit);
        assert!(!config.report.json);
    }

    #[test]
    fn test_static_workers_parse() {
        let config: Config = toml::from_str(
            r#"
            [workers]
            type = "static"
            devices = [1, 3]
            pin_env = ["CUDA_VISIBLE_DEVICES"]
            "#,
        )
        .unwrap();

        match config.workers {
            WorkersConfig::Static(cfg) => {
                assert_eq!(cfg.devices, vec![1, 3]);
                assert_eq!(cfg.pin_env, vec!["CUDA_VISIBLE_DEVICES"]);
            }
            other => panic!("unexpected workers config: {:?}", other),
        }
    }

    #[test]
    fn test_template_framework_parse() {
        let config: Config = toml::from_str(
            r#"
            [framework]
            type = "template"
            command = "./suite"
            shard_args = ["--shard={index1}/{total}"]
            enumeration_format = "lines"
            run_one_args = ["--only", "{test}"]
            "#,
        )
        .unwrap();

        match config.framework {
            FrameworkConfig::Template(cfg) => {
                assert_eq!(cfg.enumeration_format, EnumerationFormat::Lines);
                assert_eq!(cfg.run_one_args, vec!["--only", "{test}"]);
                assert!(cfg.rerun_args.is_empty());
            }
            other => panic!("unexpected framework config: {:?}", other),
        }
    }

    #[test]
    fn test_gtest_requires_command() {
        let result: Result<Config, _> = toml::from_str(
            r#"
            [framework]
            type = "gtest"
            "#,
        );
        assert!(result.is_err());
    }
}
