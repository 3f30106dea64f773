//! Top-level run orchestration.
//!
//! The [`Orchestrator`] wires configuration to the rest of the crate:
//!
//! ```text
//!   Config ──► DeviceDiscoverer ──► WorkerPool
//!     │                                 │
//!     ├──► TestFramework                │
//!     ├──► base Command ────────────────┤
//!     │                                 ▼
//!     │                  run_sharded / run_queued ──► Reporter
//!     │                                 │
//!     └─────────────────────────────────┴──► RunVerdict ──► exit code
//! ```
//!
//! Structural errors (no workers, an empty or unparsable base command, a
//! failed enumeration) abort the run before anything executes in parallel
//! and surface as [`OrchestratorError`]. Every other failure ends up in
//! the verdict.

use std::sync::Arc;
use std::time::Duration;

use crate::command::{Command, CommandError};
use crate::config::{self, Config, Strategy, WorkersConfig};
use crate::framework::{self, TestFramework};
use crate::report::{Reporter, RunVerdict};
use crate::runner::{CommandRunner, OutputCallback};
use crate::scheduler::{self, SchedulerError};
use crate::worker::{
    DeviceDiscoverer, DiscoveryError, RenderNodeDiscoverer, StaticDiscoverer, WorkerPool,
};

/// Result type for orchestration.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Structural failures that abort a run.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// No usable workers.
    #[error("Worker discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    /// The base command is empty or could not be parsed.
    #[error("Invalid base command: {0}")]
    Command(#[from] CommandError),

    /// Test enumeration failed.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// A configured value could not be resolved.
    #[error("Invalid configuration: {0:#}")]
    Config(anyhow::Error),
}

/// Coordinates one run from configuration to verdict.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use shardrun::config::load_config;
/// use shardrun::orchestrator::Orchestrator;
/// use shardrun::report::ConsoleReporter;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = load_config(std::path::Path::new("shardrun.toml"))?;
///     let reporter = Arc::new(ConsoleReporter::new("GPU Tests", false));
///
///     let verdict = Orchestrator::new(config, reporter).run().await?;
///     std::process::exit(verdict.exit_code());
/// }
/// ```
pub struct Orchestrator {
    config: Config,
    reporter: Arc<dyn Reporter>,
    command_override: Option<Vec<String>>,
    output_callback: Option<OutputCallback>,
}

impl Orchestrator {
    /// Creates an orchestrator for `config`.
    pub fn new(config: Config, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            config,
            reporter,
            command_override: None,
            output_callback: None,
        }
    }

    /// Uses `argv` as the base command instead of the configured string.
    pub fn with_command(mut self, argv: Vec<String>) -> Self {
        self.command_override = Some(argv);
        self
    }

    /// Mirrors captured output through `callback` when streaming is on.
    pub fn with_output_callback(mut self, callback: OutputCallback) -> Self {
        self.output_callback = Some(callback);
        self
    }

    /// The effective configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The command runner every worker shares.
    pub fn runner(&self) -> CommandRunner {
        let runner = CommandRunner::new(Duration::from_secs(self.config.shardrun.idle_timeout_secs));
        match &self.output_callback {
            Some(callback) if self.config.shardrun.stream_output => {
                runner.with_output_callback(Arc::clone(callback))
            }
            _ => runner,
        }
    }

    /// The discovery backend selected by `[workers]`.
    pub fn discoverer(&self) -> Box<dyn DeviceDiscoverer> {
        match &self.config.workers {
            WorkersConfig::RenderNodes(cfg) => Box::new(RenderNodeDiscoverer::new(cfg.clone())),
            WorkersConfig::Static(cfg) => Box::new(StaticDiscoverer::new(cfg.clone())),
        }
    }

    /// The framework integration selected by `[framework]`.
    pub fn framework(&self) -> Arc<dyn TestFramework> {
        framework::from_config(&self.config.framework)
    }

    /// Discovers the worker pool.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Discovery`] if no workers are available.
    pub async fn discover_workers(&self) -> OrchestratorResult<WorkerPool> {
        let discoverer = self.discoverer();
        Ok(WorkerPool::discover(discoverer.as_ref(), self.runner()).await?)
    }

    /// Builds and validates the base command.
    ///
    /// The command gets the configured working directory (with `~` and
    /// `$VARS` expanded) and the framework's extra environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the command is empty or unparsable, or if the
    /// working directory cannot be expanded.
    pub fn base_command(&self) -> OrchestratorResult<Command> {
        let mut command = match &self.command_override {
            Some(argv) => Command::from_argv(argv.iter().cloned())?,
            None => Command::parse(self.config.framework.command())?,
        };

        if let Some(dir) = &self.config.shardrun.working_dir {
            let dir = config::expand_path(dir).map_err(OrchestratorError::Config)?;
            command = command.working_dir(dir);
        }

        command = command.envs(
            self.config
                .framework
                .env()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        command.validate()?;
        Ok(command)
    }

    /// Enumerates the tests queue mode would run, without running them.
    ///
    /// # Errors
    ///
    /// Returns a structural error if the pool, command or enumeration fails.
    pub async fn collect(&self) -> OrchestratorResult<Vec<String>> {
        let base = self.base_command()?;
        let pool = self.discover_workers().await?;
        let framework = self.framework();
        let worker = &pool.workers()[0];
        Ok(scheduler::enumerate_tests(worker, framework.as_ref(), &base).await?)
    }

    /// Runs one pass with the configured strategy.
    ///
    /// # Errors
    ///
    /// Only structural errors are returned; test failures are reported in
    /// the verdict.
    pub async fn run(&self) -> OrchestratorResult<RunVerdict> {
        let base = self.base_command()?;
        let pool = self.discover_workers().await?;
        let framework = self.framework();
        let settings = &self.config.shardrun;

        tracing::info!(
            "Starting {} run with {} on {} worker(s)",
            settings.strategy,
            framework.name(),
            pool.len()
        );

        let verdict = match settings.strategy {
            Strategy::Shard => {
                scheduler::run_sharded(
                    &pool,
                    framework,
                    &base,
                    settings.retries,
                    Arc::clone(&self.reporter),
                )
                .await
            }
            Strategy::Queue => {
                scheduler::run_queued(
                    &pool,
                    framework,
                    &base,
                    settings.retries,
                    Arc::clone(&self.reporter),
                )
                .await?
            }
        };

        if verdict.success {
            tracing::info!("Run {} passed in {:?}", verdict.run_id, verdict.duration);
        } else {
            tracing::error!(
                "Run {} failed: {} of {} item(s) did not pass",
                verdict.run_id,
                verdict.failed_items().count(),
                verdict.items.len()
            );
        }
        Ok(verdict)
    }
}
