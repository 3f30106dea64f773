//! shardrun: a multi-worker test orchestrator.
//!
//! shardrun distributes an externally defined test collection (a CTest
//! tree, a GoogleTest binary, or any command described by templates)
//! across the devices of one host, captures every worker's output, retries
//! failures to absorb flakiness, and aggregates a single verdict.
//!
//! # Architecture
//!
//! The main components, leaves first:
//!
//! - **Command / CommandRunner**: typed commands and a deadlock-free runner
//!   with an idle timeout ([`command`], [`runner`])
//! - **Worker / WorkerPool**: one execution context per device, discovered
//!   once per run ([`worker`])
//! - **TestFramework**: flag and environment syntax for sharding,
//!   re-running, enumerating and filtering ([`framework`])
//! - **Retry**: the attempt state machine both strategies share ([`retry`])
//! - **Schedulers**: static shards or a shared test queue ([`scheduler`])
//! - **Reports**: verdict aggregation, console, Markdown, JUnit and JSON
//!   output ([`report`])
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use shardrun::config::load_config_str;
//! use shardrun::orchestrator::Orchestrator;
//! use shardrun::report::NullReporter;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config_str(r#"
//!         [shardrun]
//!         strategy = "queue"
//!
//!         [framework]
//!         type = "gtest"
//!         command = "./build/bin/unit_tests"
//!     "#)?;
//!
//!     let verdict = Orchestrator::new(config, Arc::new(NullReporter)).run().await?;
//!     std::process::exit(verdict.exit_code());
//! }
//! ```

pub mod command;
pub mod config;
pub mod framework;
pub mod orchestrator;
pub mod report;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod worker;

// Re-export commonly used types
pub use command::{Command, CommandResult};
pub use config::{Config, Strategy, load_config};
pub use framework::TestFramework;
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use report::{ItemOutcome, Reporter, RunVerdict, TerminalState};
pub use runner::CommandRunner;
pub use worker::{Worker, WorkerPool};
