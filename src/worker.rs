//! Workers and the worker pool.
//!
//! A [`Worker`] is one exclusive execution context bound to a single device.
//! It delegates to a [`CommandRunner`] and scopes every command it runs to
//! its device by injecting pinning environment variables (for example
//! `HIP_VISIBLE_DEVICES=2`). A [`WorkerPool`] is the ordered set of workers
//! discovered once at the start of a run; its size is the default degree of
//! parallelism for both scheduling strategies.
//!
//! Workers are immutable after discovery. The schedulers hand each worker to
//! exactly one task for the duration of a pass; the worker itself holds no
//! shared mutable state.
//!
//! ```text
//!   DeviceDiscoverer ──discover()──► Vec<DeviceHandle>
//!                                          │
//!                                          ▼
//!                          WorkerPool [gpu0, gpu1, ..., gpuN-1]
//!                                          │
//!                      worker.run(cmd) ────┴──► CommandRunner (pinned env)
//! ```

pub mod discovery;

use std::path::PathBuf;

use serde::Serialize;

use crate::command::{Command, CommandResult};
use crate::runner::{CommandRunner, RunnerResult};

pub use discovery::{
    DeviceDiscoverer, DiscoveryError, DiscoveryResult, RenderNodeDiscoverer, StaticDiscoverer,
};

/// The device a worker is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceHandle {
    /// Device index used for pinning. `None` means the whole host: no
    /// pinning variables are injected.
    pub index: Option<u32>,

    /// Device node backing this handle, if discovery found one.
    pub path: Option<PathBuf>,
}

impl DeviceHandle {
    /// A handle pinned to device `index`.
    pub fn pinned(index: u32) -> Self {
        Self {
            index: Some(index),
            path: None,
        }
    }

    /// A handle covering the whole host.
    pub fn host() -> Self {
        Self {
            index: None,
            path: None,
        }
    }

    /// Attaches the device node path.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// One exclusive execution context.
#[derive(Debug, Clone)]
pub struct Worker {
    id: String,
    device: DeviceHandle,
    host: String,
    pin_env: Vec<(String, String)>,
    runner: CommandRunner,
}

impl Worker {
    /// Creates a worker for `device`, pinning it through each variable in
    /// `pin_vars`.
    pub fn new(
        device: DeviceHandle,
        host: impl Into<String>,
        pin_vars: &[String],
        runner: CommandRunner,
    ) -> Self {
        let (id, pin_env) = match device.index {
            Some(index) => (
                format!("gpu{}", index),
                pin_vars
                    .iter()
                    .map(|var| (var.clone(), index.to_string()))
                    .collect(),
            ),
            None => ("host".to_string(), Vec::new()),
        };
        Self {
            id,
            device,
            host: host.into(),
            pin_env,
            runner,
        }
    }

    /// Stable identifier, e.g. `gpu3` or `host`.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The device this worker is bound to.
    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    /// Hostname of the machine the worker runs on.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Environment injected into every command this worker runs.
    pub fn pin_env(&self) -> &[(String, String)] {
        &self.pin_env
    }

    /// Scopes `command` to this worker's device.
    ///
    /// Pinning variables are appended after the caller's overrides so the
    /// worker's device selection always wins.
    pub fn scope(&self, command: &Command) -> Command {
        command.clone().envs(self.pin_env.iter().cloned())
    }

    /// Runs `command` on this worker's device.
    pub async fn run(&self, command: &Command) -> RunnerResult<CommandResult> {
        self.runner.run(&self.scope(command), &self.id).await
    }
}

/// The discovered set of workers for one run.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    workers: Vec<Worker>,
}

impl WorkerPool {
    /// Discovers devices and builds one worker per device.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] if enumeration fails or yields no devices.
    pub async fn discover(
        discoverer: &dyn DeviceDiscoverer,
        runner: CommandRunner,
    ) -> DiscoveryResult<Self> {
        let devices = discoverer.discover().await?;
        let host = discovery::host_identity();
        let workers = devices
            .into_iter()
            .map(|device| Worker::new(device, host.clone(), discoverer.pin_env(), runner.clone()))
            .collect();
        let pool = Self::from_workers(workers)?;

        tracing::info!(
            "Discovered {} worker(s) on {} via {}: {}",
            pool.len(),
            host,
            discoverer.name(),
            pool.ids().join(", ")
        );
        Ok(pool)
    }

    /// Builds a pool from already-constructed workers.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::NoDevices`] if `workers` is empty.
    pub fn from_workers(workers: Vec<Worker>) -> DiscoveryResult<Self> {
        if workers.is_empty() {
            return Err(DiscoveryError::NoDevices(
                "worker pool would be empty".to_string(),
            ));
        }
        Ok(Self { workers })
    }

    /// Number of workers, the default degree of parallelism.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Always `false`: a pool holds at least one worker.
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Workers in discovery order.
    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    /// Worker ids in discovery order.
    pub fn ids(&self) -> Vec<&str> {
        self.workers.iter().map(Worker::id).collect()
    }
}
