//! Device discovery backends.
//!
//! Discovery runs once per orchestration run and produces the ordered list of
//! [`DeviceHandle`]s that become workers. It only enumerates; it never talks
//! to drivers.
//!
//! | Backend | Config `type` | Source |
//! |---------|---------------|--------|
//! | [`RenderNodeDiscoverer`] | `render-nodes` | `renderD*` nodes under `/dev/dri` |
//! | [`StaticDiscoverer`] | `static` | a fixed count or explicit index list |

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::DeviceHandle;
use crate::config::{RenderNodeWorkersConfig, StaticWorkersConfig};

/// Result type for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Errors that make a worker pool impossible to build.
///
/// All of these are fatal to a run: there is nothing to schedule against.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// No usable devices were found or configured.
    #[error("No devices available: {0}")]
    NoDevices(String),

    /// The same device index was configured twice.
    #[error("Device {0} listed more than once")]
    DuplicateDevice(u32),

    /// The device directory exists but could not be read.
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Enumerates the devices available to a run.
#[async_trait]
pub trait DeviceDiscoverer: Send + Sync {
    /// Returns the devices to build workers for, in a stable order.
    async fn discover(&self) -> DiscoveryResult<Vec<DeviceHandle>>;

    /// Environment variables used to pin a worker to its device index.
    fn pin_env(&self) -> &[String];

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

/// Counts DRM render nodes (`renderD128`, `renderD129`, ...).
///
/// With more than one node, each gets a pinned worker indexed by its
/// position in sorted order. With one node or none, the run uses a single
/// unpinned worker covering the whole host.
pub struct RenderNodeDiscoverer {
    config: RenderNodeWorkersConfig,
}

impl RenderNodeDiscoverer {
    /// Creates a discoverer from its configuration.
    pub fn new(config: RenderNodeWorkersConfig) -> Self {
        Self { config }
    }

    fn render_nodes(dir: &Path) -> DiscoveryResult<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(DiscoveryError::Io {
                    path: dir.to_path_buf(),
                    source,
                });
            }
        };

        let mut nodes: Vec<PathBuf> = entries
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::debug!("Skipping unreadable entry in {}: {}", dir.display(), e);
                    None
                }
            })
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("renderD"))
            .map(|entry| entry.path())
            .collect();
        nodes.sort();
        Ok(nodes)
    }
}

#[async_trait]
impl DeviceDiscoverer for RenderNodeDiscoverer {
    async fn discover(&self) -> DiscoveryResult<Vec<DeviceHandle>> {
        let nodes = Self::render_nodes(&self.config.dri_dir)?;
        tracing::debug!(
            "Found {} render node(s) under {}",
            nodes.len(),
            self.config.dri_dir.display()
        );

        if nodes.len() <= 1 {
            let handle = match nodes.into_iter().next() {
                Some(path) => DeviceHandle::host().with_path(path),
                None => DeviceHandle::host(),
            };
            return Ok(vec![handle]);
        }

        Ok(nodes
            .into_iter()
            .zip(0u32..)
            .map(|(path, index)| DeviceHandle::pinned(index).with_path(path))
            .collect())
    }

    fn pin_env(&self) -> &[String] {
        &self.config.pin_env
    }

    fn name(&self) -> &'static str {
        "render-nodes"
    }
}

/// A fixed set of device indices from configuration.
pub struct StaticDiscoverer {
    config: StaticWorkersConfig,
}

impl StaticDiscoverer {
    /// Creates a discoverer from its configuration.
    pub fn new(config: StaticWorkersConfig) -> Self {
        Self { config }
    }

    /// `count` pinned workers with indices `0..count`.
    pub fn with_count(count: u32, pin_env: Vec<String>) -> Self {
        Self::new(StaticWorkersConfig {
            count: Some(count),
            devices: Vec::new(),
            pin_env,
        })
    }
}

#[async_trait]
impl DeviceDiscoverer for StaticDiscoverer {
    async fn discover(&self) -> DiscoveryResult<Vec<DeviceHandle>> {
        let indices: Vec<u32> = if !self.config.devices.is_empty() {
            let mut seen = HashSet::new();
            for &index in &self.config.devices {
                if !seen.insert(index) {
                    return Err(DiscoveryError::DuplicateDevice(index));
                }
            }
            self.config.devices.clone()
        } else {
            (0..self.config.count.unwrap_or(0)).collect()
        };

        if indices.is_empty() {
            return Err(DiscoveryError::NoDevices(
                "static worker config has count = 0 and no devices".to_string(),
            ));
        }

        Ok(indices.into_iter().map(DeviceHandle::pinned).collect())
    }

    fn pin_env(&self) -> &[String] {
        &self.config.pin_env
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Hostname of this machine, used as every worker's host identity.
pub fn host_identity() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok().filter(|s| !s.is_empty()))
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_pin_env;

    fn render_config(dir: &Path) -> RenderNodeWorkersConfig {
        RenderNodeWorkersConfig {
            dri_dir: dir.to_path_buf(),
            pin_env: default_pin_env(),
        }
    }

    #[tokio::test]
    async fn test_render_nodes_pin_each_device() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["card0", "card1", "renderD129", "renderD128"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }

        let devices = RenderNodeDiscoverer::new(render_config(dir.path()))
            .discover()
            .await
            .unwrap();

        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].index, Some(0));
        assert_eq!(devices[1].index, Some(1));
        assert_eq!(devices[0].path, Some(dir.path().join("renderD128")));
    }

    #[tokio::test]
    async fn test_single_render_node_uses_host_worker() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("renderD128"), "").unwrap();

        let devices = RenderNodeDiscoverer::new(render_config(dir.path()))
            .discover()
            .await
            .unwrap();

        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].index, None);
    }

    #[tokio::test]
    async fn test_missing_dri_dir_falls_back_to_host() {
        let dir = tempfile::tempdir().unwrap();
        let devices = RenderNodeDiscoverer::new(render_config(&dir.path().join("absent")))
            .discover()
            .await
            .unwrap();
        assert_eq!(devices, vec![DeviceHandle::host()]);
    }

    #[tokio::test]
    async fn test_static_explicit_devices() {
        let discoverer = StaticDiscoverer::new(StaticWorkersConfig {
            count: None,
            devices: vec![3, 1],
            pin_env: default_pin_env(),
        });
        let devices = discoverer.discover().await.unwrap();
        assert_eq!(
            devices,
            vec![DeviceHandle::pinned(3), DeviceHandle::pinned(1)]
        );
    }

    #[tokio::test]
    async fn test_static_rejects_empty_and_duplicates() {
        let empty = StaticDiscoverer::with_count(0, default_pin_env());
        assert!(matches!(
            empty.discover().await,
            Err(DiscoveryError::NoDevices(_))
        ));

        let dup = StaticDiscoverer::new(StaticWorkersConfig {
            count: None,
            devices: vec![0, 0],
            pin_env: default_pin_env(),
        });
        assert!(matches!(
            dup.discover().await,
            Err(DiscoveryError::DuplicateDevice(0))
        ));
    }
}
