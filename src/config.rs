//! Configuration loading and schema definitions for shardrun.
//!
//! Configuration lives in an optional TOML file (`shardrun.toml` by
//! default). Command-line flags override individual values after loading.

pub mod schema;

pub use schema::*;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Loads configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not valid TOML, or does
/// not match the schema.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Loads configuration from a TOML string.
///
/// # Example
///
/// ```
/// use shardrun::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [shardrun]
///     retries = 1
/// "#)?;
///
/// assert_eq!(config.shardrun.retries, 1);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}

/// Loads `path` if it exists, otherwise falls back to defaults.
///
/// A missing file is only an error when the caller named it explicitly.
pub fn load_or_default(path: &Path, explicit: bool) -> Result<Config> {
    if path.exists() || explicit {
        return load_config(path);
    }
    tracing::debug!("No config at {}, using defaults", path.display());
    Ok(Config::default())
}

/// Expands `~` and environment variables in a configured path.
///
/// # Errors
///
/// Returns an error if the path references an unset variable.
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let raw = path.to_string_lossy();
    let expanded = shellexpand::full(&raw)
        .with_context(|| format!("Failed to expand path: {}", raw))?;
    Ok(PathBuf::from(expanded.into_owned()))
}
