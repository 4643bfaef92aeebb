//! Configuration file handling.
//!
//! Configuration is stored as TOML in the platform config directory:
//! - Linux: `~/.config/filebridge/config.toml`
//! - macOS: `~/Library/Application Support/filebridge/config.toml`
//! - Windows: `%APPDATA%/filebridge/config.toml`

use std::path::{Path, PathBuf};

use anyhow::Context;
use filebridge_host::HostConfig;

/// Loads `path`, or the default location when `None`.
pub fn load(path: Option<&Path>) -> anyhow::Result<HostConfig> {
    match path {
        Some(path) => load_from(path),
        None => load_from(&default_path()?),
    }
}

/// Reads the file, writing the defaults first if it does not exist.
pub fn load_from(path: &Path) -> anyhow::Result<HostConfig> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    } else {
        let config = HostConfig::default();
        save(&config, path)?;
        Ok(config)
    }
}

pub fn save(config: &HostConfig, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;

    tracing::debug!(path = %path.display(), "configuration saved");
    Ok(())
}

fn default_path() -> anyhow::Result<PathBuf> {
    let dir = dirs::config_dir().context("no configuration directory for this platform")?;
    Ok(dir.join("filebridge").join("config.toml"))
}
