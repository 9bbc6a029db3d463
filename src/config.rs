//! Configuration management for tunserve.
//!
//! Handles loading the optional `config.toml` from the platform config
//! directory (e.g. `~/.config/tunserve/config.toml`). Every key is
//! optional; command-line flags take precedence over anything here.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub tunnel: TunnelConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServerConfig {
    /// Address the static server binds to
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TunnelConfig {
    /// Base URL of the localtunnel server
    pub localtunnel_host: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ShutdownConfig {
    /// `"ctrl-c"` or a single character
    pub key: Option<String>,
    /// Window for the second confirmation press, in milliseconds
    pub window_ms: Option<u64>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("", "", "tunserve")
            .context("Could not determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }
}
