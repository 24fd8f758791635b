//! User configuration management
//!
//! Config lives at `~/.config/sandlink/config.toml`. The `[provision]` table
//! doubles as the provisioning configuration: the readiness cache compares
//! marker mtimes against this file, so editing it forces re-provisioning on
//! the next connect.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[serde(default)]
    pub provision: ProvisionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Control-plane CLI binary.
    #[serde(default = "default_sandbox_bin")]
    pub bin: String,

    /// SSH user inside the sandbox.
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,

    /// Directory inside the sandbox that mirrors the local root.
    #[serde(default = "default_remote_root")]
    pub remote_root: String,

    /// Service port inside the sandbox that the tunnel targets (sshd).
    #[serde(default = "default_remote_port")]
    pub remote_port: u16,

    #[serde(default = "default_create_attempts")]
    pub create_attempts: u32,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            bin: default_sandbox_bin(),
            ssh_user: default_ssh_user(),
            remote_root: default_remote_root(),
            remote_port: default_remote_port(),
            create_attempts: default_create_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// How long to wait for a new session to reach "watching" before giving
    /// up and letting it finish scanning in the background.
    #[serde(default = "default_create_timeout")]
    pub create_timeout_secs: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_flush_timeout")]
    pub flush_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            create_timeout_secs: default_create_timeout(),
            poll_interval_ms: default_poll_interval(),
            flush_timeout_secs: default_flush_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Seconds the grace watcher waits for a reconnecting client before
    /// tearing shared infrastructure down.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            grace_secs: default_grace_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisionConfig {
    /// Sandbox image, if the control plane supports choosing one.
    #[serde(default)]
    pub image: Option<String>,

    /// Shell commands run inside the sandbox on first connect.
    #[serde(default)]
    pub steps: Vec<String>,
}

fn default_sandbox_bin() -> String {
    "sb".to_string()
}

fn default_ssh_user() -> String {
    "dev".to_string()
}

fn default_remote_root() -> String {
    "/workspace".to_string()
}

fn default_remote_port() -> u16 {
    22
}

fn default_create_attempts() -> u32 {
    5
}

fn default_create_timeout() -> u64 {
    120
}

fn default_poll_interval() -> u64 {
    500
}

fn default_flush_timeout() -> u64 {
    30
}

fn default_grace_secs() -> u64 {
    30
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::path()?;
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Path to config.toml. This file's mtime governs readiness-cache
    /// invalidation.
    pub fn path() -> Result<PathBuf> {
        Ok(config_dir()?.join("config.toml"))
    }
}

pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("SANDLINK_CONFIG_DIR") {
        return Ok(PathBuf::from(dir));
    }
    let base = dirs::config_dir().ok_or_else(|| anyhow!("Cannot find config directory"))?;
    Ok(base.join("sandlink"))
}

/// Root for all coordination state: the per-resource registry directories
/// and readiness markers.
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("SANDLINK_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    let base = dirs::data_local_dir().ok_or_else(|| anyhow!("Cannot find data directory"))?;
    Ok(base.join("sandlink"))
}
