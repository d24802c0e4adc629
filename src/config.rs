//! Configuration loading
//!
//! Embedded defaults, then optional files, then environment variables.

use agentbox_sandbox::SandboxSettings;
use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Embedded default configuration (compiled into binary)
pub const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

fn default_stop_grace_ms() -> u64 {
    2000
}

/// Task registry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSettings {
    /// Time a stopped generation gets before it is aborted
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            stop_grace_ms: default_stop_grace_ms(),
        }
    }
}

impl TaskSettings {
    /// Grace period as a [`Duration`]
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub sandbox: SandboxSettings,
    #[serde(default)]
    pub tasks: TaskSettings,
}

/// Load configuration from files and environment
pub fn load_config() -> Result<AppConfig> {
    let config = Config::builder()
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            File::with_name(&format!(
                "config/{}",
                std::env::var("AGENTBOX_ENV").unwrap_or_else(|_| "development".to_string())
            ))
            .required(false),
        )
        .add_source(File::with_name("config/local").required(false))
        // AGENTBOX_SANDBOX__KIND, not AGENTBOX__SANDBOX__KIND
        .add_source(
            Environment::with_prefix("AGENTBOX")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    config
        .try_deserialize()
        .context("Failed to deserialize configuration")
}
