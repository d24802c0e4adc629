//! One backend per user or session

use crate::backend::SandboxBackend;
use crate::config::{DockerSandboxConfig, FilesystemSandboxConfig, StateSandboxConfig};
use crate::docker::DockerSandboxBackend;
use crate::error::{Error, Result};
use crate::filesystem::FilesystemSandboxBackend;
use crate::state::StateSandboxBackend;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

/// Which backend the factory builds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// [`FilesystemSandboxBackend`] rooted in a per-owner directory
    #[default]
    Filesystem,
    /// [`StateSandboxBackend`]
    State,
    /// [`DockerSandboxBackend`]
    Docker,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Filesystem => write!(f, "filesystem"),
            Self::State => write!(f, "state"),
            Self::Docker => write!(f, "docker"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "filesystem" | "fs" => Ok(Self::Filesystem),
            "state" | "memory" => Ok(Self::State),
            "docker" | "container" => Ok(Self::Docker),
            other => Err(Error::Config(format!("unknown backend kind '{}'", other))),
        }
    }
}

fn default_workspace_root() -> PathBuf {
    std::env::temp_dir().join("agentbox")
}

/// Per-owner roots are always jailed unless configured otherwise
fn default_filesystem() -> FilesystemSandboxConfig {
    FilesystemSandboxConfig::default().with_virtual_mode(true)
}

/// Settings for [`BackendFactory`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSettings {
    /// Backend to build
    #[serde(default)]
    pub kind: BackendKind,
    /// Parent of the per-owner filesystem roots
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    /// Filesystem backend template; `root_dir` is replaced per owner
    #[serde(default = "default_filesystem")]
    pub filesystem: FilesystemSandboxConfig,
    /// State backend settings
    #[serde(default)]
    pub state: StateSandboxConfig,
    /// Docker backend settings
    #[serde(default)]
    pub docker: DockerSandboxConfig,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            workspace_root: default_workspace_root(),
            filesystem: default_filesystem(),
            state: StateSandboxConfig::default(),
            docker: DockerSandboxConfig::default(),
        }
    }
}

/// Builds a fresh backend for an owner (user or session id)
#[derive(Debug, Clone)]
pub struct BackendFactory {
    settings: SandboxSettings,
}

impl BackendFactory {
    /// Create a factory
    #[must_use]
    pub fn new(settings: SandboxSettings) -> Self {
        Self { settings }
    }

    /// Settings in use
    #[must_use]
    pub fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    /// Build a backend for `owner_id`
    ///
    /// Infrastructure failures (no Docker daemon, image pull or container
    /// start failure) are returned here rather than on first use.
    pub async fn create(&self, owner_id: &str) -> Result<Box<dyn SandboxBackend>> {
        validate_owner_id(owner_id)?;

        let backend: Box<dyn SandboxBackend> = match self.settings.kind {
            BackendKind::Filesystem => {
                let config = FilesystemSandboxConfig {
                    root_dir: Some(self.settings.workspace_root.join(owner_id)),
                    ..self.settings.filesystem.clone()
                };
                Box::new(FilesystemSandboxBackend::new(config)?)
            }
            BackendKind::State => Box::new(StateSandboxBackend::new(self.settings.state.clone())),
            BackendKind::Docker => {
                let backend = DockerSandboxBackend::connect(self.settings.docker.clone()).await?;
                backend.ensure_container().await?;
                Box::new(backend)
            }
        };

        info!(
            owner_id = %owner_id,
            kind = %self.settings.kind,
            backend_id = %backend.id(),
            isolation = backend.isolation().display_name(),
            "Sandbox backend ready"
        );
        Ok(backend)
    }
}

/// Owner ids become directory names, so keep them to one plain segment
fn validate_owner_id(owner_id: &str) -> Result<()> {
    let valid = !owner_id.is_empty()
        && owner_id.len() <= 128
        && owner_id != "."
        && owner_id != ".."
        && owner_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidPath(format!("invalid owner id '{}'", owner_id)))
    }
}
