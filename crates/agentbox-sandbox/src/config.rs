//! Backend configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default command output budget in characters
pub const DEFAULT_MAX_OUTPUT_SIZE: usize = 100_000;

/// Default command timeout in seconds
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

/// Default maximum readable file size in megabytes
pub const DEFAULT_MAX_FILE_SIZE_MB: u64 = 10;

fn default_max_output_size() -> usize {
    DEFAULT_MAX_OUTPUT_SIZE
}

fn default_command_timeout_secs() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}

fn default_max_file_size_mb() -> u64 {
    DEFAULT_MAX_FILE_SIZE_MB
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Network Mode
// ============================================================================

/// Network mode for the sandbox container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// No network access (most secure, default)
    #[default]
    None,
    /// Bridge network (outbound access)
    Bridge,
    /// Host network (least secure, not recommended)
    Host,
}

impl NetworkMode {
    /// Convert to Docker network mode string
    #[must_use]
    pub fn as_docker_arg(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bridge => "bridge",
            Self::Host => "host",
        }
    }
}

// ============================================================================
// Filesystem backend
// ============================================================================

/// Configuration for [`crate::FilesystemSandboxBackend`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesystemSandboxConfig {
    /// Root directory; the process working directory when unset
    #[serde(default)]
    pub root_dir: Option<PathBuf>,
    /// Confine every path argument to `root_dir`
    #[serde(default)]
    pub virtual_mode: bool,
    /// Files larger than this are not read
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    /// Command output budget in characters
    #[serde(default = "default_max_output_size")]
    pub max_output_size: usize,
    /// Command timeout in seconds
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl Default for FilesystemSandboxConfig {
    fn default() -> Self {
        Self {
            root_dir: None,
            virtual_mode: false,
            max_file_size_mb: DEFAULT_MAX_FILE_SIZE_MB,
            max_output_size: DEFAULT_MAX_OUTPUT_SIZE,
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
        }
    }
}

impl FilesystemSandboxConfig {
    /// Config rooted at `root_dir`
    #[must_use]
    pub fn rooted(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: Some(root_dir.into()),
            ..Self::default()
        }
    }

    /// Enable or disable virtual mode
    #[must_use]
    pub fn with_virtual_mode(mut self, enabled: bool) -> Self {
        self.virtual_mode = enabled;
        self
    }

    /// Set the output budget
    #[must_use]
    pub fn with_max_output_size(mut self, chars: usize) -> Self {
        self.max_output_size = chars;
        self
    }

    /// Set the command timeout
    #[must_use]
    pub fn with_command_timeout_secs(mut self, secs: u64) -> Self {
        self.command_timeout_secs = secs;
        self
    }

    /// Maximum readable file size in bytes
    #[must_use]
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

// ============================================================================
// State backend
// ============================================================================

/// Configuration for [`crate::StateSandboxBackend`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSandboxConfig {
    /// Command output budget in characters
    #[serde(default = "default_max_output_size")]
    pub max_output_size: usize,
    /// Command timeout in seconds
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl Default for StateSandboxConfig {
    fn default() -> Self {
        Self {
            max_output_size: DEFAULT_MAX_OUTPUT_SIZE,
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
        }
    }
}

// ============================================================================
// Docker backend
// ============================================================================

/// Configuration for [`crate::DockerSandboxBackend`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerSandboxConfig {
    /// Image to run
    #[serde(default = "default_image")]
    pub image: String,
    /// Memory limit in Docker notation (e.g. "512m", "1g")
    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,
    /// CPU quota in microseconds per 100ms period (50000 = half a core)
    #[serde(default = "default_cpu_quota")]
    pub cpu_quota: i64,
    /// Container network mode
    #[serde(default)]
    pub network_mode: NetworkMode,
    /// Working directory inside the container
    #[serde(default = "default_working_dir")]
    pub working_dir: String,
    /// Let the daemon remove the container once it stops
    #[serde(default = "default_true")]
    pub auto_remove: bool,
    /// Command output budget in characters
    #[serde(default = "default_max_output_size")]
    pub max_output_size: usize,
    /// Command timeout in seconds
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    /// Grace period for `docker stop` in seconds
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
    /// Docker CLI binary
    #[serde(default = "default_docker_binary")]
    pub docker_binary: String,
}

fn default_image() -> String {
    "python:3.12-slim".to_string()
}

fn default_memory_limit() -> String {
    "512m".to_string()
}

fn default_cpu_quota() -> i64 {
    50_000
}

fn default_working_dir() -> String {
    "/workspace".to_string()
}

fn default_stop_timeout_secs() -> u64 {
    5
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

impl Default for DockerSandboxConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            memory_limit: default_memory_limit(),
            cpu_quota: default_cpu_quota(),
            network_mode: NetworkMode::None,
            working_dir: default_working_dir(),
            auto_remove: true,
            max_output_size: DEFAULT_MAX_OUTPUT_SIZE,
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            stop_timeout_secs: default_stop_timeout_secs(),
            docker_binary: default_docker_binary(),
        }
    }
}

impl DockerSandboxConfig {
    /// Arguments for `docker create` carrying the resource limits
    #[must_use]
    pub fn to_create_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--memory={}", self.memory_limit),
            format!("--cpu-quota={}", self.cpu_quota),
            "--cpu-period=100000".to_string(),
            format!("--network={}", self.network_mode.as_docker_arg()),
            format!("--workdir={}", self.working_dir),
        ];

        if self.auto_remove {
            args.push("--rm".to_string());
        }

        args
    }
}
