//! Error types for agentbox-sandbox
//!
//! These errors stay inside the crate for everything except backend
//! construction. Capability-set operations turn them into result objects.

use thiserror::Error;

/// Sandbox error type
#[derive(Debug, Error)]
pub enum Error {
    /// Path resolves outside the backend root
    #[error("path '{0}' is outside the root directory")]
    PathOutsideRoot(String),

    /// Path is malformed or uses a forbidden form
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Timeout
    #[error("timeout after {0}ms")]
    Timeout(u64),

    /// Container lifecycle failure (pull, create, start)
    #[error("container error: {0}")]
    Container(String),

    /// Docker daemon or CLI not reachable
    #[error("docker unavailable: {0}")]
    DockerUnavailable(String),

    /// Archive packing or unpacking failure
    #[error("archive error: {0}")]
    Archive(String),

    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
