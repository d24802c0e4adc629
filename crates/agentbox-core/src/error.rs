//! Error types for agentbox-core

use thiserror::Error;

/// Task registry error type
#[derive(Debug, Error)]
pub enum Error {
    /// A task is already running for this thread
    #[error("a task is already registered for thread '{0}'")]
    AlreadyRegistered(String),

    /// No task is registered for this thread
    #[error("no task registered for thread '{0}'")]
    NotFound(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
