//! agentbox sandbox - file and command backends for agent tool calls
//!
//! This crate provides one capability set over three isolation tiers:
//! - [`FilesystemSandboxBackend`]: a real directory, optionally jailed
//! - [`StateSandboxBackend`]: in-memory files, host shell
//! - [`DockerSandboxBackend`]: a dedicated container
//!
//! Every operation reports failure inside its result object; only backend
//! construction returns [`Error`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod archive;
pub mod backend;
pub mod config;
pub mod docker;
pub mod error;
pub mod exec;
pub mod factory;
pub mod filesystem;
pub mod path;
pub mod search;
pub mod state;
pub mod text;
pub mod types;

pub use backend::{SandboxBackend, DEFAULT_READ_LIMIT, DEFAULT_READ_OFFSET};
pub use config::{DockerSandboxConfig, FilesystemSandboxConfig, NetworkMode, StateSandboxConfig};
pub use docker::{ContainerState, DockerSandboxBackend};
pub use error::{Error, Result};
pub use exec::ExecLimits;
pub use factory::{BackendFactory, BackendKind, SandboxSettings};
pub use filesystem::FilesystemSandboxBackend;
pub use state::{FileData, FileState, StateSandboxBackend};
pub use types::{
    DownloadResult, EditResult, ExecuteResponse, FileInfo, GrepMatch, GrepOutput, IsolationTier,
    WriteResult,
};
