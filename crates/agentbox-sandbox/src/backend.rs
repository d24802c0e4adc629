//! The capability set every sandbox backend implements

use crate::types::{
    DownloadResult, EditResult, ExecuteResponse, FileInfo, GrepOutput, IsolationTier, WriteResult,
};
use async_trait::async_trait;
use uuid::Uuid;

/// Default first line for `read` (0-based)
pub const DEFAULT_READ_OFFSET: usize = 0;

/// Default number of lines returned by `read`
pub const DEFAULT_READ_LIMIT: usize = 2000;

/// File and command operations an agent tool layer drives.
///
/// No operation returns an error: failures come back inside the result
/// objects (`error` fields, `"Error: ..."` strings, `exit_code = -1`) so the
/// agent can read them and retry with different arguments. Only backend
/// construction can fail with [`crate::Error`].
///
/// An instance is meant for one session at a time; callers must not drive
/// the same instance from several tasks concurrently.
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    /// Unique identifier for this backend instance (logging only)
    fn id(&self) -> Uuid;

    /// Isolation tier of this backend
    fn isolation(&self) -> IsolationTier;

    /// List the direct children of a directory. Missing or unreadable
    /// directories yield an empty list.
    async fn ls_info(&self, path: &str) -> Vec<FileInfo>;

    /// Read `limit` lines starting at line `offset` (0-based), rendered
    /// with 1-based line numbers.
    async fn read(&self, path: &str, offset: usize, limit: usize) -> String;

    /// Create a new file. Never overwrites an existing one.
    async fn write(&self, path: &str, content: &str) -> WriteResult;

    /// Replace `old_string` with `new_string`. Without `replace_all` the
    /// string must occur exactly once.
    async fn edit(
        &self,
        path: &str,
        old_string: &str,
        new_string: &str,
        replace_all: bool,
    ) -> EditResult;

    /// Search file contents line by line
    async fn grep_raw(&self, pattern: &str, path: Option<&str>, glob: Option<&str>)
        -> GrepOutput;

    /// Find files whose path under `path` matches `pattern`
    async fn glob_info(&self, pattern: &str, path: &str) -> Vec<FileInfo>;

    /// Run a shell command in the backend's execution context
    async fn execute(&self, command: &str) -> ExecuteResponse;

    /// Create a new file from raw bytes. Same no-clobber rule as `write`.
    async fn upload_file(&self, path: &str, content: &[u8]) -> WriteResult;

    /// Fetch raw file bytes
    async fn download_file(&self, path: &str) -> DownloadResult;

    /// Release OS-level resources. Idempotent.
    async fn cleanup(&self);
}
