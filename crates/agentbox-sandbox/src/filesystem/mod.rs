//! Host filesystem backend
//!
//! Operates on a real directory tree. With `virtual_mode` every path is
//! jailed under the root (see [`crate::path`]); without it paths are taken
//! as host paths and relative ones are joined onto the root.
//!
//! Commands run on the host with the working directory pinned to the root.
//! There is no resource or network isolation: this tier is for trusted
//! callers only.

use crate::backend::SandboxBackend;
use crate::config::FilesystemSandboxConfig;
use crate::error::{Error, Result};
use crate::exec::{run_shell, ExecLimits};
use crate::path::{resolve_virtual, to_virtual};
use crate::search::{compile_regex, grep_content, IncludeFilter, PathPattern};
use crate::text::{format_read_response, perform_string_replacement};
use crate::types::{
    messages, DownloadResult, EditResult, ExecuteResponse, FileInfo, GrepMatch, GrepOutput,
    IsolationTier, WriteResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// Backend over a host directory
pub struct FilesystemSandboxBackend {
    id: Uuid,
    root: PathBuf,
    config: FilesystemSandboxConfig,
}

impl FilesystemSandboxBackend {
    /// Create the backend, creating the root directory if needed
    pub fn new(config: FilesystemSandboxConfig) -> Result<Self> {
        let root = match &config.root_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?,
        };
        std::fs::create_dir_all(&root)?;
        let root = root.canonicalize()?;

        let id = Uuid::new_v4();
        info!(
            backend_id = %id,
            root = %root.display(),
            virtual_mode = config.virtual_mode,
            "Filesystem sandbox backend created"
        );

        Ok(Self { id, root, config })
    }

    /// Canonical root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &FilesystemSandboxConfig {
        &self.config
    }

    /// Map a caller path to a host path, enforcing the jail in virtual mode
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        if self.config.virtual_mode {
            return resolve_virtual(&self.root, path);
        }

        let candidate = Path::new(path);
        if candidate.is_absolute() {
            Ok(candidate.to_path_buf())
        } else {
            Ok(self.root.join(candidate))
        }
    }

    fn display_path(&self, full: &Path) -> String {
        if self.config.virtual_mode {
            to_virtual(&self.root, full)
        } else {
            full.to_string_lossy().into_owned()
        }
    }

    fn limits(&self) -> ExecLimits {
        ExecLimits::new(self.config.command_timeout_secs, self.config.max_output_size)
    }

    async fn create_file(&self, path: &str, content: &[u8]) -> WriteResult {
        let full = match self.resolve(path) {
            Ok(full) => full,
            Err(e) => return WriteResult::err(format!("Error: {}", e)),
        };

        if tokio::fs::symlink_metadata(&full).await.is_ok() {
            return WriteResult::err(messages::already_exists(path));
        }

        if let Some(parent) = full.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return WriteResult::err(messages::write_failed(path, e));
            }
        }

        // create_new closes the gap between the existence check and the write
        let opened = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full)
            .await;
        let mut file = match opened {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return WriteResult::err(messages::already_exists(path));
            }
            Err(e) => return WriteResult::err(messages::write_failed(path, e)),
        };

        if let Err(e) = file.write_all(content).await {
            return WriteResult::err(messages::write_failed(path, e));
        }
        if let Err(e) = file.flush().await {
            return WriteResult::err(messages::write_failed(path, e));
        }

        debug!(backend_id = %self.id, path = %path, bytes = content.len(), "File written");
        WriteResult::ok(path)
    }

    async fn load(&self, path: &str) -> std::result::Result<(PathBuf, Vec<u8>), String> {
        let full = self.resolve(path).map_err(|e| format!("Error: {}", e))?;

        let meta = match tokio::fs::metadata(&full).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(messages::not_found(path)),
            Err(e) => return Err(format!("Error reading file '{}': {}", path, e)),
        };
        if meta.is_dir() {
            return Err(format!("Error: '{}' is a directory", path));
        }
        if meta.len() > self.config.max_file_size_bytes() {
            return Err(format!(
                "Error: File '{}' exceeds maximum size of {} MB",
                path, self.config.max_file_size_mb
            ));
        }

        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok((full, bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(messages::not_found(path)),
            Err(e) => Err(format!("Error reading file '{}': {}", path, e)),
        }
    }
}

fn rfc3339(time: std::io::Result<SystemTime>) -> String {
    time.map(|t| DateTime::<Utc>::from(t).to_rfc3339())
        .unwrap_or_default()
}

fn relative_slash_path(base: &Path, full: &Path) -> Option<String> {
    let rel = full.strip_prefix(base).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

#[async_trait]
impl SandboxBackend for FilesystemSandboxBackend {
    fn id(&self) -> Uuid {
        self.id
    }

    fn isolation(&self) -> IsolationTier {
        IsolationTier::HostPath
    }

    #[instrument(skip(self), fields(backend_id = %self.id))]
    async fn ls_info(&self, path: &str) -> Vec<FileInfo> {
        let full = match self.resolve(path) {
            Ok(full) => full,
            Err(e) => {
                warn!(error = %e, "ls rejected");
                return Vec::new();
            }
        };

        let mut dir = match tokio::fs::read_dir(&full).await {
            Ok(dir) => dir,
            Err(e) => {
                debug!(error = %e, "ls on unreadable directory");
                return Vec::new();
            }
        };

        let mut infos = Vec::new();
        while let Ok(Some(entry)) = dir.next_entry().await {
            let entry_path = entry.path();
            let Ok(meta) = tokio::fs::metadata(&entry_path).await else {
                continue;
            };
            let shown = self.display_path(&entry_path);
            let modified = rfc3339(meta.modified());
            if meta.is_dir() {
                infos.push(FileInfo::dir(shown, modified));
            } else {
                infos.push(FileInfo::file(shown, meta.len(), modified));
            }
        }

        infos.sort_by(|a, b| a.path.cmp(&b.path));
        infos
    }

    #[instrument(skip(self), fields(backend_id = %self.id))]
    async fn read(&self, path: &str, offset: usize, limit: usize) -> String {
        match self.load(path).await {
            Ok((_, bytes)) => format_read_response(&String::from_utf8_lossy(&bytes), offset, limit),
            Err(message) => message,
        }
    }

    #[instrument(skip(self, content), fields(backend_id = %self.id))]
    async fn write(&self, path: &str, content: &str) -> WriteResult {
        self.create_file(path, content.as_bytes()).await
    }

    #[instrument(skip(self, old_string, new_string), fields(backend_id = %self.id))]
    async fn edit(
        &self,
        path: &str,
        old_string: &str,
        new_string: &str,
        replace_all: bool,
    ) -> EditResult {
        let (full, bytes) = match self.load(path).await {
            Ok(loaded) => loaded,
            Err(message) => return EditResult::err(message),
        };
        let Ok(content) = String::from_utf8(bytes) else {
            return EditResult::err(format!("Error: File '{}' is not valid UTF-8", path));
        };

        let (updated, occurrences) =
            match perform_string_replacement(&content, old_string, new_string, replace_all) {
                Ok(result) => result,
                Err(message) => return EditResult::err(message),
            };

        if let Err(e) = tokio::fs::write(&full, updated).await {
            return EditResult::err(messages::write_failed(path, e));
        }

        debug!(path = %path, occurrences, "File edited");
        EditResult::ok(path, occurrences)
    }

    #[instrument(skip(self), fields(backend_id = %self.id))]
    async fn grep_raw(
        &self,
        pattern: &str,
        path: Option<&str>,
        glob: Option<&str>,
    ) -> GrepOutput {
        let regex = match compile_regex(pattern) {
            Ok(regex) => regex,
            Err(message) => return GrepOutput::Error(message),
        };
        let include = match glob.map(IncludeFilter::new).transpose() {
            Ok(include) => include,
            Err(message) => return GrepOutput::Error(message),
        };
        let base = match self.resolve(path.unwrap_or(".")) {
            Ok(base) => base,
            Err(e) => return GrepOutput::Error(e.to_string()),
        };
        if tokio::fs::symlink_metadata(&base).await.is_err() {
            return GrepOutput::Matches(Vec::new());
        }

        let root = self.root.clone();
        let virtual_mode = self.config.virtual_mode;
        let max_size = self.config.max_file_size_bytes();

        let walk = tokio::task::spawn_blocking(move || -> Result<Vec<GrepMatch>> {
            let mut matches = Vec::new();
            for entry in WalkDir::new(&base).follow_links(false).sort_by_file_name() {
                let entry = match entry {
                    Ok(entry) => entry,
                    // An unreadable search root is an error; anything deeper is skipped
                    Err(e) if e.depth() == 0 => {
                        return Err(Error::Io(e.into()));
                    }
                    Err(_) => continue,
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = relative_slash_path(&base, entry.path())
                    .unwrap_or_else(|| entry.file_name().to_string_lossy().into_owned());
                if let Some(include) = &include {
                    if !include.allows(&rel) {
                        continue;
                    }
                }
                if entry.metadata().map(|m| m.len() > max_size).unwrap_or(true) {
                    continue;
                }
                let Ok(bytes) = std::fs::read(entry.path()) else {
                    continue;
                };
                // Binary files are not searched
                let Ok(content) = std::str::from_utf8(&bytes) else {
                    continue;
                };
                let shown = if virtual_mode {
                    to_virtual(&root, entry.path())
                } else {
                    entry.path().to_string_lossy().into_owned()
                };
                matches.extend(grep_content(&regex, &shown, content));
            }
            Ok(matches)
        })
        .await;

        match walk {
            Ok(Ok(matches)) => GrepOutput::Matches(matches),
            Ok(Err(e)) => GrepOutput::Error(format!("Error searching files: {}", e)),
            Err(e) => GrepOutput::Error(format!("Error searching files: {}", e)),
        }
    }

    #[instrument(skip(self), fields(backend_id = %self.id))]
    async fn glob_info(&self, pattern: &str, path: &str) -> Vec<FileInfo> {
        let matcher = match PathPattern::new(pattern.trim_start_matches('/')) {
            Ok(matcher) => matcher,
            Err(message) => {
                warn!(error = %message, "glob rejected");
                return Vec::new();
            }
        };
        let base = match self.resolve(path) {
            Ok(base) => base,
            Err(e) => {
                warn!(error = %e, "glob rejected");
                return Vec::new();
            }
        };

        let root = self.root.clone();
        let virtual_mode = self.config.virtual_mode;

        let walk = tokio::task::spawn_blocking(move || {
            let mut infos = Vec::new();
            for entry in WalkDir::new(&base)
                .min_depth(1)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter()
                .filter_map(std::result::Result::ok)
            {
                let is_dir = entry.file_type().is_dir();
                let Some(rel) = relative_slash_path(&base, entry.path()) else {
                    continue;
                };
                if !matcher.is_match(&rel, is_dir) {
                    continue;
                }
                let Ok(meta) = entry.metadata() else {
                    continue;
                };
                let shown = if virtual_mode {
                    to_virtual(&root, entry.path())
                } else {
                    entry.path().to_string_lossy().into_owned()
                };
                let modified = rfc3339(meta.modified());
                infos.push(if is_dir {
                    FileInfo::dir(shown, modified)
                } else {
                    FileInfo::file(shown, meta.len(), modified)
                });
            }
            infos
        })
        .await;

        walk.unwrap_or_default()
    }

    #[instrument(skip(self), fields(backend_id = %self.id))]
    async fn execute(&self, command: &str) -> ExecuteResponse {
        run_shell(command, Some(&self.root), self.limits()).await
    }

    #[instrument(skip(self, content), fields(backend_id = %self.id))]
    async fn upload_file(&self, path: &str, content: &[u8]) -> WriteResult {
        self.create_file(path, content).await
    }

    #[instrument(skip(self), fields(backend_id = %self.id))]
    async fn download_file(&self, path: &str) -> DownloadResult {
        match self.load(path).await {
            Ok((_, bytes)) => DownloadResult::ok(path, bytes),
            Err(message) => DownloadResult::err(path, message),
        }
    }

    async fn cleanup(&self) {
        debug!(backend_id = %self.id, "Filesystem sandbox cleanup (nothing to release)");
    }
}
