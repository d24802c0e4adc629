//! In-memory state backend
//!
//! File operations act on a keyed map held in memory. Nothing touches the
//! host disk, and contents disappear with the map.
//!
//! # Warning
//!
//! [`SandboxBackend::execute`] is NOT confined to that map. Commands run
//! through `sh -c` on the host in the process working directory and cannot
//! see the in-memory files. File operations are scratch-space only; command
//! execution has no isolation at all. Never hand this backend to an
//! untrusted agent.

use crate::backend::SandboxBackend;
use crate::config::StateSandboxConfig;
use crate::exec::{run_shell, ExecLimits};
use crate::path::normalize_key;
use crate::search::{compile_regex, grep_content, IncludeFilter, PathPattern};
use crate::text::{format_read_response, perform_string_replacement};
use crate::types::{
    messages, DownloadResult, EditResult, ExecuteResponse, FileInfo, GrepOutput, IsolationTier,
    WriteResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// One stored file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileData {
    /// Raw content
    pub content: Vec<u8>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub modified_at: DateTime<Utc>,
}

impl FileData {
    fn new(content: Vec<u8>) -> Self {
        let now = Utc::now();
        Self {
            content,
            created_at: now,
            modified_at: now,
        }
    }

    fn info(&self, key: &str) -> FileInfo {
        FileInfo::file(
            key,
            self.content.len() as u64,
            self.modified_at.to_rfc3339(),
        )
    }
}

/// Shared file map, keyed by normalised absolute path
pub type FileState = Arc<RwLock<BTreeMap<String, FileData>>>;

/// Backend over an in-memory file map
pub struct StateSandboxBackend {
    id: Uuid,
    files: FileState,
    config: StateSandboxConfig,
}

impl StateSandboxBackend {
    /// Create a backend with an empty file map
    #[must_use]
    pub fn new(config: StateSandboxConfig) -> Self {
        Self::with_state(FileState::default(), config)
    }

    /// Create a backend over an existing file map, e.g. one kept per
    /// conversation by the caller
    #[must_use]
    pub fn with_state(files: FileState, config: StateSandboxConfig) -> Self {
        let id = Uuid::new_v4();
        warn!(
            backend_id = %id,
            "State sandbox backend created; commands run on the host without isolation"
        );
        Self { id, files, config }
    }

    /// Handle to the underlying file map
    #[must_use]
    pub fn state(&self) -> FileState {
        Arc::clone(&self.files)
    }

    fn limits(&self) -> ExecLimits {
        ExecLimits::new(self.config.command_timeout_secs, self.config.max_output_size)
    }

    async fn create_file(&self, path: &str, content: Vec<u8>) -> WriteResult {
        let key = match normalize_key(path) {
            Ok(key) => key,
            Err(e) => return WriteResult::err(format!("Error: {}", e)),
        };
        if key == "/" {
            return WriteResult::err(format!("Error: '{}' is a directory", path));
        }

        let mut files = self.files.write().await;
        if files.contains_key(&key) {
            return WriteResult::err(messages::already_exists(path));
        }
        // Keys with children are implicit directories
        let prefix = dir_prefix(&key);
        if files
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(existing, _)| existing.starts_with(&prefix))
        {
            return WriteResult::err(format!("Error: '{}' is a directory", path));
        }
        if let Some(parent) = ancestors(&key).find(|parent| files.contains_key(*parent)) {
            return WriteResult::err(messages::write_failed(
                path,
                format_args!("'{}' is a file", parent),
            ));
        }
        debug!(backend_id = %self.id, key = %key, bytes = content.len(), "File stored");
        files.insert(key, FileData::new(content));
        WriteResult::ok(path)
    }

    async fn load(&self, path: &str) -> std::result::Result<Vec<u8>, String> {
        let key = normalize_key(path).map_err(|e| format!("Error: {}", e))?;
        let files = self.files.read().await;
        files
            .get(&key)
            .map(|data| data.content.clone())
            .ok_or_else(|| messages::not_found(path))
    }
}

/// `"/a/b"` becomes `"/a/b/"`, `"/"` stays as is
fn dir_prefix(key: &str) -> String {
    if key.ends_with('/') {
        key.to_string()
    } else {
        format!("{}/", key)
    }
}

/// Proper ancestors of a normalised key, `"/a/b/c"` yields `"/a"`, `"/a/b"`
fn ancestors(key: &str) -> impl Iterator<Item = &str> {
    key.match_indices('/').skip(1).map(move |(idx, _)| &key[..idx])
}

/// Keys under `base` paired with their path relative to it
fn entries_under<'a>(
    files: &'a BTreeMap<String, FileData>,
    base: &str,
) -> impl Iterator<Item = (&'a String, &'a FileData, String)> {
    let prefix = dir_prefix(base);
    let exact = base.to_string();
    files.iter().filter_map(move |(key, data)| {
        if *key == exact {
            let name = key.rsplit('/').next().unwrap_or(key).to_string();
            Some((key, data, name))
        } else {
            key.strip_prefix(&prefix)
                .map(|rel| (key, data, rel.to_string()))
        }
    })
}

#[async_trait]
impl SandboxBackend for StateSandboxBackend {
    fn id(&self) -> Uuid {
        self.id
    }

    fn isolation(&self) -> IsolationTier {
        IsolationTier::None
    }

    #[instrument(skip(self), fields(backend_id = %self.id))]
    async fn ls_info(&self, path: &str) -> Vec<FileInfo> {
        let Ok(key) = normalize_key(path) else {
            return Vec::new();
        };
        let prefix = dir_prefix(&key);
        let files = self.files.read().await;

        let mut infos = Vec::new();
        let mut subdirs = BTreeSet::new();
        for (file_key, data) in files.iter() {
            let Some(rel) = file_key.strip_prefix(&prefix) else {
                continue;
            };
            match rel.split_once('/') {
                Some((dir, _)) => {
                    subdirs.insert(format!("{}{}", prefix, dir));
                }
                None => infos.push(data.info(file_key)),
            }
        }
        infos.extend(subdirs.into_iter().map(|dir| FileInfo::dir(dir, "")));

        infos.sort_by(|a, b| a.path.cmp(&b.path));
        infos
    }

    #[instrument(skip(self), fields(backend_id = %self.id))]
    async fn read(&self, path: &str, offset: usize, limit: usize) -> String {
        match self.load(path).await {
            Ok(bytes) => format_read_response(&String::from_utf8_lossy(&bytes), offset, limit),
            Err(message) => message,
        }
    }

    #[instrument(skip(self, content), fields(backend_id = %self.id))]
    async fn write(&self, path: &str, content: &str) -> WriteResult {
        self.create_file(path, content.as_bytes().to_vec()).await
    }

    #[instrument(skip(self, old_string, new_string), fields(backend_id = %self.id))]
    async fn edit(
        &self,
        path: &str,
        old_string: &str,
        new_string: &str,
        replace_all: bool,
    ) -> EditResult {
        let key = match normalize_key(path) {
            Ok(key) => key,
            Err(e) => return EditResult::err(format!("Error: {}", e)),
        };

        let mut files = self.files.write().await;
        let Some(data) = files.get_mut(&key) else {
            return EditResult::err(messages::not_found(path));
        };
        let Ok(content) = std::str::from_utf8(&data.content) else {
            return EditResult::err(format!("Error: File '{}' is not valid UTF-8", path));
        };

        match perform_string_replacement(content, old_string, new_string, replace_all) {
            Ok((updated, occurrences)) => {
                data.content = updated.into_bytes();
                data.modified_at = Utc::now();
                EditResult::ok(path, occurrences)
            }
            Err(message) => EditResult::err(message),
        }
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
        let base = match normalize_key(path.unwrap_or("/")) {
            Ok(base) => base,
            Err(e) => return GrepOutput::Error(e.to_string()),
        };

        let files = self.files.read().await;
        let mut matches = Vec::new();
        for (key, data, rel) in entries_under(&files, &base) {
            if let Some(include) = &include {
                if !include.allows(&rel) {
                    continue;
                }
            }
            if let Ok(content) = std::str::from_utf8(&data.content) {
                matches.extend(grep_content(&regex, key, content));
            }
        }
        GrepOutput::Matches(matches)
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
        let Ok(base) = normalize_key(path) else {
            return Vec::new();
        };
        let base_prefix = dir_prefix(&base);

        let files = self.files.read().await;
        let mut infos = Vec::new();
        let mut dirs = BTreeSet::new();
        for (key, data, rel) in entries_under(&files, &base) {
            if matcher.is_match(&rel, false) {
                infos.push(data.info(key));
            }
            // Directories only exist implicitly as key prefixes
            let mut dir = String::new();
            if let Some((parents, _)) = rel.rsplit_once('/') {
                for segment in parents.split('/') {
                    if !dir.is_empty() {
                        dir.push('/');
                    }
                    dir.push_str(segment);
                    dirs.insert(dir.clone());
                }
            }
        }
        for dir in dirs {
            if matcher.is_match(&dir, true) {
                infos.push(FileInfo::dir(format!("{}{}", base_prefix, dir), ""));
            }
        }

        infos.sort_by(|a, b| a.path.cmp(&b.path));
        infos
    }

    /// Runs on the HOST, in the process working directory. The in-memory
    /// files are not visible to the command.
    #[instrument(skip(self), fields(backend_id = %self.id))]
    async fn execute(&self, command: &str) -> ExecuteResponse {
        warn!(backend_id = %self.id, "Executing command on the host without isolation");
        run_shell(command, None, self.limits()).await
    }

    #[instrument(skip(self, content), fields(backend_id = %self.id))]
    async fn upload_file(&self, path: &str, content: &[u8]) -> WriteResult {
        self.create_file(path, content.to_vec()).await
    }

    #[instrument(skip(self), fields(backend_id = %self.id))]
    async fn download_file(&self, path: &str) -> DownloadResult {
        match self.load(path).await {
            Ok(bytes) => DownloadResult::ok(path, bytes),
            Err(message) => DownloadResult::err(path, message),
        }
    }

    async fn cleanup(&self) {
        debug!(backend_id = %self.id, "State sandbox cleanup (nothing to release)");
    }
}

#[cfg(test)]
mod tests;
