//! Container backend
//!
//! Owns one long-lived container per backend instance, driven through the
//! `docker` CLI. The container is created lazily on first use:
//!
//! ```text
//! Absent --ensure_container--> Running --cleanup--> Absent
//! ```
//!
//! Files cross the boundary only as in-memory tar streams (`docker cp`),
//! so content is moved as raw bytes in both directions. Commands and the
//! listing utilities (`ls`, `find`, `grep`) run inside the container.

mod cli;
mod listing;

pub use cli::{DockerCli, BACKEND_LABEL};

use crate::archive::{pack_single_file, unpack_first_file};
use crate::backend::SandboxBackend;
use crate::config::DockerSandboxConfig;
use crate::error::{Error, Result};
use crate::exec::{byte_cap, finish, merge_output, spawn_failed, timed_out, ExecLimits};
use crate::search::{compile_regex, PathPattern};
use crate::text::{format_read_response, perform_string_replacement};
use crate::types::{
    messages, DownloadResult, EditResult, ExecuteResponse, FileInfo, GrepOutput, IsolationTier,
    WriteResult,
};
use async_trait::async_trait;
use chrono::Utc;
use listing::{
    find_command, grep_command, ls_command, parse_find, parse_grep, parse_ls, shell_quote,
};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

// ============================================================================
// Container State
// ============================================================================

/// Lifecycle of the owned container
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ContainerState {
    /// Not created yet, or already removed
    #[default]
    Absent,
    /// Created and started
    Running {
        /// Docker container id
        id: String,
    },
}

// ============================================================================
// Docker Sandbox Backend
// ============================================================================

/// Backend that runs everything inside a dedicated container
pub struct DockerSandboxBackend {
    id: Uuid,
    config: DockerSandboxConfig,
    cli: DockerCli,
    state: Mutex<ContainerState>,
}

impl DockerSandboxBackend {
    /// Check that the daemon is reachable and build the backend
    ///
    /// The container itself is created on first use, or eagerly through
    /// [`Self::ensure_container`].
    pub async fn connect(config: DockerSandboxConfig) -> Result<Self> {
        let cli = DockerCli::new(config.docker_binary.clone());
        cli.ping().await?;

        let id = Uuid::new_v4();
        info!(
            backend_id = %id,
            image = %config.image,
            network = config.network_mode.as_docker_arg(),
            "Docker sandbox backend created"
        );

        Ok(Self {
            id,
            config,
            cli,
            state: Mutex::new(ContainerState::Absent),
        })
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &DockerSandboxConfig {
        &self.config
    }

    /// Id of the running container, if one exists
    pub async fn container_id(&self) -> Option<String> {
        match &*self.state.lock().await {
            ContainerState::Running { id } => Some(id.clone()),
            ContainerState::Absent => None,
        }
    }

    /// Create and start the container if it does not exist yet
    ///
    /// Pulls the image when missing, starts the container with a no-op
    /// long-running command and creates the working directory. Any failure
    /// here is an infrastructure error.
    #[instrument(skip(self), fields(backend_id = %self.id))]
    pub async fn ensure_container(&self) -> Result<String> {
        let mut state = self.state.lock().await;
        if let ContainerState::Running { id } = &*state {
            return Ok(id.clone());
        }

        self.cli.ensure_image(&self.config.image).await?;
        let container_id = self.cli.create(&self.config, &self.id.to_string()).await?;

        if let Err(e) = self.cli.start(&container_id).await {
            let _ = self.cli.remove(&container_id).await;
            return Err(e);
        }

        let mkdir = format!("mkdir -p {}", shell_quote(&self.config.working_dir));
        let prepared = self
            .cli
            .exec(&container_id, "/", &mkdir, self.limits().timeout)
            .await;
        match prepared {
            Ok(output) if output.status.success() => {}
            Ok(output) => {
                let _ = self.cli.remove(&container_id).await;
                return Err(Error::Container(format!(
                    "failed to create working directory: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
            Err(e) => {
                let _ = self.cli.remove(&container_id).await;
                return Err(e);
            }
        }

        info!(
            container_id = %container_id,
            image = %self.config.image,
            "Sandbox container started"
        );
        *state = ContainerState::Running {
            id: container_id.clone(),
        };
        Ok(container_id)
    }

    fn limits(&self) -> ExecLimits {
        ExecLimits::new(self.config.command_timeout_secs, self.config.max_output_size)
    }

    /// Relative paths are taken from the working directory
    fn container_path(&self, path: &str) -> String {
        if path.starts_with('/') {
            path.to_string()
        } else {
            format!(
                "{}/{}",
                self.config.working_dir.trim_end_matches('/'),
                path.trim_start_matches("./")
            )
        }
    }

    /// Run a helper script, returning stdout only when it exited cleanly
    async fn run_quiet(&self, container_id: &str, script: &str) -> Result<Option<String>> {
        let output = self
            .cli
            .exec(
                container_id,
                &self.config.working_dir,
                script,
                self.limits().timeout,
            )
            .await?;
        if output.status.success() {
            Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
        } else {
            Ok(None)
        }
    }

    async fn fetch(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let container_id = self.ensure_container().await?;
        let full = self.container_path(path);
        match self.cli.copy_from(&container_id, &full).await? {
            Some(archive) => unpack_first_file(&archive),
            None => Ok(None),
        }
    }

    async fn store(&self, container_id: &str, full: &str, content: &[u8]) -> Result<()> {
        let (parent, name) = match full.rsplit_once('/') {
            Some(("", name)) => ("/", name),
            Some((parent, name)) => (parent, name),
            None => (self.config.working_dir.as_str(), full),
        };
        let mtime = u64::try_from(Utc::now().timestamp()).unwrap_or_default();
        let archive = pack_single_file(name, content, mtime)?;
        self.cli.copy_into(container_id, parent, archive).await
    }

    async fn create_file(&self, path: &str, content: &[u8]) -> Result<WriteResult> {
        let container_id = self.ensure_container().await?;
        let full = self.container_path(path);
        if full.ends_with('/') {
            return Ok(WriteResult::err(format!("Error: '{}' is a directory", path)));
        }

        let exists = format!("test -e {}", shell_quote(&full));
        if self.run_quiet(&container_id, &exists).await?.is_some() {
            return Ok(WriteResult::err(messages::already_exists(path)));
        }

        // The archive is extracted into the parent, which must exist first
        if let Some((parent, _)) = full.rsplit_once('/') {
            if !parent.is_empty() {
                let mkdir = format!("mkdir -p {}", shell_quote(parent));
                if self.run_quiet(&container_id, &mkdir).await?.is_none() {
                    return Ok(WriteResult::err(messages::write_failed(
                        path,
                        "could not create parent directory",
                    )));
                }
            }
        }

        self.store(&container_id, &full, content).await?;
        debug!(container_id = %container_id, path = %full, bytes = content.len(), "File uploaded");
        Ok(WriteResult::ok(path))
    }

    async fn edit_file(
        &self,
        path: &str,
        old_string: &str,
        new_string: &str,
        replace_all: bool,
    ) -> Result<EditResult> {
        let Some(bytes) = self.fetch(path).await? else {
            return Ok(EditResult::err(messages::not_found(path)));
        };
        let Ok(content) = String::from_utf8(bytes) else {
            return Ok(EditResult::err(format!(
                "Error: File '{}' is not valid UTF-8",
                path
            )));
        };

        let (updated, occurrences) =
            match perform_string_replacement(&content, old_string, new_string, replace_all) {
                Ok(result) => result,
                Err(message) => return Ok(EditResult::err(message)),
            };

        let container_id = self.ensure_container().await?;
        self.store(&container_id, &self.container_path(path), updated.as_bytes())
            .await?;
        Ok(EditResult::ok(path, occurrences))
    }
}

#[async_trait]
impl SandboxBackend for DockerSandboxBackend {
    fn id(&self) -> Uuid {
        self.id
    }

    fn isolation(&self) -> IsolationTier {
        IsolationTier::Container
    }

    #[instrument(skip(self), fields(backend_id = %self.id))]
    async fn ls_info(&self, path: &str) -> Vec<FileInfo> {
        let container_id = match self.ensure_container().await {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "ls without container");
                return Vec::new();
            }
        };
        let full = self.container_path(path);

        match self.run_quiet(&container_id, &ls_command(&full)).await {
            Ok(Some(output)) => {
                let mut infos = parse_ls(&output, &full);
                infos.sort_by(|a, b| a.path.cmp(&b.path));
                infos
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "ls failed");
                Vec::new()
            }
        }
    }

    #[instrument(skip(self), fields(backend_id = %self.id))]
    async fn read(&self, path: &str, offset: usize, limit: usize) -> String {
        match self.fetch(path).await {
            Ok(Some(bytes)) => {
                format_read_response(&String::from_utf8_lossy(&bytes), offset, limit)
            }
            Ok(None) => messages::not_found(path),
            Err(e) => format!("Error reading file '{}': {}", path, e),
        }
    }

    #[instrument(skip(self, content), fields(backend_id = %self.id))]
    async fn write(&self, path: &str, content: &str) -> WriteResult {
        self.create_file(path, content.as_bytes())
            .await
            .unwrap_or_else(|e| WriteResult::err(messages::write_failed(path, e)))
    }

    #[instrument(skip(self, old_string, new_string), fields(backend_id = %self.id))]
    async fn edit(
        &self,
        path: &str,
        old_string: &str,
        new_string: &str,
        replace_all: bool,
    ) -> EditResult {
        self.edit_file(path, old_string, new_string, replace_all)
            .await
            .unwrap_or_else(|e| EditResult::err(messages::write_failed(path, e)))
    }

    #[instrument(skip(self), fields(backend_id = %self.id))]
    async fn grep_raw(
        &self,
        pattern: &str,
        path: Option<&str>,
        glob: Option<&str>,
    ) -> GrepOutput {
        if let Err(message) = compile_regex(pattern) {
            return GrepOutput::Error(message);
        }
        let container_id = match self.ensure_container().await {
            Ok(id) => id,
            Err(e) => return GrepOutput::Error(e.to_string()),
        };
        let base = path
            .map(|p| self.container_path(p))
            .unwrap_or_else(|| self.config.working_dir.clone());

        let output = self
            .cli
            .exec(
                &container_id,
                &self.config.working_dir,
                &grep_command(pattern, &base, glob),
                self.limits().timeout,
            )
            .await;

        match output {
            // grep exits 1 on no match and 2 on unreadable paths; both are
            // "no results" unless it still printed matches
            Ok(output) => {
                GrepOutput::Matches(parse_grep(&String::from_utf8_lossy(&output.stdout)))
            }
            Err(e) => GrepOutput::Error(format!("Error searching files: {}", e)),
        }
    }

    #[instrument(skip(self), fields(backend_id = %self.id))]
    async fn glob_info(&self, pattern: &str, path: &str) -> Vec<FileInfo> {
        let pattern = pattern.trim_start_matches('/');
        let matcher = match PathPattern::new(pattern) {
            Ok(matcher) => matcher,
            Err(message) => {
                warn!(error = %message, "glob rejected");
                return Vec::new();
            }
        };
        let container_id = match self.ensure_container().await {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "glob without container");
                return Vec::new();
            }
        };

        let base = self.container_path(path);
        // `find -name` only narrows by the last segment; the full pattern is
        // applied below
        let name_glob = match pattern.trim_end_matches('/').rsplit('/').next() {
            Some(last) if !last.is_empty() && last != "**" => last,
            _ => "*",
        };

        let output = match self
            .run_quiet(&container_id, &find_command(&base, name_glob))
            .await
        {
            Ok(Some(output)) => output,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(error = %e, "find failed");
                return Vec::new();
            }
        };

        let prefix = format!("{}/", base.trim_end_matches('/'));
        let mut infos: Vec<FileInfo> = parse_find(&output)
            .into_iter()
            .filter(|info| {
                info.path
                    .trim_end_matches('/')
                    .strip_prefix(&prefix)
                    .is_some_and(|rel| matcher.is_match(rel, info.is_dir))
            })
            .collect();
        infos.sort_by(|a, b| a.path.cmp(&b.path));
        infos
    }

    #[instrument(skip(self), fields(backend_id = %self.id))]
    async fn execute(&self, command: &str) -> ExecuteResponse {
        let container_id = match self.ensure_container().await {
            Ok(id) => id,
            Err(e) => return spawn_failed(e),
        };
        let limits = self.limits();

        let output = match self
            .cli
            .exec_capped(
                &container_id,
                &self.config.working_dir,
                command,
                byte_cap(limits.max_output),
                limits.timeout,
            )
            .await
        {
            Ok(output) => output,
            Err(Error::Timeout(_)) => {
                warn!(container_id = %container_id, "Container command timed out");
                return timed_out(limits.timeout);
            }
            Err(e) => return spawn_failed(e),
        };

        let response = finish(
            merge_output(&output.stdout, &output.stderr),
            output.status.code().unwrap_or(-1),
            limits.max_output,
            output.discarded,
        );
        debug!(
            container_id = %container_id,
            exit_code = response.exit_code,
            output_len = response.output.len(),
            truncated = response.truncated,
            "Container command completed"
        );
        response
    }

    #[instrument(skip(self, content), fields(backend_id = %self.id))]
    async fn upload_file(&self, path: &str, content: &[u8]) -> WriteResult {
        self.create_file(path, content)
            .await
            .unwrap_or_else(|e| WriteResult::err(messages::write_failed(path, e)))
    }

    #[instrument(skip(self), fields(backend_id = %self.id))]
    async fn download_file(&self, path: &str) -> DownloadResult {
        match self.fetch(path).await {
            Ok(Some(bytes)) => DownloadResult::ok(path, bytes),
            Ok(None) => DownloadResult::err(path, messages::not_found(path)),
            Err(e) => DownloadResult::err(path, format!("Error reading file '{}': {}", path, e)),
        }
    }

    /// Stop the container and remove it unless the daemon already does.
    /// A failed stop always falls back to a forced remove, since the daemon
    /// only auto-removes containers that actually stopped.
    /// Errors are logged, never returned; a second call is a no-op.
    #[instrument(skip(self), fields(backend_id = %self.id))]
    async fn cleanup(&self) {
        let mut state = self.state.lock().await;
        let ContainerState::Running { id } = std::mem::take(&mut *state) else {
            debug!("No container to clean up");
            return;
        };

        let stopped = match self.cli.stop(&id, self.config.stop_timeout_secs).await {
            Ok(()) => true,
            Err(e) => {
                warn!(container_id = %id, error = %e, "Container stop failed; forcing removal");
                false
            }
        };
        if !stopped || !self.config.auto_remove {
            if let Err(e) = self.cli.remove(&id).await {
                debug!(container_id = %id, error = %e, "Container remove failed (already gone?)");
            }
        }
        info!(container_id = %id, "Sandbox container cleaned up");
    }
}

impl Drop for DockerSandboxBackend {
    fn drop(&mut self) {
        if let ContainerState::Running { id } = self.state.get_mut() {
            warn!(
                backend_id = %self.id,
                container_id = %id,
                "Backend dropped without cleanup; force-removing container"
            );
            self.cli.remove_detached(id);
        }
    }
}

#[cfg(test)]
mod tests;
