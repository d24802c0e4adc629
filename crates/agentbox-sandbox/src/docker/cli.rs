//! Thin async wrapper over the `docker` command-line client

use crate::config::DockerSandboxConfig;
use crate::error::{Error, Result};
use crate::exec::{wait_capped, CappedOutput};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// Label put on every container this crate creates
pub const BACKEND_LABEL: &str = "agentbox.backend";

/// Timeout for lifecycle calls that should be quick (inspect, cp, mkdir)
const CONTROL_TIMEOUT: Duration = Duration::from_secs(60);

/// Image pulls can take a while on a cold cache
const PULL_TIMEOUT: Duration = Duration::from_secs(600);

/// Handle to the docker binary
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    /// Use `binary` (usually `docker`) for every call
    #[must_use]
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn spawn(&self, args: &[&str]) -> Result<tokio::process::Child> {
        self.command(args).spawn().map_err(|e| {
            Error::DockerUnavailable(format!("failed to run '{}': {}", self.binary, e))
        })
    }

    /// Run a docker subcommand and collect its output, whatever the exit code
    pub async fn output(&self, args: &[&str], timeout: Duration) -> Result<Output> {
        debug!(args = ?args, "docker");
        let child = self.spawn(args)?;

        tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::Timeout(timeout.as_millis() as u64))?
            .map_err(Error::Io)
    }

    /// Like [`output`](Self::output), keeping at most `cap` bytes per stream
    pub async fn output_capped(
        &self,
        args: &[&str],
        cap: u64,
        timeout: Duration,
    ) -> Result<CappedOutput> {
        debug!(args = ?args, cap, "docker (capped)");
        let child = self.spawn(args)?;

        tokio::time::timeout(timeout, wait_capped(child, cap))
            .await
            .map_err(|_| Error::Timeout(timeout.as_millis() as u64))?
            .map_err(Error::Io)
    }

    /// Run a docker subcommand with `input` on stdin
    pub async fn output_with_stdin(
        &self,
        args: &[&str],
        input: Vec<u8>,
        timeout: Duration,
    ) -> Result<Output> {
        debug!(args = ?args, bytes = input.len(), "docker (stdin)");
        let mut cmd = self.command(args);
        cmd.stdin(Stdio::piped());
        let mut child = cmd.spawn().map_err(|e| {
            Error::DockerUnavailable(format!("failed to run '{}': {}", self.binary, e))
        })?;

        let work = async move {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(&input).await?;
                stdin.shutdown().await?;
            }
            child.wait_with_output().await
        };

        tokio::time::timeout(timeout, work)
            .await
            .map_err(|_| Error::Timeout(timeout.as_millis() as u64))?
            .map_err(Error::Io)
    }

    /// Run a docker subcommand that must succeed; returns trimmed stdout
    async fn checked(&self, args: &[&str], timeout: Duration) -> Result<String> {
        let output = self.output(args, timeout).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(Error::Container(format!(
                "docker {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    /// Fail unless the daemon answers
    pub async fn ping(&self) -> Result<()> {
        let output = self
            .output(&["info", "--format", "{{.ServerVersion}}"], CONTROL_TIMEOUT)
            .await?;
        if output.status.success() {
            debug!(
                server_version = %String::from_utf8_lossy(&output.stdout).trim(),
                "Docker daemon reachable"
            );
            Ok(())
        } else {
            Err(Error::DockerUnavailable(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }

    /// Pull `image` unless it is already present locally
    pub async fn ensure_image(&self, image: &str) -> Result<()> {
        let inspect = self
            .output(&["image", "inspect", "--format", "{{.Id}}", image], CONTROL_TIMEOUT)
            .await?;
        if inspect.status.success() {
            return Ok(());
        }

        info!(image = %image, "Pulling Docker image");
        self.checked(&["pull", "--quiet", image], PULL_TIMEOUT)
            .await
            .map(|_| ())
            .map_err(|e| Error::Container(format!("failed to pull image '{}': {}", image, e)))
    }

    /// Create a long-running container for `config`; returns its id
    pub async fn create(&self, config: &DockerSandboxConfig, owner: &str) -> Result<String> {
        let label = format!("{}={}", BACKEND_LABEL, owner);
        let create_args = config.to_create_args();

        let mut args: Vec<&str> = vec!["create", "--label", label.as_str()];
        args.extend(create_args.iter().map(String::as_str));
        args.extend([config.image.as_str(), "sleep", "infinity"]);

        self.checked(&args, CONTROL_TIMEOUT).await
    }

    /// Start a created container
    pub async fn start(&self, container_id: &str) -> Result<()> {
        self.checked(&["start", container_id], CONTROL_TIMEOUT)
            .await
            .map(|_| ())
    }

    /// Run `sh -c script` inside the container from `workdir`
    pub async fn exec(
        &self,
        container_id: &str,
        workdir: &str,
        script: &str,
        timeout: Duration,
    ) -> Result<Output> {
        self.output(
            &["exec", "-w", workdir, container_id, "sh", "-c", script],
            timeout,
        )
        .await
    }

    /// Run a user command inside the container, bounding its captured output
    pub async fn exec_capped(
        &self,
        container_id: &str,
        workdir: &str,
        script: &str,
        cap: u64,
        timeout: Duration,
    ) -> Result<CappedOutput> {
        self.output_capped(
            &["exec", "-w", workdir, container_id, "sh", "-c", script],
            cap,
            timeout,
        )
        .await
    }

    /// Download `path` from the container as a tar stream
    ///
    /// Returns `None` when the path does not exist.
    pub async fn copy_from(&self, container_id: &str, path: &str) -> Result<Option<Vec<u8>>> {
        let source = format!("{}:{}", container_id, path);
        let output = self.output(&["cp", source.as_str(), "-"], CONTROL_TIMEOUT).await?;
        if output.status.success() {
            Ok(Some(output.stdout))
        } else {
            debug!(
                path = %path,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "docker cp from container failed"
            );
            Ok(None)
        }
    }

    /// Extract the tar stream `archive` into `parent_dir` inside the container
    pub async fn copy_into(
        &self,
        container_id: &str,
        parent_dir: &str,
        archive: Vec<u8>,
    ) -> Result<()> {
        let target = format!("{}:{}", container_id, parent_dir);
        let output = self
            .output_with_stdin(&["cp", "-", target.as_str()], archive, CONTROL_TIMEOUT)
            .await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Error::Container(format!(
                "docker cp into container failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    /// Stop with a grace period
    pub async fn stop(&self, container_id: &str, grace_secs: u64) -> Result<()> {
        let grace = grace_secs.to_string();
        self.checked(
            &["stop", "-t", grace.as_str(), container_id],
            CONTROL_TIMEOUT + Duration::from_secs(grace_secs),
        )
        .await
        .map(|_| ())
    }

    /// Force-remove
    pub async fn remove(&self, container_id: &str) -> Result<()> {
        self.checked(&["rm", "-f", container_id], CONTROL_TIMEOUT)
            .await
            .map(|_| ())
    }

    /// Fire-and-forget `docker rm -f` usable outside an async context
    pub fn remove_detached(&self, container_id: &str) {
        let spawned = std::process::Command::new(&self.binary)
            .args(["rm", "-f", container_id])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        if let Err(e) = spawned {
            debug!(container_id = %container_id, error = %e, "Detached container removal failed");
        }
    }
}
