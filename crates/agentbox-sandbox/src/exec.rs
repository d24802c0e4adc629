//! Shared timeout and truncation policy for command execution
//!
//! Every backend funnels its command output through [`finish`] so the
//! output budget, the `(no output)` placeholder and the timeout wording are
//! identical across isolation tiers. Child pipes are read through
//! [`wait_capped`], so a noisy command costs at most a few bytes per budget
//! character no matter how much it prints.

use crate::types::ExecuteResponse;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Placeholder for commands that printed nothing
pub const NO_OUTPUT: &str = "(no output)";

/// Timeout and output budget applied to a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecLimits {
    /// Wall-clock limit
    pub timeout: Duration,
    /// Maximum output length in characters
    pub max_output: usize,
}

impl ExecLimits {
    /// Create limits from a timeout in seconds and a character budget
    #[must_use]
    pub fn new(timeout_secs: u64, max_output: usize) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
            max_output,
        }
    }
}

/// Cut `output` to at most `max` characters
///
/// Returns the (possibly shortened) output and whether anything was dropped.
#[must_use]
pub fn truncate_output(mut output: String, max: usize) -> (String, bool) {
    match output.char_indices().nth(max) {
        Some((idx, _)) => {
            output.truncate(idx);
            (output, true)
        }
        None => (output, false),
    }
}

/// Merge stdout and stderr, decoding invalid UTF-8 permissively
#[must_use]
pub fn merge_output(stdout: &[u8], stderr: &[u8]) -> String {
    let stdout = String::from_utf8_lossy(stdout);
    let stderr = String::from_utf8_lossy(stderr);

    if stderr.is_empty() {
        stdout.into_owned()
    } else if stdout.is_empty() {
        stderr.into_owned()
    } else {
        format!("{}\n{}", stdout, stderr)
    }
}

/// Apply the output budget and build the response
///
/// `discarded` reports bytes already dropped while reading the pipes; it
/// marks the response truncated even when the kept part fits the budget.
/// The placeholder only stands in for output that was empty to begin with.
#[must_use]
pub fn finish(
    output: String,
    exit_code: i32,
    max_output: usize,
    discarded: bool,
) -> ExecuteResponse {
    let (output, cut) = truncate_output(output, max_output);
    let truncated = cut || discarded;
    let output = if output.is_empty() && !truncated {
        NO_OUTPUT.to_string()
    } else {
        output
    };

    ExecuteResponse {
        output,
        exit_code,
        truncated,
    }
}

/// Response for a command that exceeded its time limit
#[must_use]
pub fn timed_out(timeout: Duration) -> ExecuteResponse {
    ExecuteResponse::failure(format!(
        "Error: Command execution timed out ({} seconds limit)",
        timeout.as_secs()
    ))
}

/// Response for a command that could not be run at all
#[must_use]
pub fn spawn_failed(err: impl std::fmt::Display) -> ExecuteResponse {
    ExecuteResponse::failure(format!("Error executing command: {}", err))
}

// ============================================================================
// Bounded Pipe Reading
// ============================================================================

/// Bytes kept per stream for a budget of `max_output` characters
///
/// A character is at most four UTF-8 bytes, so the extra byte guarantees
/// that a stream hitting the cap also overflows the character budget.
#[must_use]
pub fn byte_cap(max_output: usize) -> u64 {
    (max_output as u64).saturating_mul(4).saturating_add(1)
}

/// Read at most `cap` bytes from `reader`, then drain the rest
///
/// Draining keeps the writer from blocking on a full pipe. Returns the kept
/// bytes and whether anything past the cap was thrown away.
pub async fn read_capped<R>(mut reader: R, cap: u64) -> io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::new();
    (&mut reader).take(cap).read_to_end(&mut kept).await?;
    let dropped = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
    Ok((kept, dropped > 0))
}

/// Child output collected through [`read_capped`]
#[derive(Debug)]
pub struct CappedOutput {
    /// Exit status of the child
    pub status: ExitStatus,
    /// Kept stdout bytes
    pub stdout: Vec<u8>,
    /// Kept stderr bytes
    pub stderr: Vec<u8>,
    /// Whether either stream went past the cap
    pub discarded: bool,
}

/// Wait for `child`, keeping at most `cap` bytes of each piped stream
pub async fn wait_capped(mut child: Child, cap: u64) -> io::Result<CappedOutput> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let read_stdout = async {
        match stdout {
            Some(pipe) => read_capped(pipe, cap).await,
            None => Ok((Vec::new(), false)),
        }
    };
    let read_stderr = async {
        match stderr {
            Some(pipe) => read_capped(pipe, cap).await,
            None => Ok((Vec::new(), false)),
        }
    };

    let ((stdout, out_dropped), (stderr, err_dropped)) =
        tokio::try_join!(read_stdout, read_stderr)?;
    let status = child.wait().await?;

    Ok(CappedOutput {
        status,
        stdout,
        stderr,
        discarded: out_dropped || err_dropped,
    })
}

// ============================================================================
// Host Shell
// ============================================================================

/// Run `command` through `sh -c` on the host
///
/// The child is killed when the timeout fires. `cwd` pins the working
/// directory; `None` inherits the current process directory.
pub async fn run_shell(command: &str, cwd: Option<&Path>, limits: ExecLimits) -> ExecuteResponse {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(error = %e, "Failed to spawn shell");
            return spawn_failed(e);
        }
    };

    // Dropping the wait future on timeout drops the child, which kills it.
    let cap = byte_cap(limits.max_output);
    let output = match tokio::time::timeout(limits.timeout, wait_capped(child, cap)).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return spawn_failed(e),
        Err(_) => {
            warn!(timeout_secs = limits.timeout.as_secs(), "Command timed out");
            return timed_out(limits.timeout);
        }
    };

    let exit_code = output.status.code().unwrap_or(-1);
    let response = finish(
        merge_output(&output.stdout, &output.stderr),
        exit_code,
        limits.max_output,
        output.discarded,
    );

    debug!(
        exit_code = response.exit_code,
        output_len = response.output.len(),
        truncated = response.truncated,
        "Shell command completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_exact_budget_is_untouched() {
        let (out, truncated) = truncate_output("abcde".to_string(), 5);
        assert_eq!(out, "abcde");
        assert!(!truncated);
    }

    #[test]
    fn test_truncate_one_over_budget() {
        let (out, truncated) = truncate_output("abcdef".to_string(), 5);
        assert_eq!(out, "abcde");
        assert!(truncated);
    }

    #[test]
    fn test_truncate_counts_characters_not_bytes() {
        let (out, truncated) = truncate_output("ééé".to_string(), 2);
        assert_eq!(out, "éé");
        assert!(truncated);
    }

    #[test]
    fn test_merge_output() {
        assert_eq!(merge_output(b"out", b""), "out");
        assert_eq!(merge_output(b"", b"err"), "err");
        assert_eq!(merge_output(b"out", b"err"), "out\nerr");
        assert_eq!(merge_output(&[0x66, 0xff], b""), "f\u{fffd}");
    }

    #[test]
    fn test_finish_placeholder() {
        let resp = finish(String::new(), 0, 10, false);
        assert_eq!(resp.output, NO_OUTPUT);
        assert!(!resp.truncated);
    }

    #[test]
    fn test_finish_zero_budget_keeps_empty_output() {
        let resp = finish("abc".to_string(), 0, 0, false);
        assert_eq!(resp.output, "");
        assert!(resp.truncated);
    }

    #[test]
    fn test_finish_discarded_bytes_mark_truncation() {
        let resp = finish("abc".to_string(), 0, 10, true);
        assert_eq!(resp.output, "abc");
        assert!(resp.truncated);

        let resp = finish(String::new(), 0, 10, true);
        assert_eq!(resp.output, "");
        assert!(resp.truncated);
    }

    #[test]
    fn test_byte_cap_covers_widest_characters() {
        assert_eq!(byte_cap(0), 1);
        assert_eq!(byte_cap(10), 41);
        assert_eq!(byte_cap(usize::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn test_read_capped_keeps_prefix_and_drains_rest() {
        let source = tokio::io::repeat(b'a').take(1 << 20);
        let (kept, dropped) = read_capped(source, 41).await.unwrap();
        assert_eq!(kept.len(), 41);
        assert!(dropped);

        let (kept, dropped) = read_capped(&b"short"[..], 41).await.unwrap();
        assert_eq!(kept, b"short");
        assert!(!dropped);

        let (kept, dropped) = read_capped(&b"exact"[..], 5).await.unwrap();
        assert_eq!(kept, b"exact");
        assert!(!dropped);
    }

    #[tokio::test]
    async fn test_run_shell_merges_streams() {
        let resp = run_shell("echo out; echo err >&2", None, ExecLimits::new(10, 1000)).await;
        assert_eq!(resp.exit_code, 0);
        assert!(resp.output.contains("out"));
        assert!(resp.output.contains("err"));
    }

    #[tokio::test]
    async fn test_run_shell_reports_exit_code() {
        let resp = run_shell("exit 3", None, ExecLimits::new(10, 1000)).await;
        assert_eq!(resp.exit_code, 3);
        assert_eq!(resp.output, NO_OUTPUT);
    }

    #[tokio::test]
    async fn test_run_shell_timeout() {
        let resp = run_shell("sleep 5", None, ExecLimits::new(1, 1000)).await;
        assert_eq!(resp.exit_code, -1);
        assert!(resp.output.contains("timed out"));
        assert!(!resp.truncated);
    }

    #[tokio::test]
    async fn test_run_shell_truncation_boundary() {
        let limits = ExecLimits::new(10, 10);

        let resp = run_shell("printf 'aaaaaaaaaaa'", None, limits).await;
        assert!(resp.truncated);
        assert_eq!(resp.output.chars().count(), 10);

        let resp = run_shell("printf 'aaaaaaaaaa'", None, limits).await;
        assert!(!resp.truncated);
        assert_eq!(resp.output.chars().count(), 10);
    }

    #[tokio::test]
    async fn test_run_shell_bounds_memory_for_noisy_commands() {
        // 50 MB of output against a 10 character budget
        let resp = run_shell(
            "head -c 50000000 /dev/zero | tr '\\0' a; echo tail >&2",
            None,
            ExecLimits::new(60, 10),
        )
        .await;
        assert_eq!(resp.exit_code, 0);
        assert!(resp.truncated);
        assert_eq!(resp.output, "aaaaaaaaaa");
    }

    #[tokio::test]
    async fn test_run_shell_uses_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let resp = run_shell("pwd -P", Some(dir.path()), ExecLimits::new(10, 1000)).await;
        let canonical = dir.path().canonicalize().unwrap();
        assert_eq!(resp.output.trim(), canonical.to_string_lossy());
    }
}
