//! Result value objects shared by every backend

use serde::{Deserialize, Serialize};

/// One listed or matched filesystem object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Path of the entry; directories end with `/`
    pub path: String,
    /// Whether the entry is a directory
    pub is_dir: bool,
    /// Size in bytes (0 for directories)
    pub size: u64,
    /// RFC 3339 modification time, empty when unknown
    pub modified_at: String,
}

impl FileInfo {
    /// Create a file entry
    #[must_use]
    pub fn file(path: impl Into<String>, size: u64, modified_at: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            is_dir: false,
            size,
            modified_at: modified_at.into(),
        }
    }

    /// Create a directory entry, appending the trailing separator if missing
    #[must_use]
    pub fn dir(path: impl Into<String>, modified_at: impl Into<String>) -> Self {
        let mut path = path.into();
        if !path.ends_with('/') {
            path.push('/');
        }
        Self {
            path,
            is_dir: true,
            size: 0,
            modified_at: modified_at.into(),
        }
    }
}

/// Outcome of a shell command
///
/// `truncated` only reports that output was dropped; it says nothing about
/// whether the command itself succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    /// Merged stdout and stderr, capped to the backend's output budget
    pub output: String,
    /// Process exit code, `-1` for timeouts and spawn failures
    pub exit_code: i32,
    /// Whether output was cut at the budget
    pub truncated: bool,
}

impl ExecuteResponse {
    /// Create a failed response that carries only an explanation
    #[must_use]
    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            exit_code: -1,
            truncated: false,
        }
    }

    /// Whether the command exited with status 0
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Outcome of `write` and `upload_file`
///
/// Exactly one of `path` and `error` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResult {
    /// Written path on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Reason the write was refused
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WriteResult {
    /// Successful write
    #[must_use]
    pub fn ok(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            error: None,
        }
    }

    /// Refused write
    #[must_use]
    pub fn err(error: impl Into<String>) -> Self {
        Self {
            path: None,
            error: Some(error.into()),
        }
    }

    /// Whether the write succeeded
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of `edit`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditResult {
    /// Edited path on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Reason the edit was refused
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Number of replacements performed
    pub occurrences: usize,
}

impl EditResult {
    /// Successful edit
    #[must_use]
    pub fn ok(path: impl Into<String>, occurrences: usize) -> Self {
        Self {
            path: Some(path.into()),
            error: None,
            occurrences,
        }
    }

    /// Refused edit
    #[must_use]
    pub fn err(error: impl Into<String>) -> Self {
        Self {
            path: None,
            error: Some(error.into()),
            occurrences: 0,
        }
    }

    /// Whether the edit succeeded
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// One matching line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrepMatch {
    /// File containing the match
    pub path: String,
    /// 1-based line number
    pub line: usize,
    /// Line content
    pub text: String,
}

/// Outcome of `grep_raw`: matches, or a description of why the search
/// could not run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GrepOutput {
    /// Matching lines (possibly none)
    Matches(Vec<GrepMatch>),
    /// Search could not be performed
    Error(String),
}

impl GrepOutput {
    /// Matches, or an empty slice for the error variant
    #[must_use]
    pub fn matches(&self) -> &[GrepMatch] {
        match self {
            Self::Matches(m) => m,
            Self::Error(_) => &[],
        }
    }

    /// Error description, if any
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Matches(_) => None,
            Self::Error(e) => Some(e),
        }
    }
}

/// Outcome of `download_file`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloadResult {
    /// Requested path
    pub path: String,
    /// Raw file bytes on success
    pub content: Option<Vec<u8>>,
    /// Reason the download failed
    pub error: Option<String>,
}

impl DownloadResult {
    /// Successful download
    #[must_use]
    pub fn ok(path: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            content: Some(content),
            error: None,
        }
    }

    /// Failed download
    #[must_use]
    pub fn err(path: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: None,
            error: Some(error.into()),
        }
    }
}

/// Isolation strength a backend provides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationTier {
    /// Files live in memory but commands run on the host
    None,
    /// Real files under a root; jailed only in virtual mode
    HostPath,
    /// Everything runs inside a container
    Container,
}

impl IsolationTier {
    /// Get human-readable name for the tier
    #[must_use]
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::None => "none (host shell)",
            Self::HostPath => "host path",
            Self::Container => "container",
        }
    }
}

/// Messages shared by every backend so the agent sees the same wording
/// regardless of tier.
pub(crate) mod messages {
    pub fn not_found(path: &str) -> String {
        format!("Error: File '{path}' not found")
    }

    pub fn already_exists(path: &str) -> String {
        format!(
            "Cannot write to {path} because it already exists. \
             Read and then make an edit, or write to a new path."
        )
    }

    pub fn write_failed(path: &str, reason: impl std::fmt::Display) -> String {
        format!("Failed to write file {path}: {reason}")
    }
}
