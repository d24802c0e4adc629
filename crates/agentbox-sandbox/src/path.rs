//! Virtual-root path jail
//!
//! In virtual mode every caller path is interpreted relative to the backend
//! root (`/notes.txt` means `<root>/notes.txt`). Parent components and `~`
//! are rejected outright, and the resolved path, including any symlinks in
//! its existing prefix, must stay under the root.

use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};
use tracing::warn;

/// Resolve a caller path inside `root`, rejecting anything that escapes it
///
/// `root` must already be canonical. No filesystem mutation happens here.
pub fn resolve_virtual(root: &Path, path: &str) -> Result<PathBuf> {
    if path.starts_with('~') {
        warn!(path = %path, "Home-relative path rejected");
        return Err(Error::InvalidPath(format!(
            "'{}': home-relative paths are not allowed",
            path
        )));
    }

    let candidate = Path::new(path);
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        warn!(path = %path, "Path traversal attempt detected");
        return Err(Error::PathOutsideRoot(path.to_string()));
    }

    let mut resolved = root.to_path_buf();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            Component::ParentDir => return Err(Error::PathOutsideRoot(path.to_string())),
        }
    }

    if !resolved.starts_with(root) {
        return Err(Error::PathOutsideRoot(path.to_string()));
    }

    // Symlinks inside the root may still point elsewhere
    if let Some(existing) = deepest_existing(&resolved) {
        let canonical = existing.canonicalize()?;
        if !canonical.starts_with(root) {
            warn!(
                path = %path,
                resolved = %canonical.display(),
                "Symlink escape blocked"
            );
            return Err(Error::PathOutsideRoot(path.to_string()));
        }
    }

    Ok(resolved)
}

/// Render a host path under `root` back into its virtual `/`-rooted form
#[must_use]
pub fn to_virtual(root: &Path, full: &Path) -> String {
    match full.strip_prefix(root) {
        Ok(rel) => {
            let parts: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            format!("/{}", parts.join("/"))
        }
        Err(_) => full.to_string_lossy().into_owned(),
    }
}

fn deepest_existing(path: &Path) -> Option<&Path> {
    path.ancestors().find(|p| p.symlink_metadata().is_ok())
}

/// Normalise an in-memory key: absolute, `/`-separated, no `.` or empty
/// segments. Parent components are rejected.
pub fn normalize_key(path: &str) -> Result<String> {
    let mut parts = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => return Err(Error::PathOutsideRoot(path.to_string())),
            other => parts.push(other),
        }
    }
    Ok(format!("/{}", parts.join("/")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let canonical = dir.path().canonicalize().unwrap();
        (dir, canonical)
    }

    #[test]
    fn test_absolute_paths_map_into_root() {
        let (_guard, root) = root();
        let resolved = resolve_virtual(&root, "/etc/passwd").unwrap();
        assert_eq!(resolved, root.join("etc").join("passwd"));
    }

    #[test]
    fn test_relative_paths_map_into_root() {
        let (_guard, root) = root();
        let resolved = resolve_virtual(&root, "a/./b.txt").unwrap();
        assert_eq!(resolved, root.join("a").join("b.txt"));
    }

    #[test]
    fn test_parent_components_rejected() {
        let (_guard, root) = root();
        assert!(matches!(
            resolve_virtual(&root, "../../etc/passwd"),
            Err(Error::PathOutsideRoot(_))
        ));
        assert!(resolve_virtual(&root, "/a/../../b").is_err());
    }

    #[test]
    fn test_home_paths_rejected() {
        let (_guard, root) = root();
        assert!(matches!(
            resolve_virtual(&root, "~/.ssh/id_rsa"),
            Err(Error::InvalidPath(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_rejected() {
        let (_guard, root) = root();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("link")).unwrap();

        assert!(matches!(
            resolve_virtual(&root, "/link/file.txt"),
            Err(Error::PathOutsideRoot(_))
        ));
    }

    #[test]
    fn test_to_virtual() {
        let root = Path::new("/srv/ws");
        assert_eq!(to_virtual(root, Path::new("/srv/ws/a/b.txt")), "/a/b.txt");
        assert_eq!(to_virtual(root, Path::new("/srv/ws")), "/");
        assert_eq!(to_virtual(root, Path::new("/other")), "/other");
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("a//b/./c").unwrap(), "/a/b/c");
        assert_eq!(normalize_key("/").unwrap(), "/");
        assert!(normalize_key("/a/../b").is_err());
    }
}
