//! Command lines for the in-container listing utilities and parsers for
//! their output
//!
//! All parsers are lenient: lines they cannot make sense of are skipped.

use crate::types::{FileInfo, GrepMatch};
use chrono::DateTime;

/// Quote `s` for `sh -c`
#[must_use]
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn epoch_to_rfc3339(secs: &str) -> String {
    secs.parse::<i64>()
        .ok()
        .and_then(|s| DateTime::from_timestamp(s, 0))
        .map(|t| t.to_rfc3339())
        .unwrap_or_default()
}

fn join_child(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name)
}

// ============================================================================
// ls
// ============================================================================

/// `ls -la` with epoch timestamps so the date is a single column
#[must_use]
pub fn ls_command(path: &str) -> String {
    format!("ls -la --time-style=+%s -- {}", shell_quote(path))
}

/// Parse [`ls_command`] output for the directory `dir`
#[must_use]
pub fn parse_ls(output: &str, dir: &str) -> Vec<FileInfo> {
    let mut infos = Vec::new();
    for line in output.lines() {
        if line.starts_with("total ") {
            continue;
        }
        // perms links owner group size mtime name...
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 7 {
            continue;
        }

        let permissions = parts[0];
        let size = parts[4].parse::<u64>().unwrap_or(0);
        let modified = epoch_to_rfc3339(parts[5]);
        let mut name = parts[6..].join(" ");
        if permissions.starts_with('l') {
            if let Some((link, _target)) = name.split_once(" -> ") {
                name = link.to_string();
            }
        }
        if name == "." || name == ".." {
            continue;
        }

        let path = join_child(dir, &name);
        if permissions.starts_with('d') {
            infos.push(FileInfo::dir(path, modified));
        } else {
            infos.push(FileInfo::file(path, size, modified));
        }
    }
    infos
}

// ============================================================================
// find
// ============================================================================

/// Field separator in `stat` output; unlikely in file names
const STAT_SEP: char = '|';

/// `find` candidates under `base` whose name matches `name_glob`, printed
/// through `stat` as `type|size|mtime|path`
#[must_use]
pub fn find_command(base: &str, name_glob: &str) -> String {
    format!(
        "find {} -mindepth 1 -name {} \\( -type f -o -type d \\) -exec stat -c '%F{sep}%s{sep}%Y{sep}%n' {{}} +",
        shell_quote(base),
        shell_quote(name_glob),
        sep = STAT_SEP
    )
}

/// Parse [`find_command`] output
#[must_use]
pub fn parse_find(output: &str) -> Vec<FileInfo> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.splitn(4, STAT_SEP);
            let kind = fields.next()?;
            let size = fields.next()?.parse::<u64>().unwrap_or(0);
            let modified = epoch_to_rfc3339(fields.next()?);
            let path = fields.next()?;
            if path.is_empty() {
                return None;
            }
            Some(if kind == "directory" {
                FileInfo::dir(path, modified)
            } else {
                FileInfo::file(path, size, modified)
            })
        })
        .collect()
}

// ============================================================================
// grep
// ============================================================================

/// Recursive, line-numbered extended-regex grep
#[must_use]
pub fn grep_command(pattern: &str, path: &str, include: Option<&str>) -> String {
    let mut cmd = String::from("grep -rnIE");
    if let Some(glob) = include {
        cmd.push_str(" --include=");
        cmd.push_str(&shell_quote(glob));
    }
    cmd.push_str(" -e ");
    cmd.push_str(&shell_quote(pattern));
    cmd.push_str(" -- ");
    cmd.push_str(&shell_quote(path));
    cmd
}

/// Parse `path:line:text` lines
#[must_use]
pub fn parse_grep(output: &str) -> Vec<GrepMatch> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.splitn(3, ':');
            let path = fields.next()?;
            let number = fields.next()?.parse::<usize>().ok()?;
            let text = fields.next()?;
            Some(GrepMatch {
                path: path.to_string(),
                line: number,
                text: text.to_string(),
            })
        })
        .collect()
}
