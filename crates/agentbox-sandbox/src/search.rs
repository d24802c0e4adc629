//! Pattern helpers shared by the filesystem and state backends

use crate::types::GrepMatch;
use globset::{Glob, GlobBuilder, GlobMatcher};
use regex::Regex;
use std::path::Path;

/// Compiled `glob_info` pattern
///
/// A trailing `/` selects directories; otherwise only files match.
#[derive(Debug, Clone)]
pub struct PathPattern {
    matcher: GlobMatcher,
    dirs: bool,
}

impl PathPattern {
    /// Compile a glob where `*` stays within one path segment and `**`
    /// crosses segments
    pub fn new(pattern: &str) -> std::result::Result<Self, String> {
        let dirs = pattern.ends_with('/');
        let trimmed = pattern.trim_end_matches('/');
        let matcher = GlobBuilder::new(trimmed)
            .literal_separator(true)
            .build()
            .map_err(|e| format!("Invalid glob pattern: {}", e))?
            .compile_matcher();
        Ok(Self { matcher, dirs })
    }

    /// Whether `relative` (relative to the search base) matches
    #[must_use]
    pub fn is_match(&self, relative: &str, is_dir: bool) -> bool {
        is_dir == self.dirs && self.matcher.is_match(Path::new(relative))
    }
}

/// `--include`-style file filter for grep: matches the file name or the
/// path relative to the search base
#[derive(Debug, Clone)]
pub struct IncludeFilter(GlobMatcher);

impl IncludeFilter {
    /// Compile the filter
    pub fn new(glob: &str) -> std::result::Result<Self, String> {
        Glob::new(glob)
            .map(|g| Self(g.compile_matcher()))
            .map_err(|e| format!("Invalid glob pattern: {}", e))
    }

    /// Whether the file passes the filter
    #[must_use]
    pub fn allows(&self, relative: &str) -> bool {
        let name = relative.rsplit('/').next().unwrap_or(relative);
        self.0.is_match(Path::new(name)) || self.0.is_match(Path::new(relative))
    }
}

/// Compile a grep pattern, producing the agent-facing message on failure
pub fn compile_regex(pattern: &str) -> std::result::Result<Regex, String> {
    Regex::new(pattern).map_err(|e| format!("Invalid regex pattern: {}", e))
}

/// Collect matching lines of `content`
#[must_use]
pub fn grep_content(regex: &Regex, path: &str, content: &str) -> Vec<GrepMatch> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| regex.is_match(line))
        .map(|(i, line)| GrepMatch {
            path: path.to_string(),
            line: i + 1,
            text: line.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_star_stays_in_segment() {
        let pattern = PathPattern::new("*.py").unwrap();
        assert!(pattern.is_match("main.py", false));
        assert!(!pattern.is_match("pkg/main.py", false));
    }

    #[test]
    fn test_glob_double_star_recurses() {
        let pattern = PathPattern::new("**/*.py").unwrap();
        assert!(pattern.is_match("pkg/main.py", false));
        assert!(pattern.is_match("a/b/c.py", false));
    }

    #[test]
    fn test_glob_directories_need_trailing_slash() {
        let files = PathPattern::new("src").unwrap();
        assert!(!files.is_match("src", true));

        let dirs = PathPattern::new("src/").unwrap();
        assert!(dirs.is_match("src", true));
        assert!(!dirs.is_match("src", false));
    }

    #[test]
    fn test_include_filter() {
        let filter = IncludeFilter::new("*.rs").unwrap();
        assert!(filter.allows("src/lib.rs"));
        assert!(!filter.allows("README.md"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(compile_regex("(unclosed").unwrap_err().starts_with("Invalid regex"));
        assert!(PathPattern::new("[").is_err());
    }

    #[test]
    fn test_grep_content_line_numbers() {
        let re = compile_regex("needle").unwrap();
        let matches = grep_content(&re, "/f.txt", "hay\nneedle here\nhay\nneedle");
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].line, 2);
        assert_eq!(matches[1].line, 4);
        assert_eq!(matches[1].text, "needle");
    }
}
