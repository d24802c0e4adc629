//! Line-numbered rendering and string replacement shared by all backends

/// Width of the right-aligned line number column
pub const LINE_NUMBER_WIDTH: usize = 6;

/// Lines longer than this many characters are cut when rendered
pub const MAX_LINE_LENGTH: usize = 2000;

/// Returned by `read` for a file that exists but holds only whitespace
pub const EMPTY_CONTENT_WARNING: &str = "System reminder: File exists but has empty contents";

/// Render lines as `{number:>6}\t{line}`, numbering from `start_line`
#[must_use]
pub fn format_with_line_numbers(lines: &[&str], start_line: usize) -> String {
    lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let line: String = line.chars().take(MAX_LINE_LENGTH).collect();
            format!(
                "{:>width$}\t{}",
                start_line + i,
                line,
                width = LINE_NUMBER_WIDTH
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render a window of `content` for `read`
///
/// `offset` is the 0-based first line, `limit` the maximum number of lines.
#[must_use]
pub fn format_read_response(content: &str, offset: usize, limit: usize) -> String {
    if content.trim().is_empty() {
        return EMPTY_CONTENT_WARNING.to_string();
    }

    let lines: Vec<&str> = content.lines().collect();
    if offset >= lines.len() {
        return format!(
            "Error: Line offset {} exceeds file length ({} lines)",
            offset,
            lines.len()
        );
    }

    let end = offset.saturating_add(limit).min(lines.len());
    format_with_line_numbers(&lines[offset..end], offset + 1)
}

/// Replace `old` with `new` in `content`
///
/// Returns the new content and the number of replacements, or the
/// agent-facing error message. With `replace_all == false` the string must
/// occur exactly once.
pub fn perform_string_replacement(
    content: &str,
    old: &str,
    new: &str,
    replace_all: bool,
) -> std::result::Result<(String, usize), String> {
    if old.is_empty() {
        return Err("Error: old_string must not be empty".to_string());
    }

    let occurrences = content.matches(old).count();
    if occurrences == 0 {
        return Err(format!("Error: String not found in file: '{old}'"));
    }

    if occurrences > 1 && !replace_all {
        return Err(format!(
            "Error: String '{old}' appears {occurrences} times in file. \
             Use replace_all to replace every instance, or provide a more \
             specific string with surrounding context."
        ));
    }

    Ok((content.replace(old, new), occurrences))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_numbers_are_one_based_and_padded() {
        let out = format_with_line_numbers(&["alpha", "beta"], 1);
        assert_eq!(out, "     1\talpha\n     2\tbeta");
    }

    #[test]
    fn test_long_lines_are_cut() {
        let long = "x".repeat(MAX_LINE_LENGTH + 50);
        let out = format_with_line_numbers(&[long.as_str()], 1);
        assert_eq!(out.len(), LINE_NUMBER_WIDTH + 1 + MAX_LINE_LENGTH);
    }

    #[test]
    fn test_read_window() {
        let content = "a\nb\nc\nd\ne";
        let out = format_read_response(content, 1, 2);
        assert_eq!(out, "     2\tb\n     3\tc");
    }

    #[test]
    fn test_read_offset_past_end() {
        let out = format_read_response("a\nb", 5, 10);
        assert_eq!(out, "Error: Line offset 5 exceeds file length (2 lines)");
    }

    #[test]
    fn test_read_empty_file() {
        assert_eq!(format_read_response("", 0, 10), EMPTY_CONTENT_WARNING);
        assert_eq!(format_read_response("  \n", 0, 10), EMPTY_CONTENT_WARNING);
    }

    #[test]
    fn test_replacement_single() {
        let (out, n) = perform_string_replacement("hello world", "world", "rust", false).unwrap();
        assert_eq!(out, "hello rust");
        assert_eq!(n, 1);
    }

    #[test]
    fn test_replacement_counts_all() {
        let (out, n) = perform_string_replacement("a-a-a", "a", "b", true).unwrap();
        assert_eq!(out, "b-b-b");
        assert_eq!(n, 3);
    }

    #[test]
    fn test_replacement_ambiguous_without_replace_all() {
        let err = perform_string_replacement("a-a", "a", "b", false).unwrap_err();
        assert!(err.contains("appears 2 times"));
    }

    #[test]
    fn test_replacement_not_found() {
        let err = perform_string_replacement("abc", "zzz", "y", true).unwrap_err();
        assert!(err.starts_with("Error: String not found"));
    }

    #[test]
    fn test_replacement_rejects_empty_needle() {
        assert!(perform_string_replacement("abc", "", "y", true).is_err());
    }
}
