//! Markdown cleanup for extractor output.

/// Remove a spurious duplicated table header-separator line.
///
/// Some extraction backends emit the `|---|---|` separator twice in a
/// row; markdown renderers then treat the second copy as a table row of
/// dashes. A single deterministic pass drops any separator line that
/// immediately follows another separator line and leaves everything else
/// untouched.
pub fn normalize_markdown(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut previous_was_separator = false;

    for line in input.lines() {
        let is_separator = is_table_separator(line);
        if is_separator && previous_was_separator {
            continue;
        }
        out.push_str(line);
        out.push('\n');
        previous_was_separator = is_separator;
    }

    if !input.ends_with('\n') {
        out.pop();
    }
    out
}

/// A table header-separator line: pipes, dashes, colons, and spaces only,
/// with at least one pipe and one dash.
fn is_table_separator(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.contains('|')
        && trimmed.contains('-')
        && trimmed
            .chars()
            .all(|c| matches!(c, '|' | '-' | ':' | ' '))
}
