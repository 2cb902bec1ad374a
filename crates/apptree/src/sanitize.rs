//! File-name sanitizing for instance names, and helpers for keeping
//! absolute paths out of log and span fields.
//!
//! Mapping policy for one path component:
//! - `/ \ : * ? " < > |`, C0 control characters and DEL become `_`
//! - a leading `.` becomes `_` (hidden entries are skipped when reading)
//! - everything else, including non-ASCII text, is kept as is
//!
//! A component that is empty after mapping cannot be used.

use std::path::Path;

const REPLACEMENT: char = '_';

/// C0 controls and DEL. C1 controls pass through like any other character.
fn is_control(c: char) -> bool {
    matches!(c, '\u{0}'..='\u{1f}' | '\u{7f}')
}

fn is_unsafe(c: char) -> bool {
    matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') || is_control(c)
}

/// Maps a name onto a single filesystem-safe path component.
///
/// Returns `None` when nothing usable is left.
pub fn sanitize_component(name: &str) -> Option<String> {
    if name.is_empty() {
        return None;
    }

    let mut out: String = name
        .chars()
        .map(|c| if is_unsafe(c) { REPLACEMENT } else { c })
        .collect();

    if out.starts_with('.') {
        out.replace_range(..1, "_");
    }

    Some(out)
}

/// Validates one component of a verbatim relative path, e.g. a function
/// source such as `foo/bar.js`.
///
/// Unlike instance names these are kept as written; components that would
/// escape the directory, or be skipped as hidden on the way back, are rejected.
pub fn is_valid_relative_component(component: &str) -> bool {
    !component.is_empty()
        && !is_hidden(component)
        && !component.contains('\\')
        && !component.chars().any(is_control)
}

/// Returns true for names the reader treats as hidden.
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Returns only the filename component of a path (no directory).
///
/// Safe for span fields, reveals the file name without exposing the full path.
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}
