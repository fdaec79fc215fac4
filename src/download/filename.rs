//! Filesystem-safe names for downloaded tracks.

/// Maximum length (in characters) of a derived file name.
pub const MAX_NAME_LEN: usize = 100;

/// Characters rejected in a path segment on at least one supported platform.
const ILLEGAL: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Strip illegal characters from a title and bound its length.
///
/// Surrounding whitespace and trailing dots are removed. The result may be
/// empty; callers fall back to the remote identifier in that case.
pub fn sanitize_filename(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| !ILLEGAL.contains(c) && !c.is_control())
        .collect();

    let truncated: String = trim_name(&cleaned).chars().take(MAX_NAME_LEN).collect();
    trim_name(&truncated).to_string()
}

fn trim_name(name: &str) -> &str {
    name.trim_start()
        .trim_end_matches(|c: char| c == '.' || c.is_whitespace())
}

/// Name used for the output file of a download.
pub fn derive_name(title: &str, identifier: &str) -> String {
    let safe = sanitize_filename(title);
    if safe.is_empty() {
        identifier.to_string()
    } else {
        safe
    }
}
