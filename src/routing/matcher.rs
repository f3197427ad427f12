//! Path matching helpers.
//!
//! # Design Decisions
//! - Prefix matching respects segment boundaries: "/hmrc" matches
//!   "/hmrc/x" but not "/hmrc-sandbox/x"
//! - Path matching is case-sensitive
//! - No regex, guaranteed O(n) matching

/// First non-empty path segment, e.g. "hmrc" for "/hmrc/organisations".
pub fn first_segment(path: &str) -> Option<&str> {
    path.trim_start_matches('/')
        .split('/')
        .next()
        .filter(|s| !s.is_empty())
}

/// True if `path` lies under `prefix` on a segment boundary.
pub fn matches_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Remove `prefix` from `path` if it matches; the result always starts with '/'.
pub fn strip_prefix(path: &str, prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    let rest = if !trimmed.is_empty() && matches_prefix(path, trimmed) {
        &path[trimmed.len()..]
    } else {
        path
    };

    if rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("/{}", rest)
    }
}
