//! Cache key sanitization
//!
//! Keys become file names on disk, so anything outside `[A-Za-z0-9_-]` is
//! replaced with `_`. Two keys that differ only in replaced characters share
//! one slot (`"page:0"` and `"page/0"` both map to `page_0`).

/// Suffix appended to a sanitized key to name its metadata sidecar
pub const METADATA_EXTENSION: &str = "meta";

/// Maps a cache key onto the allowed character set
///
/// An empty key maps to `_` so it never resolves to the cache directory itself.
pub fn sanitize_key(key: &str) -> String {
    if key.is_empty() {
        return "_".to_string();
    }

    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
