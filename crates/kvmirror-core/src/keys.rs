//! # Keys and Prefixes
//!
//! Every mirror is bound to one prefix for its whole lifetime. Callers use
//! keys relative to that prefix; the table and the remote store use
//! absolute keys.
//!
//! ```text
//!   Prefix::new("foo")          root = "foo/"
//!   resolve("bar")          →   "foo/bar"
//!   relative("foo/c/baz")   →   Some("c/baz")
//!   sentinel_key()          →   "foo/__sync"
//! ```
//!
//! ## The Sentinel
//! The remote store's recursive watch cannot report a deleted key while
//! sibling keys still exist. A writer that deletes a key therefore also
//! writes `<prefix>/__sync`; any watch response containing a key whose
//! trailing segment is `__sync` means "drop incremental state and resync".

/// Reserved trailing segment used as the full-resync signal.
pub const SENTINEL_KEY: &str = "__sync";

/// Returns the last `/`-separated segment of a key.
///
/// `"foo/bar/__sync"` → `"__sync"`, `"foo/dir/"` → `""`.
pub fn trailing_segment(key: &str) -> &str {
    match key.rfind('/') {
        Some(pos) => &key[pos + 1..],
        None => key,
    }
}

/// Returns true if the key is a sentinel key at any depth.
pub fn is_sentinel(key: &str) -> bool {
    trailing_segment(key) == SENTINEL_KEY
}

// =============================================================================
// Prefix
// =============================================================================

/// The root path a mirror operates under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Prefix {
    root: String,
}

impl Prefix {
    /// Normalizes a prefix.
    ///
    /// Leading slashes are dropped and a single trailing slash is ensured,
    /// so `"foo"`, `"/foo"` and `"foo/"` are the same prefix. An empty
    /// prefix mirrors the whole store.
    pub fn new(prefix: &str) -> Self {
        let trimmed = prefix.trim_start_matches('/').trim_end_matches('/');
        let root = if trimmed.is_empty() {
            String::new()
        } else {
            format!("{}/", trimmed)
        };
        Prefix { root }
    }

    /// The normalized root, including its trailing slash.
    pub fn as_str(&self) -> &str {
        &self.root
    }

    /// Resolves a relative key to an absolute key.
    pub fn resolve(&self, key: &str) -> String {
        format!("{}{}", self.root, key)
    }

    /// Strips the prefix from an absolute key.
    ///
    /// Returns `None` if the key does not live under this prefix.
    pub fn relative<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.root.as_str())
    }

    /// Returns true if the absolute key lives under this prefix.
    pub fn contains(&self, key: &str) -> bool {
        key.starts_with(self.root.as_str())
    }

    /// The absolute sentinel key for this prefix.
    pub fn sentinel_key(&self) -> String {
        self.resolve(SENTINEL_KEY)
    }
}

impl std::fmt::Display for Prefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_normalization() {
        assert_eq!(Prefix::new("foo").as_str(), "foo/");
        assert_eq!(Prefix::new("/foo/").as_str(), "foo/");
        assert_eq!(Prefix::new("foo/bar").as_str(), "foo/bar/");
        assert_eq!(Prefix::new("").as_str(), "");
        assert_eq!(Prefix::new("/").as_str(), "");
    }

    #[test]
    fn test_resolve_and_relative() {
        let prefix = Prefix::new("foo");
        assert_eq!(prefix.resolve("bar"), "foo/bar");
        assert_eq!(prefix.relative("foo/c/baz"), Some("c/baz"));
        assert_eq!(prefix.relative("food/bar"), None);
        assert!(prefix.contains("foo/x"));
        assert!(!prefix.contains("foobar"));
    }

    #[test]
    fn test_sentinel_detection() {
        assert!(is_sentinel("foo/__sync"));
        assert!(is_sentinel("foo/nested/__sync"));
        assert!(is_sentinel("__sync"));
        assert!(!is_sentinel("foo/__sync/child"));
        assert!(!is_sentinel("foo/__synced"));
        assert_eq!(trailing_segment("foo/dir/"), "");
        assert_eq!(Prefix::new("foo").sentinel_key(), "foo/__sync");
    }
}
