//! # Mirror Types
//!
//! Data carried between the remote store and the local mirror.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Remote side (absolute keys)          Local side (relative keys)        │
//! │  ┌─────────────────────┐              ┌─────────────────────┐           │
//! │  │   RemoteListing     │              │       Entry         │           │
//! │  │  ─────────────────  │   merge /    │  ─────────────────  │           │
//! │  │  entries            │ ───────────► │  key   "bar"        │           │
//! │  │  index (high-water) │   replace    │  value b"hello"     │           │
//! │  └─────────┬───────────┘              │  clock 42           │           │
//! │            │                          └─────────────────────┘           │
//! │  ┌─────────▼───────────┐                                                │
//! │  │    RemoteEntry      │                                                │
//! │  │  key  "foo/bar"     │                                                │
//! │  │  modify_index 42    │                                                │
//! │  └─────────────────────┘                                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

/// Version number assigned by the remote store.
///
/// Used both as a per-entry version and as the mirror's high-water clock.
pub type ClockValue = u64;

// =============================================================================
// Entry
// =============================================================================

/// A mirrored value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Key relative to the mirror's prefix.
    pub key: String,

    /// Opaque value bytes.
    pub value: Vec<u8>,

    /// Version of this value as far as the mirror knows.
    ///
    /// After a local write this is the mirror clock at write time; the
    /// remote-assigned version replaces it on the next sync.
    pub clock: ClockValue,
}

impl Entry {
    /// Creates an entry.
    pub fn new(key: impl Into<String>, value: Vec<u8>, clock: ClockValue) -> Self {
        Entry {
            key: key.into(),
            value,
            clock,
        }
    }
}

// =============================================================================
// Remote Entry
// =============================================================================

/// A key as reported by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Absolute key (includes the mirror prefix).
    pub key: String,

    /// Raw value bytes.
    pub value: Vec<u8>,

    /// Index at which the key was created.
    pub create_index: ClockValue,

    /// Index of the last modification.
    pub modify_index: ClockValue,

    /// Opaque client flags stored alongside the value.
    pub flags: u64,
}

impl RemoteEntry {
    /// Creates a remote entry created and last modified at `modify_index`.
    pub fn new(key: impl Into<String>, value: Vec<u8>, modify_index: ClockValue) -> Self {
        RemoteEntry {
            key: key.into(),
            value,
            create_index: modify_index,
            modify_index,
            flags: 0,
        }
    }
}

// =============================================================================
// Remote Listing
// =============================================================================

/// The result of a list or watch call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteListing {
    /// Entries in the response (all keys for a list, changed keys for a watch).
    pub entries: Vec<RemoteEntry>,

    /// Response-level high-water index.
    pub index: ClockValue,
}

impl RemoteListing {
    /// Creates a listing.
    pub fn new(entries: Vec<RemoteEntry>, index: ClockValue) -> Self {
        RemoteListing { entries, index }
    }

    /// A listing with no entries.
    pub fn empty(index: ClockValue) -> Self {
        RemoteListing {
            entries: Vec::new(),
            index,
        }
    }

    /// Returns true if the listing carries no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest modify index among the entries (0 if there are none).
    pub fn max_modify_index(&self) -> ClockValue {
        self.entries
            .iter()
            .map(|e| e.modify_index)
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_max_modify_index() {
        let listing = RemoteListing::new(
            vec![
                RemoteEntry::new("foo/a", vec![], 3),
                RemoteEntry::new("foo/b", vec![], 11),
            ],
            12,
        );
        assert_eq!(listing.max_modify_index(), 11);
        assert!(!listing.is_empty());

        assert_eq!(RemoteListing::empty(5).max_modify_index(), 0);
    }

    #[test]
    fn test_entry_serializes() {
        let entry = Entry::new("bar", b"hi".to_vec(), 4);
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"key\":\"bar\""));
        assert!(json.contains("\"clock\":4"));
    }
}
