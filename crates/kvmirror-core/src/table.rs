//! # Mirror Table
//!
//! The entry map plus the high-water clock, without any locking. The I/O
//! crate wraps one `MirrorTable` in a reader-writer lock per mirror.
//!
//! ## Mutation Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  replace(listing)   Full resync. Builds a fresh map and swaps it in.    │
//! │                     Keys missing from the listing disappear.            │
//! │                                                                         │
//! │  merge(changes)     Incremental. Upsert only - a watch response can     │
//! │                     never express a deletion.                           │
//! │                                                                         │
//! │  upsert_local()     After a successful remote write. Version is the     │
//! │                     current clock, not a new one.                       │
//! │                                                                         │
//! │  remove()           After a successful remote delete.                   │
//! │                                                                         │
//! │  In every case: clock never decreases, clock ≥ every entry's version,   │
//! │  sentinel keys are never stored.                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;

use crate::keys::{is_sentinel, Prefix};
use crate::types::{ClockValue, Entry, RemoteEntry, RemoteListing};

/// Outcome of an incremental merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Entries inserted or overwritten.
    pub applied: usize,

    /// Entries skipped because the table already holds a newer version.
    pub stale: usize,

    /// Entries skipped because they are sentinels or outside the prefix.
    pub ignored: usize,
}

/// Entries keyed by absolute key, plus the high-water clock.
#[derive(Debug, Clone, Default)]
pub struct MirrorTable {
    entries: HashMap<String, Entry>,
    clock: ClockValue,
}

impl MirrorTable {
    /// Creates an empty table with clock 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest version observed so far.
    pub fn clock(&self) -> ClockValue {
        self.clock
    }

    /// Looks up an entry by absolute key.
    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.entries.get(key)
    }

    /// Returns every entry whose absolute key starts with `prefix`, along with
    /// the highest version among them (0 when nothing matches).
    ///
    /// Linear scan; the order of the returned entries is unspecified.
    pub fn get_prefix(&self, prefix: &str) -> (Vec<Entry>, ClockValue) {
        let mut max = 0;
        let mut values = Vec::new();

        for (key, entry) in &self.entries {
            if key.starts_with(prefix) {
                max = max.max(entry.clock);
                values.push(entry.clone());
            }
        }

        (values, max)
    }

    /// Replaces the whole table with the contents of a listing.
    ///
    /// Returns the number of entries now stored.
    pub fn replace(&mut self, listing: &RemoteListing, prefix: &Prefix) -> usize {
        let mut fresh = HashMap::with_capacity(listing.entries.len());

        for remote in &listing.entries {
            if let Some(entry) = admit(remote, prefix) {
                fresh.insert(remote.key.clone(), entry);
            }
        }

        self.entries = fresh;
        self.raise_clock(listing.index.max(listing.max_modify_index()));
        self.entries.len()
    }

    /// Upserts changed keys from a watch response and raises the clock to
    /// `index`.
    ///
    /// An entry is only overwritten if the incoming version is not older than
    /// the stored one, so per-key versions never go backwards.
    pub fn merge(
        &mut self,
        changes: &[RemoteEntry],
        index: ClockValue,
        prefix: &Prefix,
    ) -> MergeSummary {
        let mut summary = MergeSummary::default();
        let mut high = index;

        for remote in changes {
            let Some(entry) = admit(remote, prefix) else {
                summary.ignored += 1;
                continue;
            };

            if let Some(existing) = self.entries.get(&remote.key) {
                if existing.clock > entry.clock {
                    summary.stale += 1;
                    continue;
                }
            }

            high = high.max(entry.clock);
            self.entries.insert(remote.key.clone(), entry);
            summary.applied += 1;
        }

        self.raise_clock(high);
        summary
    }

    /// Stores a locally written value, versioned at the current clock.
    pub fn upsert_local(&mut self, key: &str, relative: &str, value: Vec<u8>) -> &Entry {
        let entry = Entry::new(relative, value, self.clock);
        self.entries.insert(key.to_string(), entry);
        &self.entries[key]
    }

    /// Removes an entry by absolute key. The clock is left untouched.
    pub fn remove(&mut self, key: &str) -> Option<Entry> {
        self.entries.remove(key)
    }

    /// Drops every entry. The clock is left untouched.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn raise_clock(&mut self, candidate: ClockValue) {
        if candidate > self.clock {
            self.clock = candidate;
        }
    }
}

/// Converts a remote entry into a stored entry, or `None` if it must not be
/// stored (sentinel or outside the prefix).
fn admit(remote: &RemoteEntry, prefix: &Prefix) -> Option<Entry> {
    if is_sentinel(&remote.key) {
        return None;
    }

    let relative = prefix.relative(&remote.key)?;
    Some(Entry::new(
        relative,
        remote.value.clone(),
        remote.modify_index,
    ))
}
