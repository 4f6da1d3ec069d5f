//! # Watch Planning
//!
//! Decides what the sync engine does with one watch response, and which
//! index it sends on the next call. Kept pure so the engine's branching can
//! be tested without a remote store.
//!
//! ```text
//!   watch response ──► no entries ───────────────► Idle
//!                  ──► any trailing "__sync" ─────► FullResync (changes dropped)
//!                  ──► otherwise ─────────────────► Merge(changes)
//! ```

use crate::keys::is_sentinel;
use crate::types::{ClockValue, RemoteEntry};

/// Action for one watch response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchPlan {
    /// Nothing changed (timeout, or an index bump with no visible entries).
    Idle,

    /// A sentinel was seen. The partial change set must NOT be applied: the
    /// reason the sentinel exists is a deletion this response cannot show.
    FullResync,

    /// Upsert these entries.
    Merge(Vec<RemoteEntry>),
}

impl WatchPlan {
    /// Plans the handling of a watch response's changed entries.
    pub fn for_changes(changes: Vec<RemoteEntry>) -> Self {
        if changes.is_empty() {
            return WatchPlan::Idle;
        }

        if changes.iter().any(|e| is_sentinel(&e.key)) {
            return WatchPlan::FullResync;
        }

        WatchPlan::Merge(changes)
    }
}

/// Index to send on the next watch call.
///
/// Blocking-query indexes are opaque and may go backwards (e.g. after a
/// snapshot restore on the server). If they do, start over from 0 so the
/// next call returns immediately instead of blocking on a stale index.
/// A returned index of 0 becomes 1: an index-0 query never blocks, and
/// sending it back would spin.
pub fn next_watch_index(sent: ClockValue, returned: ClockValue) -> ClockValue {
    if returned == 0 {
        1
    } else if returned < sent {
        0
    } else {
        returned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_changes_are_idle() {
        assert_eq!(WatchPlan::for_changes(vec![]), WatchPlan::Idle);
    }

    #[test]
    fn test_sentinel_forces_full_resync() {
        let plan = WatchPlan::for_changes(vec![
            RemoteEntry::new("foo/bar", b"x".to_vec(), 3),
            RemoteEntry::new("foo/__sync", b"1".to_vec(), 4),
        ]);
        assert_eq!(plan, WatchPlan::FullResync);
    }

    #[test]
    fn test_plain_changes_merge() {
        let changes = vec![RemoteEntry::new("foo/bar", b"x".to_vec(), 3)];
        assert_eq!(
            WatchPlan::for_changes(changes.clone()),
            WatchPlan::Merge(changes)
        );
    }

    #[test]
    fn test_next_watch_index() {
        assert_eq!(next_watch_index(0, 12), 12);
        assert_eq!(next_watch_index(12, 12), 12);
        assert_eq!(next_watch_index(12, 15), 15);
        assert_eq!(next_watch_index(12, 3), 0);
        assert_eq!(next_watch_index(0, 0), 1);
        assert_eq!(next_watch_index(12, 0), 1);
    }
}
