//! # In-Memory Store
//!
//! A [`RemoteStore`] living inside the process, with the same blocking
//! semantics as Consul. Several mirrors can share one store to exercise
//! propagation without a server.
//!
//! ```text
//!   put/delete ──► index += 1 ──► notify_waiters() ──► blocked watches re-check
//!
//!   watch(prefix, since):
//!     since == 0, or a key under prefix was written/deleted after since
//!         → return keys under prefix with modify_index > since
//!     otherwise
//!         → block until notified or max_wait elapses
//! ```
//!
//! A deleted key leaves a tombstone index behind, so the watch wakes up,
//! but nothing in the response describes the deletion.

use async_trait::async_trait;
use kvmirror_core::{ClockValue, RemoteEntry, RemoteListing};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::{timeout_at, Instant};
use tracing::trace;

use super::RemoteStore;
use crate::error::{MirrorError, MirrorResult};

#[derive(Debug, Default)]
struct State {
    entries: BTreeMap<String, RemoteEntry>,
    tombstones: BTreeMap<String, ClockValue>,
    index: ClockValue,
    failures: u32,
    reject_writes: bool,
    watch_calls: u64,
}

impl State {
    /// Highest write or delete index under `prefix`.
    fn subtree_index(&self, prefix: &str) -> ClockValue {
        let written = self
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(_, e)| e.modify_index)
            .max()
            .unwrap_or(0);

        let deleted = self
            .tombstones
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(_, i)| *i)
            .max()
            .unwrap_or(0);

        written.max(deleted)
    }

    fn changed_since(&self, prefix: &str, since: ClockValue) -> Vec<RemoteEntry> {
        self.entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(_, e)| e.modify_index > since)
            .map(|(_, e)| e.clone())
            .collect()
    }

    fn take_failure(&mut self, op: &str) -> MirrorResult<()> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(MirrorError::Transport(format!("injected {} failure", op)));
        }
        Ok(())
    }

    fn check_writable(&self, key: &str) -> MirrorResult<()> {
        if self.reject_writes {
            return Err(MirrorError::RemoteWrite {
                key: key.to_string(),
                status: 403,
                message: "Permission denied".into(),
            });
        }
        Ok(())
    }
}

/// In-process KV store with a single global modify index.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<State>,
    changed: Notify,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store at index 1, like a freshly bootstrapped
    /// Consul cluster. The first write gets index 2.
    pub fn new() -> Self {
        MemoryStore {
            state: Mutex::new(State {
                index: 1,
                ..State::default()
            }),
            changed: Notify::new(),
        }
    }

    /// Makes the next `count` reads (`list`/`watch`) fail with a transport
    /// error.
    pub async fn fail_next(&self, count: u32) {
        self.state.lock().await.failures = count;
    }

    /// Makes every subsequent put/delete fail as if permission was denied.
    pub async fn reject_writes(&self, reject: bool) {
        self.state.lock().await.reject_writes = reject;
    }

    /// Current global index.
    pub async fn index(&self) -> ClockValue {
        self.state.lock().await.index
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    /// Returns true if no keys are stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Raw value of one key.
    pub async fn value(&self, key: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .await
            .entries
            .get(key)
            .map(|e| e.value.clone())
    }

    /// How many watch calls this store has answered or is blocking on.
    pub async fn watch_calls(&self) -> u64 {
        self.state.lock().await.watch_calls
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn list(&self, prefix: &str) -> MirrorResult<RemoteListing> {
        let mut state = self.state.lock().await;
        state.take_failure("list")?;

        let entries = state.changed_since(prefix, 0);
        Ok(RemoteListing::new(entries, state.index))
    }

    async fn watch(
        &self,
        prefix: &str,
        since: ClockValue,
        max_wait: Duration,
    ) -> MirrorResult<RemoteListing> {
        let deadline = Instant::now() + max_wait;

        {
            let mut state = self.state.lock().await;
            state.watch_calls += 1;
            state.take_failure("watch")?;
        }

        loop {
            // Registered before the check so a write in between is not missed.
            let notified = self.changed.notified();

            {
                let state = self.state.lock().await;
                if since == 0 || state.subtree_index(prefix) > since {
                    let entries = state.changed_since(prefix, since);
                    trace!(
                        prefix,
                        since,
                        index = state.index,
                        changed = entries.len(),
                        "Memory watch fired"
                    );
                    return Ok(RemoteListing::new(entries, state.index));
                }
            }

            if timeout_at(deadline, notified).await.is_err() {
                let state = self.state.lock().await;
                return Ok(RemoteListing::empty(state.index));
            }
        }
    }

    async fn put(&self, key: &str, value: &[u8]) -> MirrorResult<()> {
        {
            let mut state = self.state.lock().await;
            state.check_writable(key)?;

            state.index += 1;
            let index = state.index;
            let create_index = state
                .entries
                .get(key)
                .map(|e| e.create_index)
                .unwrap_or(index);

            state.tombstones.remove(key);
            state.entries.insert(
                key.to_string(),
                RemoteEntry {
                    key: key.to_string(),
                    value: value.to_vec(),
                    create_index,
                    modify_index: index,
                    flags: 0,
                },
            );
        }

        self.changed.notify_waiters();
        Ok(())
    }

    async fn delete(&self, key: &str, recursive: bool) -> MirrorResult<()> {
        let removed = {
            let mut state = self.state.lock().await;
            state.check_writable(key)?;

            let doomed: Vec<String> = if recursive {
                state
                    .entries
                    .range(key.to_string()..)
                    .take_while(|(k, _)| k.starts_with(key))
                    .map(|(k, _)| k.clone())
                    .collect()
            } else if state.entries.contains_key(key) {
                vec![key.to_string()]
            } else {
                Vec::new()
            };

            if !doomed.is_empty() {
                state.index += 1;
                let index = state.index;
                for k in &doomed {
                    state.entries.remove(k);
                    state.tombstones.insert(k.clone(), index);
                }
            }

            doomed.len()
        };

        if removed > 0 {
            self.changed.notify_waiters();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_put_assigns_increasing_indexes() {
        let store = MemoryStore::new();
        store.put("foo/a", b"1").await.unwrap();
        store.put("foo/b", b"2").await.unwrap();
        store.put("foo/a", b"3").await.unwrap();

        let listing = store.list("foo/").await.unwrap();
        assert_eq!(listing.index, 4);
        assert_eq!(listing.entries.len(), 2);

        let a = &listing.entries[0];
        assert_eq!(a.key, "foo/a");
        assert_eq!(a.create_index, 2);
        assert_eq!(a.modify_index, 4);
    }

    #[tokio::test]
    async fn test_list_is_scoped_to_prefix() {
        let store = MemoryStore::new();
        store.put("foo/a", b"1").await.unwrap();
        store.put("food/b", b"2").await.unwrap();

        let listing = store.list("foo/").await.unwrap();
        assert_eq!(listing.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_watch_from_zero_returns_immediately() {
        let store = MemoryStore::new();
        store.put("foo/a", b"1").await.unwrap();

        let listing = store
            .watch("foo/", 0, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(listing.entries.len(), 1);
        assert_eq!(listing.index, 2);
    }

    #[tokio::test]
    async fn test_watch_times_out_with_empty_changes() {
        let store = MemoryStore::new();
        store.put("foo/a", b"1").await.unwrap();

        let listing = store
            .watch("foo/", 2, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(listing.is_empty());
        assert_eq!(listing.index, 2);
    }

    #[tokio::test]
    async fn test_fresh_store_blocks_at_index_one() {
        let store = MemoryStore::new();

        let listing = store
            .watch("foo/", 0, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(listing.index, 1);

        let listing = store
            .watch("foo/", 1, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(listing.is_empty());
    }

    #[tokio::test]
    async fn test_watch_wakes_on_write() {
        let store = Arc::new(MemoryStore::new());
        store.put("foo/a", b"1").await.unwrap();

        let watcher = {
            let store = store.clone();
            tokio::spawn(async move { store.watch("foo/", 2, Duration::from_secs(10)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        store.put("foo/b", b"2").await.unwrap();

        let listing = watcher.await.unwrap().unwrap();
        assert_eq!(listing.entries.len(), 1);
        assert_eq!(listing.entries[0].key, "foo/b");
        assert_eq!(listing.index, 3);
    }

    #[tokio::test]
    async fn test_watch_ignores_writes_elsewhere() {
        let store = MemoryStore::new();
        store.put("foo/a", b"1").await.unwrap();
        store.put("bar/x", b"1").await.unwrap();

        let listing = store
            .watch("foo/", 2, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(listing.is_empty());
    }

    #[tokio::test]
    async fn test_delete_wakes_watch_without_describing_it() {
        let store = MemoryStore::new();
        store.put("foo/a", b"1").await.unwrap();
        store.put("foo/b", b"2").await.unwrap();

        store.delete("foo/b", false).await.unwrap();

        let listing = store
            .watch("foo/", 3, Duration::from_secs(10))
            .await
            .unwrap();
        assert!(listing.is_empty());
        assert_eq!(listing.index, 4);
    }

    #[tokio::test]
    async fn test_recursive_delete() {
        let store = MemoryStore::new();
        store.put("foo/a/1", b"1").await.unwrap();
        store.put("foo/a/2", b"2").await.unwrap();
        store.put("foo/b", b"3").await.unwrap();

        store.delete("foo/a/", true).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(store.index().await, 5);
    }

    #[tokio::test]
    async fn test_deleting_missing_key_is_a_no_op() {
        let store = MemoryStore::new();
        store.put("foo/a", b"1").await.unwrap();
        store.delete("foo/zzz", false).await.unwrap();
        assert_eq!(store.index().await, 2);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = MemoryStore::new();
        store.fail_next(2).await;

        assert!(matches!(store.list("foo/").await, Err(MirrorError::Transport(_))));
        assert!(store.watch("foo/", 0, Duration::from_secs(1)).await.is_err());
        assert!(store.list("foo/").await.is_ok());

        // Writes are unaffected by read failures.
        store.fail_next(1).await;
        store.put("foo/a", b"1").await.unwrap();

        store.reject_writes(true).await;
        assert!(matches!(
            store.put("foo/a", b"2").await,
            Err(MirrorError::RemoteWrite { status: 403, .. })
        ));
        assert_eq!(store.value("foo/a").await.unwrap(), b"1");
    }
}
