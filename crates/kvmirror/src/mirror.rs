//! # KV Mirror
//!
//! The public read/write surface over one mirrored prefix.
//!
//! ## Read and Write Paths
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  get / get_prefix / size / clock                                        │
//! │      └─► RwLock (shared) ─► MirrorTable           no network            │
//! │                                                                         │
//! │  set(k, v)                                                              │
//! │      └─► RwLock (exclusive)                                             │
//! │            ├─► remote.put(prefix/k, v)      error → table untouched     │
//! │            └─► table.upsert_local(k, v)     version = current clock     │
//! │                                                                         │
//! │  delete(k)                                                              │
//! │      └─► RwLock (exclusive, held across all three calls)                │
//! │            ├─► remote.delete(prefix/k)      error → table untouched     │
//! │            ├─► table.remove(k)                                          │
//! │            └─► remote.put(prefix/__sync)    wakes every peer watcher    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Writes hold the exclusive lock across their remote calls, so local
//! writers on one mirror are serialized on network latency. Readers only
//! wait while a write or merge is in progress.

use chrono::Utc;
use kvmirror_core::validation::validate_key;
use kvmirror_core::{ClockValue, Entry, MirrorTable, Prefix};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{MirrorConfig, SyncSettings};
use crate::engine::{SyncPhase, SyncStats};
use crate::error::MirrorResult;
use crate::remote::{ConsulClient, RemoteStore};

/// A local mirror of one prefix of a remote KV store.
///
/// Cheap to read from many tasks at once. Wrap it in an [`Arc`] to run
/// [`KvMirror::background_update`] alongside readers.
pub struct KvMirror {
    pub(crate) prefix: Prefix,
    pub(crate) instance_id: Uuid,
    pub(crate) store: Arc<dyn RemoteStore>,
    pub(crate) settings: SyncSettings,
    pub(crate) table: RwLock<MirrorTable>,
    pub(crate) close_tx: watch::Sender<bool>,
    pub(crate) phase_tx: watch::Sender<SyncPhase>,
    pub(crate) stats: Mutex<SyncStats>,
}

impl std::fmt::Debug for KvMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvMirror")
            .field("prefix", &self.prefix)
            .field("instance_id", &self.instance_id)
            .field("phase", &*self.phase_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl KvMirror {
    // =========================================================================
    // Construction
    // =========================================================================

    /// Creates an empty mirror of `prefix`, talking to the Consul agent
    /// named by the environment (or the local default).
    pub fn new(prefix: &str) -> MirrorResult<Self> {
        let config = MirrorConfig::from_env()?;
        Self::from_config(prefix, &config)
    }

    /// Creates an empty mirror of `prefix` from a loaded configuration.
    pub fn from_config(prefix: &str, config: &MirrorConfig) -> MirrorResult<Self> {
        config.validate()?;
        let client = ConsulClient::new(&config.consul)?;
        Ok(Self::with_store(prefix, Arc::new(client), config.sync.clone()))
    }

    /// Creates an empty mirror of `prefix` over a pre-configured store.
    pub fn with_store(prefix: &str, store: Arc<dyn RemoteStore>, settings: SyncSettings) -> Self {
        let (close_tx, _) = watch::channel(false);
        let (phase_tx, _) = watch::channel(SyncPhase::Idle);

        let mirror = KvMirror {
            prefix: Prefix::new(prefix),
            instance_id: Uuid::new_v4(),
            store,
            settings,
            table: RwLock::new(MirrorTable::new()),
            close_tx,
            phase_tx,
            stats: Mutex::new(SyncStats::default()),
        };

        debug!(
            prefix = %mirror.prefix,
            instance = %mirror.instance_id,
            "Mirror created"
        );
        mirror
    }

    /// The normalized prefix this mirror follows.
    pub fn prefix(&self) -> &Prefix {
        &self.prefix
    }

    /// Random id of this mirror instance, embedded in the sentinels it writes.
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    // =========================================================================
    // Reads (local only)
    // =========================================================================

    /// Looks up a key relative to the prefix.
    pub async fn get(&self, key: &str) -> Option<Entry> {
        let table = self.table.read().await;
        table.get(&self.prefix.resolve(key)).cloned()
    }

    /// Returns every entry whose relative key starts with `prefix`, along
    /// with the highest version among them (0 if none).
    ///
    /// Order of the returned entries is unspecified.
    pub async fn get_prefix(&self, prefix: &str) -> (Vec<Entry>, ClockValue) {
        let table = self.table.read().await;
        table.get_prefix(&self.prefix.resolve(prefix))
    }

    /// Number of mirrored keys.
    pub async fn size(&self) -> usize {
        self.table.read().await.len()
    }

    /// Highest version observed so far.
    pub async fn clock(&self) -> ClockValue {
        self.table.read().await.clock()
    }

    // =========================================================================
    // Writes (remote first, then local)
    // =========================================================================

    /// Writes a key through to the remote store, then stores it locally.
    ///
    /// The local entry carries the current clock until the next sync
    /// reports the version the store actually assigned.
    pub async fn set(&self, key: &str, value: impl Into<Vec<u8>>) -> MirrorResult<()> {
        validate_key(key)?;
        let value = value.into();
        let absolute = self.prefix.resolve(key);

        let mut table = self.table.write().await;
        self.store.put(&absolute, &value).await?;
        let entry = table.upsert_local(&absolute, key, value);

        debug!(
            key = %absolute,
            clock = entry.clock,
            instance = %self.instance_id,
            "Set"
        );
        Ok(())
    }

    /// Deletes a key remotely and locally, then writes the sentinel so every
    /// peer mirror of this prefix resyncs.
    pub async fn delete(&self, key: &str) -> MirrorResult<()> {
        validate_key(key)?;
        let absolute = self.prefix.resolve(key);
        let sentinel = self.prefix.sentinel_key();

        let mut table = self.table.write().await;
        self.store.delete(&absolute, false).await?;
        table.remove(&absolute);
        self.store
            .put(&sentinel, self.sentinel_payload().as_bytes())
            .await?;

        info!(
            key = %absolute,
            instance = %self.instance_id,
            "Deleted key and signalled peers"
        );
        Ok(())
    }

    fn sentinel_payload(&self) -> String {
        format!("{}@{}", self.instance_id, Utc::now().to_rfc3339())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Asks the background loop to stop.
    ///
    /// Idempotent. An in-flight watch is left to finish, so the loop exits
    /// within one watch bound. A backoff pause is cut short.
    pub fn close(&self) {
        if !self.close_tx.send_replace(true) {
            info!(prefix = %self.prefix, instance = %self.instance_id, "Mirror closing");
        }
    }

    /// Returns true once [`KvMirror::close`] has been called.
    pub fn is_closed(&self) -> bool {
        *self.close_tx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MirrorError;
    use crate::remote::MemoryStore;
    use kvmirror_core::ValidationError;

    fn mirror_on(store: &Arc<MemoryStore>) -> KvMirror {
        KvMirror::with_store("foo", store.clone(), SyncSettings::default())
    }

    #[tokio::test]
    async fn test_set_is_visible_immediately() {
        let store = Arc::new(MemoryStore::new());
        let mirror = mirror_on(&store);

        mirror.set("bar", "hello").await.unwrap();

        let entry = mirror.get("bar").await.unwrap();
        assert_eq!(entry.key, "bar");
        assert_eq!(entry.value, b"hello");
        assert_eq!(entry.clock, 0);
        assert_eq!(store.value("foo/bar").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_set_rejected_remotely_leaves_table_alone() {
        let store = Arc::new(MemoryStore::new());
        let mirror = mirror_on(&store);
        store.reject_writes(true).await;

        let err = mirror.set("bar", "hello").await.unwrap_err();

        assert!(matches!(err, MirrorError::RemoteWrite { .. }));
        assert!(mirror.get("bar").await.is_none());
        assert_eq!(mirror.size().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_keys_never_reach_the_store() {
        let store = Arc::new(MemoryStore::new());
        let mirror = mirror_on(&store);

        assert!(matches!(
            mirror.set("", "x").await,
            Err(MirrorError::Validation(ValidationError::EmptyKey))
        ));
        assert!(matches!(
            mirror.set("a/__sync", "x").await,
            Err(MirrorError::Validation(ValidationError::ReservedKey { .. }))
        ));
        assert!(mirror.delete("/abs").await.is_err());
        assert_eq!(store.index().await, 1);
    }

    #[tokio::test]
    async fn test_delete_writes_sentinel() {
        let store = Arc::new(MemoryStore::new());
        let mirror = mirror_on(&store);
        mirror.set("bar", "1").await.unwrap();
        mirror.set("baz", "2").await.unwrap();

        mirror.delete("baz").await.unwrap();

        assert!(mirror.get("baz").await.is_none());
        assert!(mirror.get("bar").await.is_some());
        assert!(store.value("foo/baz").await.is_none());

        let payload = store.value("foo/__sync").await.unwrap();
        let payload = String::from_utf8(payload).unwrap();
        assert!(payload.starts_with(&mirror.instance_id().to_string()));
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_entry() {
        let store = Arc::new(MemoryStore::new());
        let mirror = mirror_on(&store);
        mirror.set("bar", "1").await.unwrap();
        store.reject_writes(true).await;

        assert!(mirror.delete("bar").await.is_err());
        assert!(mirror.get("bar").await.is_some());
    }

    #[tokio::test]
    async fn test_get_prefix_is_relative() {
        let store = Arc::new(MemoryStore::new());
        let mirror = mirror_on(&store);
        mirror.set("c/bar", "1").await.unwrap();
        mirror.set("c/baz", "2").await.unwrap();
        mirror.set("d", "3").await.unwrap();

        let (values, _) = mirror.get_prefix("c/").await;
        let mut keys: Vec<_> = values.into_iter().map(|e| e.key).collect();
        keys.sort();
        assert_eq!(keys, vec!["c/bar", "c/baz"]);
    }

    #[test]
    fn test_close_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let mirror = mirror_on(&store);

        assert!(!mirror.is_closed());
        mirror.close();
        mirror.close();
        assert!(mirror.is_closed());
    }

    #[test]
    fn test_from_config_rejects_bad_address() {
        let mut config = MirrorConfig::default();
        config.consul.address = "consul:8500".into();
        assert!(KvMirror::from_config("foo", &config).is_err());
    }
}
