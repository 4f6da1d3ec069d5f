//! # Remote Store
//!
//! The authoritative hierarchical KV store a mirror follows.
//!
//! ## Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        RemoteStore Operations                           │
//! │                                                                         │
//! │  list(prefix)               every key under prefix + high-water index   │
//! │                                                                         │
//! │  watch(prefix, since, wait) blocks until something under prefix moves   │
//! │                             past `since`, or `wait` elapses. Returns    │
//! │                             only keys modified after `since` (empty on  │
//! │                             timeout) + the new high-water index.        │
//! │                             A deleted key is NOT reported.              │
//! │                                                                         │
//! │  put(key, value)            create/overwrite one key                    │
//! │                                                                         │
//! │  delete(key, recursive)     remove one key, or a whole subtree          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Implementations
//! - [`ConsulClient`]: Consul's `/v1/kv` HTTP API
//! - [`MemoryStore`]: in-process store with the same blocking semantics

mod consul;
mod memory;

pub use consul::ConsulClient;
pub use memory::MemoryStore;

use async_trait::async_trait;
use kvmirror_core::{ClockValue, RemoteListing};
use std::time::Duration;

use crate::error::MirrorResult;

/// A remote hierarchical KV store with blocking (long-poll) reads.
///
/// Keys are absolute. The index in every returned listing is a
/// store-wide high-water mark, suitable as the `since` of the next watch.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Recursively lists every key under `prefix`.
    async fn list(&self, prefix: &str) -> MirrorResult<RemoteListing>;

    /// Blocks until a key under `prefix` changes after `since`, or until
    /// `max_wait` elapses.
    ///
    /// `since == 0` never blocks.
    async fn watch(
        &self,
        prefix: &str,
        since: ClockValue,
        max_wait: Duration,
    ) -> MirrorResult<RemoteListing>;

    /// Writes one key.
    async fn put(&self, key: &str, value: &[u8]) -> MirrorResult<()>;

    /// Deletes one key, or everything under it when `recursive` is set.
    async fn delete(&self, key: &str, recursive: bool) -> MirrorResult<()>;
}
