//! # kvmirror: Local Mirror of a Remote KV Subtree
//!
//! This crate keeps an in-memory copy of one prefix of a remote
//! hierarchical key-value store (Consul), so latency-sensitive callers can
//! read configuration and coordination data without a network round trip.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        KV Mirror Architecture                           │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                      KvMirror (one per prefix)                   │  │
//! │  │                                                                  │  │
//! │  │  get / get_prefix / size / clock    ── local, shared lock        │  │
//! │  │  set / delete                       ── remote first, then local  │  │
//! │  └───────────────┬──────────────────────────────────┬───────────────┘  │
//! │                  │                                  │                   │
//! │                  ▼                                  ▼                   │
//! │  ┌────────────────────────────┐     ┌────────────────────────────────┐ │
//! │  │  Sync Engine (engine.rs)   │     │  RemoteStore (remote/)         │ │
//! │  │                            │     │                                │ │
//! │  │  repopulate: list + swap   │────►│  ConsulClient  /v1/kv over HTTP│ │
//! │  │  background_update:        │     │  MemoryStore   in-process      │ │
//! │  │    long-poll watch, merge, │     │                                │ │
//! │  │    "__sync" → full resync  │     │                                │ │
//! │  └────────────────────────────┘     └────────────────────────────────┘ │
//! │                                                                         │
//! │  Mirrors never talk to each other. Peers learn about deletions only    │
//! │  through the `<prefix>/__sync` sentinel written by `delete`.           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`mirror`] - `KvMirror` and its accessor API
//! - [`engine`] - Repopulate and the background watch loop
//! - [`remote`] - The `RemoteStore` trait, Consul and in-memory stores
//! - [`config`] - Connection and sync configuration
//! - [`error`] - Mirror error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kvmirror::KvMirror;
//! use std::sync::Arc;
//!
//! let mirror = Arc::new(KvMirror::new("service/config")?);
//! mirror.repopulate().await?;
//! let sync = mirror.spawn_background();
//!
//! if let Some(entry) = mirror.get("timeout").await {
//!     println!("timeout = {:?} (version {})", entry.value, entry.clock);
//! }
//!
//! mirror.set("timeout", "30s").await?;
//! mirror.close();
//! sync.await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod engine;
pub mod error;
pub mod mirror;
pub mod remote;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{ConsulSettings, EmptyListingPolicy, MirrorConfig, SyncSettings};
pub use engine::{SyncPhase, SyncStats};
pub use error::{MirrorError, MirrorResult};
pub use mirror::KvMirror;
pub use remote::{ConsulClient, MemoryStore, RemoteStore};

pub use kvmirror_core::{ClockValue, Entry, Prefix, ValidationError, SENTINEL_KEY};
