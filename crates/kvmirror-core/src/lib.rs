//! # kvmirror-core: Pure Mirror Logic
//!
//! This crate holds the rules of the local mirror as pure data structures and
//! functions. Locking, networking and the background task live in `kvmirror`.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        KV Mirror Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Callers (latency sensitive)                  │   │
//! │  │        get / get_prefix / size / clock / set / delete           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │             kvmirror (RwLock + sync engine + remote)            │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ kvmirror-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   keys    │  │   table   │  │   plan    │  │   │
//! │  │   │  Entry    │  │  Prefix   │  │MirrorTable│  │ WatchPlan │  │   │
//! │  │   │  Listing  │  │  sentinel │  │  merge    │  │ next index│  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO LOCKS • NO NETWORK • PURE FUNCTIONS              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Entries and remote listings
//! - [`keys`] - Prefix resolution and sentinel detection
//! - [`table`] - The entry table and its high-water clock
//! - [`plan`] - What to do with a watch response
//! - [`validation`] - Key validation for local writes
//! - [`error`] - Validation error types
//!
//! ## Example Usage
//!
//! ```rust
//! use kvmirror_core::{MirrorTable, Prefix, RemoteEntry, RemoteListing};
//!
//! let prefix = Prefix::new("foo");
//! let listing = RemoteListing::new(
//!     vec![RemoteEntry::new("foo/bar", b"hello".to_vec(), 7)],
//!     9,
//! );
//!
//! let mut table = MirrorTable::new();
//! table.replace(&listing, &prefix);
//!
//! let entry = table.get(&prefix.resolve("bar")).unwrap();
//! assert_eq!(entry.value, b"hello");
//! assert_eq!(table.clock(), 9);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod keys;
pub mod plan;
pub mod table;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::ValidationError;
pub use keys::{Prefix, SENTINEL_KEY};
pub use plan::{next_watch_index, WatchPlan};
pub use table::{MergeSummary, MirrorTable};
pub use types::*;
