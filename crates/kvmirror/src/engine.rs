//! # Sync Engine
//!
//! Keeps a [`KvMirror`] converging toward the remote store.
//!
//! ## Background Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Engine States                               │
//! │                                                                         │
//! │              timeout / no changes                                       │
//! │              ┌──────────┐                                               │
//! │              ▼          │                                               │
//! │  ┌──────┐  ┌────────────┴┐  changes     ┌───────────┐                  │
//! │  │ Idle │─►│   Polling   │────────────► │  Merging  │──┐               │
//! │  └──────┘  │ watch(index)│ ◄────────────└───────────┘  │               │
//! │            └──┬───────┬──┘                              │               │
//! │    error      │       │  "__sync" seen  ┌─────────────┐ │               │
//! │   ┌───────────┘       └───────────────► │ FullSyncing │ │               │
//! │   ▼                                     │ (list+swap) │ │               │
//! │  ┌─────────┐   after delay              └──────┬──────┘ │               │
//! │  │ Backoff │──────────► Polling ◄──────────────┴────────┘               │
//! │  └─────────┘                                                            │
//! │                                                                         │
//! │  close() observed after a call completes ──► Terminated                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## The Sentinel
//! A recursive watch reports keys whose modify index moved. A deleted key
//! has no modify index, so deletions are invisible while siblings remain.
//! [`KvMirror::delete`] therefore also writes `<prefix>/__sync`; seeing it
//! makes every watcher discard the partial change set and relist.
//!
//! ## Index Handling
//! The watch index only advances after a response has been fully handled.
//! A resync that fails keeps the old index, so the same sentinel is seen
//! again on the next call.
//! An index that goes backwards resets to 0 and forces a resync.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use kvmirror_core::{next_watch_index, ClockValue, MirrorTable, RemoteListing, WatchPlan};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::EmptyListingPolicy;
use crate::error::{MirrorError, MirrorResult};
use crate::mirror::KvMirror;

// =============================================================================
// Sync Phase
// =============================================================================

/// What the background loop is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Background loop not started.
    Idle,
    /// Waiting on a watch call.
    Polling,
    /// Applying an incremental change set.
    Merging,
    /// Relisting the prefix after a sentinel.
    FullSyncing,
    /// Pausing after a failed call.
    Backoff,
    /// Loop has returned.
    Terminated,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncPhase::Idle => write!(f, "idle"),
            SyncPhase::Polling => write!(f, "polling"),
            SyncPhase::Merging => write!(f, "merging"),
            SyncPhase::FullSyncing => write!(f, "full_syncing"),
            SyncPhase::Backoff => write!(f, "backoff"),
            SyncPhase::Terminated => write!(f, "terminated"),
        }
    }
}

// =============================================================================
// Sync Statistics
// =============================================================================

/// Counters describing the background loop's activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Completed watch calls, successful or not.
    pub watch_calls: u64,
    /// Incremental change sets applied.
    pub merges: u64,
    /// Sentinel-triggered resyncs completed.
    pub full_resyncs: u64,
    /// Entries inserted or overwritten by merges.
    pub entries_applied: u64,
    /// Failed watch or resync calls.
    pub errors: u64,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
}

// =============================================================================
// Engine
// =============================================================================

impl KvMirror {
    /// Relists the whole prefix and atomically replaces the table.
    ///
    /// The exclusive lock is held across the listing call, so a local
    /// `set` or `delete` can never land between the snapshot and the swap.
    /// On error the table and clock are left exactly as they were. An empty
    /// listing is handled according to [`EmptyListingPolicy`].
    pub async fn repopulate(&self) -> MirrorResult<()> {
        let mut table = self.table.write().await;
        let listing = self.store.list(self.prefix.as_str()).await?;
        self.apply_listing(&mut table, listing);
        Ok(())
    }

    fn apply_listing(&self, table: &mut MirrorTable, listing: RemoteListing) {
        if listing.is_empty() {
            match self.settings.empty_listing {
                EmptyListingPolicy::Ignore => {
                    warn!(
                        prefix = %self.prefix,
                        index = listing.index,
                        "Remote listing is empty, keeping current mirror"
                    );
                    return;
                }
                EmptyListingPolicy::Clear => {
                    warn!(
                        prefix = %self.prefix,
                        index = listing.index,
                        "Remote listing is empty, clearing mirror"
                    );
                }
            }
        }

        let stored = table.replace(&listing, &self.prefix);
        info!(
            prefix = %self.prefix,
            keys = stored,
            clock = table.clock(),
            "Mirror repopulated"
        );
    }

    /// Follows the prefix with long-poll watches until [`KvMirror::close`]
    /// is called.
    ///
    /// Never returns an error: failed calls are logged, counted in
    /// [`SyncStats`], and retried after a pause.
    pub async fn background_update(&self) {
        let mut close_rx = self.close_tx.subscribe();
        let mut backoff = self.create_backoff();
        let mut index: ClockValue = 0;
        let max_wait = self.settings.max_wait();

        info!(
            prefix = %self.prefix,
            instance = %self.instance_id,
            max_wait_secs = max_wait.as_secs(),
            "Background sync started"
        );

        while !self.is_closed() {
            self.set_phase(SyncPhase::Polling);
            let result = self.store.watch(self.prefix.as_str(), index, max_wait).await;
            self.stats.lock().await.watch_calls += 1;

            if self.is_closed() {
                break;
            }

            let outcome = match result {
                Ok(listing) => self.handle_watch(index, listing).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(next) => {
                    backoff.reset();
                    index = next;
                }
                Err(e) => {
                    self.record_error(&e).await;
                    let delay = backoff
                        .next_backoff()
                        .unwrap_or_else(|| self.settings.max_retry_interval());
                    if self.pause(delay, &mut close_rx).await {
                        break;
                    }
                }
            }
        }

        self.set_phase(SyncPhase::Terminated);
        info!(prefix = %self.prefix, instance = %self.instance_id, "Background sync stopped");
    }

    /// Spawns [`KvMirror::background_update`] on the current runtime.
    pub fn spawn_background(self: &Arc<Self>) -> JoinHandle<()> {
        let mirror = Arc::clone(self);
        tokio::spawn(async move { mirror.background_update().await })
    }

    /// Handles one successful watch response. Returns the index for the
    /// next call.
    async fn handle_watch(
        &self,
        sent: ClockValue,
        listing: RemoteListing,
    ) -> MirrorResult<ClockValue> {
        let next = next_watch_index(sent, listing.index);
        let plan = if next == 0 {
            // Deletes made while the index regressed are invisible to a merge.
            warn!(
                prefix = %self.prefix,
                sent,
                returned = listing.index,
                "Watch index went backwards, resetting and resyncing"
            );
            WatchPlan::FullResync
        } else {
            WatchPlan::for_changes(listing.entries)
        };

        match plan {
            WatchPlan::Idle => {
                debug!(prefix = %self.prefix, index = listing.index, "Watch returned no changes");
            }
            WatchPlan::FullResync => {
                self.set_phase(SyncPhase::FullSyncing);
                info!(prefix = %self.prefix, index = listing.index, "Sentinel seen, resyncing");
                self.repopulate().await?;
                self.stats.lock().await.full_resyncs += 1;
            }
            WatchPlan::Merge(changes) => {
                self.set_phase(SyncPhase::Merging);
                let summary = {
                    let mut table = self.table.write().await;
                    table.merge(&changes, listing.index, &self.prefix)
                };
                debug!(
                    prefix = %self.prefix,
                    index = listing.index,
                    changed = changes.len(),
                    applied = summary.applied,
                    stale = summary.stale,
                    "Merged watch changes"
                );

                let mut stats = self.stats.lock().await;
                stats.merges += 1;
                stats.entries_applied += summary.applied as u64;
            }
        }

        Ok(next)
    }

    /// Sleeps for `delay` unless closed first. Returns true if closed.
    async fn pause(&self, delay: Duration, close_rx: &mut watch::Receiver<bool>) -> bool {
        self.set_phase(SyncPhase::Backoff);

        tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            _ = close_rx.changed() => true,
        }
    }

    async fn record_error(&self, err: &MirrorError) {
        if err.is_retryable() {
            warn!(prefix = %self.prefix, error = %err, "Sync call failed, backing off");
        } else {
            error!(
                prefix = %self.prefix,
                error = %err,
                "Sync call failed with a non-transient error, backing off"
            );
        }
        let mut stats = self.stats.lock().await;
        stats.errors += 1;
        stats.last_error = Some(err.to_string());
    }

    /// Fixed pause by default; exponential when the ceiling is raised.
    fn create_backoff(&self) -> ExponentialBackoff {
        let initial = self.settings.retry_interval();
        let max = self.settings.max_retry_interval();

        ExponentialBackoff {
            current_interval: initial,
            initial_interval: initial,
            max_interval: max,
            multiplier: if max > initial { 2.0 } else { 1.0 },
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    // =========================================================================
    // Observation
    // =========================================================================

    fn set_phase(&self, phase: SyncPhase) {
        let previous = self.phase_tx.send_replace(phase);
        if previous != phase {
            debug!(prefix = %self.prefix, from = %previous, to = %phase, "Sync phase");
        }
    }

    /// Current phase of the background loop.
    pub fn phase(&self) -> SyncPhase {
        *self.phase_tx.borrow()
    }

    /// Receiver notified on every phase change.
    pub fn subscribe_phase(&self) -> watch::Receiver<SyncPhase> {
        self.phase_tx.subscribe()
    }

    /// Snapshot of the background loop's counters.
    pub async fn stats(&self) -> SyncStats {
        self.stats.lock().await.clone()
    }
}
