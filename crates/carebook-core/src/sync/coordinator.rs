//! Sync state machine.
//!
//! ```text
//!            begin                 complete (no failures)
//!   Idle ───────────▶ Syncing ─────────────────────────▶ Success
//!                       │  ▲                               │
//!      fail / cancel /  │  │ begin                   begin │
//!      rejected changes ▼  │                               │
//!                      Error ◀─────────────────────────────┘
//! ```
//!
//! "Offline" is not a state: it is derived in [`SyncCoordinator::view`] from
//! the connectivity signal.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use super::{NetworkStatus, SyncError, SyncResult};
use crate::clock::Clock;
use crate::db::ChangeSink;

/// Phase of the sync machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, uniffi::Enum)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Idle,
    Syncing,
    Success,
    Error,
}

/// In-memory sync state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncState {
    pub phase: SyncPhase,
    /// Local changes not yet acknowledged by the remote
    pub pending_changes: u64,
    pub last_sync_time: Option<i64>,
    /// Always set while `phase == Error`
    pub last_error: Option<String>,
}

/// What started a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, uniffi::Enum)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    /// Reconnect or pending changes; needs something to push
    Automatic,
    /// User asked for it
    Manual,
}

/// Single status shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, uniffi::Enum)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryStatus {
    Offline,
    Syncing,
    Error,
    /// Online and idle with unsynced changes
    Pending,
    Synced,
}

/// Derived status for the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatusView {
    pub primary: PrimaryStatus,
    pub pending_count: u64,
    pub last_sync_time: Option<i64>,
    pub last_error: Option<String>,
}

impl SyncStatusView {
    /// User-facing summary. Offline and error states always say local data
    /// is safe.
    pub fn message(&self) -> String {
        let n = self.pending_count;
        let changes = if n == 1 { "change" } else { "changes" };
        match self.primary {
            PrimaryStatus::Offline if n == 0 => {
                "Offline. All data is saved on this device.".to_string()
            }
            PrimaryStatus::Offline => format!(
                "Offline. {} {} saved on this device will sync when you reconnect.",
                n, changes
            ),
            PrimaryStatus::Syncing => format!("Syncing {} {}...", n, changes),
            PrimaryStatus::Error => format!(
                "Sync failed. {} {} safe on this device and will be retried.",
                n, changes
            ),
            PrimaryStatus::Pending => format!("{} {} waiting to sync.", n, changes),
            PrimaryStatus::Synced => "All changes synced.".to_string(),
        }
    }
}

/// Handle for one drain. Completing a ticket that is no longer current
/// (cancelled or superseded) has no effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTicket {
    generation: u64,
    trigger: SyncTrigger,
    change_ids: Vec<String>,
}

impl SyncTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn trigger(&self) -> SyncTrigger {
        self.trigger
    }

    /// The frozen batch under drain.
    pub fn change_ids(&self) -> &[String] {
        &self.change_ids
    }

    pub fn with_batch(mut self, change_ids: Vec<String>) -> Self {
        self.change_ids = change_ids;
        self
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: SyncState,
    network: NetworkStatus,
    next_generation: u64,
    active: Option<u64>,
}

impl Inner {
    fn take_active(&mut self, ticket: &SyncTicket) -> bool {
        if self.active == Some(ticket.generation) {
            self.active = None;
            true
        } else {
            tracing::warn!(
                generation = ticket.generation,
                "ignoring result for a sync that is no longer current"
            );
            false
        }
    }
}

/// Process-wide sync coordinator.
///
/// Shared between the store (which reports local changes through
/// [`ChangeSink`]) and whoever drives the drain.
pub struct SyncCoordinator {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SyncCoordinator {
    /// Start idle and offline with `pending_changes` carried over from the
    /// store.
    pub fn new(clock: Arc<dyn Clock>, pending_changes: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: SyncState {
                    pending_changes,
                    ..Default::default()
                },
                network: NetworkStatus::offline(),
                next_generation: 1,
                active: None,
            }),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Restore the last successful sync time from the persisted snapshot.
    pub fn restore_last_sync_time(&self, last_sync_time: Option<i64>) {
        self.lock().state.last_sync_time = last_sync_time;
    }

    pub fn state(&self) -> SyncState {
        self.lock().state.clone()
    }

    pub fn network_status(&self) -> NetworkStatus {
        self.lock().network
    }

    /// Record the latest connectivity signal.
    ///
    /// Returns `true` when an automatic sync should start now. Losing
    /// connectivity mid-drain does not change the phase; the in-flight call
    /// still has to resolve or be cancelled.
    pub fn set_network_status(&self, status: NetworkStatus) -> bool {
        let mut inner = self.lock();
        let was_online = inner.network.is_online();
        inner.network = status;
        if was_online != status.is_online() {
            tracing::info!(
                online = status.is_online(),
                connection = ?status.connection_type,
                pending = inner.state.pending_changes,
                "connectivity changed"
            );
        }
        Self::wants_auto_sync(&inner)
    }

    /// Online, idle and holding unsynced changes.
    pub fn should_auto_sync(&self) -> bool {
        Self::wants_auto_sync(&self.lock())
    }

    fn wants_auto_sync(inner: &Inner) -> bool {
        inner.network.is_online()
            && inner.state.phase != SyncPhase::Syncing
            && inner.state.pending_changes > 0
    }

    /// Enter `Syncing`.
    pub fn begin_sync(&self, trigger: SyncTrigger) -> SyncResult<SyncTicket> {
        let mut inner = self.lock();
        if !inner.network.is_online() {
            return Err(SyncError::Offline);
        }
        if inner.state.phase == SyncPhase::Syncing {
            return Err(SyncError::AlreadySyncing);
        }
        if trigger == SyncTrigger::Automatic && inner.state.pending_changes == 0 {
            return Err(SyncError::NothingToSync);
        }

        let generation = inner.next_generation;
        inner.next_generation += 1;
        inner.active = Some(generation);
        inner.state.phase = SyncPhase::Syncing;

        tracing::info!(
            generation,
            ?trigger,
            pending = inner.state.pending_changes,
            "sync started"
        );
        Ok(SyncTicket {
            generation,
            trigger,
            change_ids: Vec::new(),
        })
    }

    /// Whether `ticket` still identifies the in-flight drain.
    pub fn is_current(&self, ticket: &SyncTicket) -> bool {
        self.lock().active == Some(ticket.generation)
    }

    /// Apply a confirmed acknowledgment.
    ///
    /// `acknowledged` changes leave the pending count; changes written during
    /// the drain stay pending. Any `rejected` change makes the drain an error.
    /// Returns `false` for a stale ticket.
    pub fn complete_sync(&self, ticket: &SyncTicket, acknowledged: u64, rejected: usize) -> bool {
        self.settle_sync(ticket, rejected, || Ok(acknowledged))
    }

    /// Like [`complete_sync`](Self::complete_sync), but the acknowledged count
    /// comes from `acknowledge`, which runs with the coordinator locked.
    ///
    /// `acknowledge` is not called for a stale ticket, and must not record
    /// local changes. An `Err` from it fails the drain with that message.
    pub fn settle_sync<F>(&self, ticket: &SyncTicket, rejected: usize, acknowledge: F) -> bool
    where
        F: FnOnce() -> Result<u64, String>,
    {
        let now = self.clock.now_ms();
        let mut inner = self.lock();
        if !inner.take_active(ticket) {
            return false;
        }

        let acknowledged = match acknowledge() {
            Ok(count) => count,
            Err(message) => {
                tracing::warn!(
                    generation = ticket.generation,
                    error = %message,
                    "sync acknowledgment could not be recorded"
                );
                inner.state.phase = SyncPhase::Error;
                inner.state.last_error = Some(message);
                return true;
            }
        };

        let state = &mut inner.state;
        state.pending_changes = state.pending_changes.saturating_sub(acknowledged);
        if rejected == 0 {
            state.phase = SyncPhase::Success;
            state.last_sync_time = Some(now);
            state.last_error = None;
            tracing::info!(
                generation = ticket.generation,
                acknowledged,
                pending = state.pending_changes,
                "sync succeeded"
            );
        } else {
            state.phase = SyncPhase::Error;
            state.last_error = Some(format!(
                "{} change(s) were rejected by the server",
                rejected
            ));
            tracing::warn!(
                generation = ticket.generation,
                acknowledged,
                rejected,
                pending = state.pending_changes,
                "sync finished with rejected changes"
            );
        }
        true
    }

    /// The drain failed; nothing was acknowledged.
    pub fn fail_sync(&self, ticket: &SyncTicket, message: impl Into<String>) -> bool {
        let mut inner = self.lock();
        if !inner.take_active(ticket) {
            return false;
        }
        let message = message.into();
        tracing::warn!(
            generation = ticket.generation,
            error = %message,
            pending = inner.state.pending_changes,
            "sync failed"
        );
        inner.state.phase = SyncPhase::Error;
        inner.state.last_error = Some(message);
        true
    }

    /// Abandon the in-flight drain, if any. Pending changes are untouched.
    pub fn cancel_sync(&self) -> bool {
        let mut inner = self.lock();
        let Some(generation) = inner.active.take() else {
            return false;
        };
        tracing::info!(generation, "sync cancelled");
        inner.state.phase = SyncPhase::Error;
        inner.state.last_error = Some("sync cancelled".to_string());
        true
    }

    /// Status for the UI.
    pub fn view(&self) -> SyncStatusView {
        let inner = self.lock();
        let state = &inner.state;
        let primary = if !inner.network.is_online() {
            PrimaryStatus::Offline
        } else {
            match state.phase {
                SyncPhase::Syncing => PrimaryStatus::Syncing,
                SyncPhase::Error => PrimaryStatus::Error,
                SyncPhase::Idle | SyncPhase::Success if state.pending_changes > 0 => {
                    PrimaryStatus::Pending
                }
                SyncPhase::Idle | SyncPhase::Success => PrimaryStatus::Synced,
            }
        };
        SyncStatusView {
            primary,
            pending_count: state.pending_changes,
            last_sync_time: state.last_sync_time,
            last_error: state.last_error.clone(),
        }
    }
}

impl ChangeSink for SyncCoordinator {
    fn record_local_changes(&self, count: u64) {
        let mut inner = self.lock();
        inner.state.pending_changes = inner.state.pending_changes.saturating_add(count);
        tracing::debug!(
            count,
            pending = inner.state.pending_changes,
            "local changes recorded"
        );
    }
}
