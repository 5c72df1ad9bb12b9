//! Sync state coordination.
//!
//! Protocol:
//! 1. Local writes append to the outbox and bump the pending counter
//! 2. When online, a drain takes the oldest outbox entries under a ticket
//! 3. The remote transport pushes them and reports accepted/failed changes
//! 4. Accepted entries leave the outbox; the pending counter drops by the
//!    accepted count only
//!
//! Failures never propagate past the drain; they land in [`SyncState`] and
//! surface through the derived [`SyncStatusView`].

mod coordinator;
mod driver;
mod network;

pub use coordinator::*;
pub use driver::*;
pub use network::*;

use thiserror::Error;

use crate::db::DbError;

/// Reasons a sync cannot start.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("device is offline")]
    Offline,

    #[error("a sync is already in progress")]
    AlreadySyncing,

    #[error("no pending changes to sync")]
    NothingToSync,

    #[error("no sync in progress")]
    NoActiveSync,

    #[error("Store error: {0}")]
    Store(#[from] DbError),
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Failure reported by the remote transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("rejected by server: {0}")]
    Rejected(String),

    #[error("request timed out")]
    Timeout,

    #[error("request cancelled")]
    Cancelled,
}
