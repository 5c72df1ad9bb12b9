//! Drains the outbox through a remote transport.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{
    SyncCoordinator, SyncError, SyncResult, SyncStatusView, SyncTicket, SyncTrigger,
    TransportError,
};
use crate::db::Database;
use crate::models::PendingChange;

/// A change the remote refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushFailure {
    pub change_id: String,
    pub message: String,
}

/// Remote response to one push.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PushOutcome {
    pub accepted_count: u64,
    pub failures: Vec<PushFailure>,
}

impl PushOutcome {
    pub fn all_accepted(batch: &[PendingChange]) -> Self {
        Self {
            accepted_count: batch.len() as u64,
            failures: Vec::new(),
        }
    }
}

/// Pushes pending changes to the backend.
///
/// Change IDs double as idempotency keys: a batch may be resent after a
/// cancelled or failed drain.
pub trait RemoteTransport {
    fn push_pending_changes(&self, changes: &[PendingChange])
        -> Result<PushOutcome, TransportError>;
}

/// Cooperative cancellation flag shared with the transport.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// IDs from the ticket's batch that count as accepted: everything not
/// reported as failed, capped at the remote's accepted count.
pub fn accepted_change_ids(ticket: &SyncTicket, outcome: &PushOutcome) -> Vec<String> {
    let failed: HashSet<&str> = outcome
        .failures
        .iter()
        .map(|f| f.change_id.as_str())
        .collect();
    ticket
        .change_ids()
        .iter()
        .filter(|id| !failed.contains(id.as_str()))
        .take(outcome.accepted_count as usize)
        .cloned()
        .collect()
}

/// Runs one drain against a store and a coordinator.
pub struct SyncDriver<'a> {
    coordinator: &'a SyncCoordinator,
    batch_size: usize,
}

impl<'a> SyncDriver<'a> {
    pub fn new(coordinator: &'a SyncCoordinator, batch_size: usize) -> Self {
        Self {
            coordinator,
            batch_size: batch_size.max(1),
        }
    }

    /// Start a drain and freeze its batch.
    ///
    /// If reading the outbox fails the drain is marked failed before the
    /// error is returned.
    pub fn begin(
        &self,
        db: &Database,
        trigger: SyncTrigger,
    ) -> SyncResult<(SyncTicket, Vec<PendingChange>)> {
        let ticket = self.coordinator.begin_sync(trigger)?;
        let batch = match db.pending_changes(self.batch_size) {
            Ok(batch) => batch,
            Err(e) => {
                self.coordinator.fail_sync(&ticket, e.to_string());
                return Err(SyncError::Store(e));
            }
        };
        let ids = batch.iter().map(|c| c.change_id.clone()).collect();
        tracing::debug!(
            generation = ticket.generation(),
            batch = batch.len(),
            "sync batch frozen"
        );
        Ok((ticket.with_batch(ids), batch))
    }

    /// Apply a push outcome: drop accepted entries from the outbox and settle
    /// the coordinator in one step. Stale tickets are ignored entirely.
    pub fn finish(&self, db: &Database, ticket: &SyncTicket, outcome: &PushOutcome) -> bool {
        let accepted = accepted_change_ids(ticket, outcome);
        self.coordinator
            .settle_sync(ticket, outcome.failures.len(), || {
                db.acknowledge_changes(&accepted, db.now_ms()).map_err(|e| {
                    tracing::error!(error = %e, "failed to record acknowledgment");
                    format!("could not record acknowledgment: {}", e)
                })
            })
    }

    /// Run one full drain.
    ///
    /// Transport failures and cancellation end up in the sync state rather
    /// than the return value; only refusals to start are errors.
    pub fn drain<T: RemoteTransport + ?Sized>(
        &self,
        db: &Database,
        transport: &T,
        trigger: SyncTrigger,
        cancel: &CancellationToken,
    ) -> SyncResult<SyncStatusView> {
        let (ticket, batch) = self.begin(db, trigger)?;

        if cancel.is_cancelled() {
            self.coordinator.cancel_sync();
            return Ok(self.coordinator.view());
        }

        if batch.is_empty() {
            self.coordinator.complete_sync(&ticket, 0, 0);
            return Ok(self.coordinator.view());
        }

        let result = transport.push_pending_changes(&batch);

        if cancel.is_cancelled() {
            self.coordinator.cancel_sync();
            return Ok(self.coordinator.view());
        }

        match result {
            Ok(outcome) => {
                self.finish(db, &ticket, &outcome);
            }
            Err(e) => {
                self.coordinator.fail_sync(&ticket, e.to_string());
            }
        }
        Ok(self.coordinator.view())
    }
}
