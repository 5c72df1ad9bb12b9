//! Pending change outbox.
//!
//! Every local insert/update/delete appends one entry in the same transaction
//! as the row write. Entries leave the outbox only when the remote
//! acknowledges them.

use rusqlite::{params, Connection, OptionalExtension, Row};
use sha2::{Digest, Sha256};

use super::{Database, DbResult};
use crate::models::{ChangeOperation, PendingChange, RecordKind};

pub(crate) fn append_change(
    conn: &Connection,
    kind: RecordKind,
    record_key: &str,
    operation: ChangeOperation,
    payload: &str,
    now: i64,
) -> DbResult<PendingChange> {
    let seq: i64 = conn.query_row(
        "SELECT COALESCE(MAX(seq), 0) + 1 FROM pending_changes",
        [],
        |row| row.get(0),
    )?;
    let change = PendingChange {
        change_id: uuid::Uuid::new_v4().to_string(),
        seq,
        record_kind: kind,
        record_key: record_key.to_string(),
        operation,
        payload: payload.to_string(),
        payload_digest: hex::encode(Sha256::digest(payload.as_bytes())),
        created_at: now,
    };

    conn.execute(
        r#"
        INSERT INTO pending_changes (
            change_id, seq, record_kind, record_key, operation,
            payload, payload_digest, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
        params![
            change.change_id,
            change.seq,
            change.record_kind.as_str(),
            change.record_key,
            change.operation.as_str(),
            change.payload,
            change.payload_digest,
            change.created_at,
        ],
    )?;
    Ok(change)
}

fn change_from_row(row: &Row<'_>) -> rusqlite::Result<PendingChange> {
    let kind: String = row.get(2)?;
    let operation: String = row.get(4)?;
    Ok(PendingChange {
        change_id: row.get(0)?,
        seq: row.get(1)?,
        record_kind: RecordKind::parse(&kind).ok_or_else(|| invalid_text(2, &kind))?,
        record_key: row.get(3)?,
        operation: ChangeOperation::parse(&operation)
            .ok_or_else(|| invalid_text(4, &operation))?,
        payload: row.get(5)?,
        payload_digest: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn invalid_text(column: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        format!("unknown value {:?}", value).into(),
    )
}

impl Database {
    /// Number of unacknowledged local changes.
    pub fn pending_change_count(&self) -> DbResult<u64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM pending_changes", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Oldest pending changes first, at most `limit`.
    pub fn pending_changes(&self, limit: usize) -> DbResult<Vec<PendingChange>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT change_id, seq, record_kind, record_key, operation,
                   payload, payload_digest, created_at
            FROM pending_changes
            ORDER BY seq
            LIMIT ?1
            "#,
        )?;
        let rows = stmt.query_map([limit as i64], change_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Remove acknowledged changes and stamp sync provenance on the
    /// affected patients. Unknown IDs are skipped.
    ///
    /// Returns the number of outbox entries removed.
    pub fn acknowledge_changes(&self, change_ids: &[String], synced_at: i64) -> DbResult<u64> {
        if change_ids.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        let mut removed = 0u64;
        for change_id in change_ids {
            let entry: Option<(String, String, String)> = tx
                .query_row(
                    "SELECT record_kind, record_key, operation FROM pending_changes WHERE change_id = ?1",
                    [change_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;
            let Some((kind, record_key, operation)) = entry else {
                tracing::warn!(change_id = %change_id, "acknowledged change not in outbox");
                continue;
            };

            tx.execute(
                "DELETE FROM pending_changes WHERE change_id = ?1",
                [change_id],
            )?;
            removed += 1;

            if RecordKind::parse(&kind) == Some(RecordKind::Patient)
                && ChangeOperation::parse(&operation) != Some(ChangeOperation::Delete)
            {
                tx.execute(
                    r#"
                    UPDATE patients SET
                        last_synced_at = MAX(COALESCE(last_synced_at, 0), ?2),
                        sync_version = COALESCE(sync_version, 0) + 1
                    WHERE local_id = ?1
                    "#,
                    params![record_key, synced_at],
                )?;
            }
        }
        tx.commit()?;

        tracing::debug!(removed, "acknowledged pending changes");
        Ok(removed)
    }
}
