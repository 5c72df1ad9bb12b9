//! Pending change (outbox) models.

use serde::{Deserialize, Serialize};

/// Kind of record a change applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Patient,
    ClinicalNote,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Patient => "patient",
            RecordKind::ClinicalNote => "clinical_note",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "patient" => Some(RecordKind::Patient),
            "clinical_note" => Some(RecordKind::ClinicalNote),
            _ => None,
        }
    }
}

/// What happened to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOperation {
    Create,
    Update,
    Delete,
}

impl ChangeOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOperation::Create => "create",
            ChangeOperation::Update => "update",
            ChangeOperation::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(ChangeOperation::Create),
            "update" => Some(ChangeOperation::Update),
            "delete" => Some(ChangeOperation::Delete),
            _ => None,
        }
    }
}

/// A local mutation not yet acknowledged by the remote.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingChange {
    /// Idempotency key for the remote; re-sending the same ID must not
    /// duplicate the change server-side.
    pub change_id: String,
    /// Drain order
    pub seq: i64,
    pub record_kind: RecordKind,
    pub record_key: String,
    pub operation: ChangeOperation,
    /// JSON snapshot of the record at write time
    pub payload: String,
    /// Hex SHA-256 of `payload`
    pub payload_digest: String,
    pub created_at: i64,
}
