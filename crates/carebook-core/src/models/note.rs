//! Clinical note models.

use serde::{Deserialize, Serialize};

use super::patient::merge_optional;

/// A free-text note attached to a patient.
///
/// Notes have no external identifier; they are addressed by `local_id` and
/// the owning patient's `local_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClinicalNote {
    pub local_id: String,
    /// Owning patient's local ID
    pub patient_local_id: String,
    pub content: String,
    /// Visit type tag (e.g. "consultation", "follow_up")
    pub visit_type: Option<String>,
    /// Authoring user ID
    pub author_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ClinicalNote {
    pub(crate) fn apply(&mut self, patch: NotePatch) {
        if let Some(content) = patch.content {
            self.content = content.trim().to_string();
        }
        merge_optional(&mut self.visit_type, patch.visit_type);
        merge_optional(&mut self.author_id, patch.author_id);
    }
}

/// Fields supplied when creating a note.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NewClinicalNote {
    pub patient_local_id: String,
    pub content: String,
    pub visit_type: Option<String>,
    pub author_id: Option<String>,
}

impl NewClinicalNote {
    pub fn new(patient_local_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            patient_local_id: patient_local_id.into(),
            content: content.into(),
            ..Default::default()
        }
    }
}

/// Partial update for a note. A note cannot move to another patient.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NotePatch {
    pub content: Option<String>,
    pub visit_type: Option<String>,
    pub author_id: Option<String>,
}
