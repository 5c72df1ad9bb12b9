//! Patient models.

use serde::{Deserialize, Serialize};

/// A patient record.
///
/// `local_id` is the store key; `patient_id` is the human-readable external
/// identifier handed out by [`crate::identifier::IdGenerator`]. Neither changes
/// after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Patient {
    /// Local UUID - always present, generated by the store
    pub local_id: String,
    /// External identifier, e.g. `PT202501006`
    pub patient_id: String,
    /// Display name
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    /// Free-text location (ward, village, clinic room)
    pub location: Option<String>,
    pub initial_complaint: Option<String>,
    pub initial_diagnosis: Option<String>,
    /// Reference to a locally stored photo
    pub photo_uri: Option<String>,
    pub group_label: Option<String>,
    pub is_favorite: bool,
    /// Creation timestamp (epoch ms), immutable
    pub created_at: i64,
    /// Last update timestamp (epoch ms), never moves backwards
    pub updated_at: i64,
    /// Where the record came from and how far it has synced
    pub provenance: Option<Provenance>,
}

/// Sync provenance of a patient record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Provenance {
    /// Tag of the system the record originated from
    pub source_system: Option<String>,
    /// Identifier of the record in that system
    pub external_system_id: Option<String>,
    /// When a change to this record was last acknowledged by the remote
    pub last_synced_at: Option<i64>,
    /// Number of acknowledged pushes
    pub sync_version: i64,
    /// When the record was last changed on this device
    pub local_modified_at: Option<i64>,
}

impl Patient {
    /// Check whether every local change has been acknowledged.
    pub fn is_synced(&self) -> bool {
        match &self.provenance {
            Some(p) => match (p.last_synced_at, p.local_modified_at) {
                (Some(synced), Some(modified)) => synced >= modified,
                (Some(_), None) => true,
                (None, _) => false,
            },
            None => false,
        }
    }

    /// Merge a patch. Blank strings clear optional fields.
    pub(crate) fn apply(&mut self, patch: PatientPatch) {
        if let Some(name) = patch.name {
            self.name = name.trim().to_string();
        }
        merge_optional(&mut self.phone, patch.phone);
        merge_optional(&mut self.email, patch.email);
        merge_optional(&mut self.address, patch.address);
        merge_optional(&mut self.location, patch.location);
        merge_optional(&mut self.initial_complaint, patch.initial_complaint);
        merge_optional(&mut self.initial_diagnosis, patch.initial_diagnosis);
        merge_optional(&mut self.photo_uri, patch.photo_uri);
        merge_optional(&mut self.group_label, patch.group_label);
        if let Some(favorite) = patch.is_favorite {
            self.is_favorite = favorite;
        }
    }
}

/// Fields supplied when creating a patient.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NewPatient {
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub location: Option<String>,
    pub initial_complaint: Option<String>,
    pub initial_diagnosis: Option<String>,
    pub photo_uri: Option<String>,
    pub group_label: Option<String>,
    pub is_favorite: bool,
    /// Set when the record is imported from another system
    pub source_system: Option<String>,
}

impl NewPatient {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Partial update for a patient. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PatientPatch {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub location: Option<String>,
    pub initial_complaint: Option<String>,
    pub initial_diagnosis: Option<String>,
    pub photo_uri: Option<String>,
    pub group_label: Option<String>,
    pub is_favorite: Option<bool>,
}

impl PatientPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Trim a value, mapping blank strings to `None`.
pub(crate) fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn merge_optional(field: &mut Option<String>, patch: Option<String>) {
    if let Some(value) = patch {
        *field = normalize(Some(value));
    }
}
