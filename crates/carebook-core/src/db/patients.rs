//! Patient database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::outbox::append_change;
use super::{require_text, Database, DbError, DbResult, Matcher};
use crate::models::{
    normalize, ChangeOperation, NewPatient, Patient, PatientPatch, Provenance, RecordKind,
};

const PATIENT_SELECT: &str = r#"
    SELECT local_id, patient_id, name, phone, email, address, location,
           initial_complaint, initial_diagnosis, photo_uri, group_label, is_favorite,
           created_at, updated_at, source_system, external_system_id,
           last_synced_at, sync_version, local_modified_at
    FROM patients
"#;

/// Indexed patient fields that support lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatientIndex {
    /// External identifier (`patient_id`)
    PatientId,
    /// Identifier in the originating system
    ExternalSystemId,
}

impl PatientIndex {
    fn column(&self) -> &'static str {
        match self {
            PatientIndex::PatientId => "patient_id",
            PatientIndex::ExternalSystemId => "external_system_id",
        }
    }
}

fn patient_from_row(row: &Row<'_>) -> rusqlite::Result<Patient> {
    let source_system: Option<String> = row.get(14)?;
    let external_system_id: Option<String> = row.get(15)?;
    let last_synced_at: Option<i64> = row.get(16)?;
    let sync_version: Option<i64> = row.get(17)?;
    let local_modified_at: Option<i64> = row.get(18)?;

    let provenance = if source_system.is_none()
        && external_system_id.is_none()
        && last_synced_at.is_none()
        && sync_version.is_none()
        && local_modified_at.is_none()
    {
        None
    } else {
        Some(Provenance {
            source_system,
            external_system_id,
            last_synced_at,
            sync_version: sync_version.unwrap_or(0),
            local_modified_at,
        })
    };

    Ok(Patient {
        local_id: row.get(0)?,
        patient_id: row.get(1)?,
        name: row.get(2)?,
        phone: row.get(3)?,
        email: row.get(4)?,
        address: row.get(5)?,
        location: row.get(6)?,
        initial_complaint: row.get(7)?,
        initial_diagnosis: row.get(8)?,
        photo_uri: row.get(9)?,
        group_label: row.get(10)?,
        is_favorite: row.get::<_, Option<bool>>(11)?.unwrap_or(false),
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
        provenance,
    })
}

impl Database {
    /// Insert a new patient under an already generated external identifier.
    ///
    /// `patient_id` is trimmed before the uniqueness check; the store also
    /// carries a unique index on it.
    pub fn insert_patient(&self, new: NewPatient, patient_id: &str) -> DbResult<Patient> {
        require_text("name", &new.name)?;
        require_text("patient_id", patient_id)?;
        let patient_id = patient_id.trim();
        if self.get_patient_by_patient_id(patient_id)?.is_some() {
            return Err(DbError::Validation(format!(
                "patient_id {} already exists",
                patient_id
            )));
        }

        let now = self.now_ms();
        let patient = Patient {
            local_id: uuid::Uuid::new_v4().to_string(),
            patient_id: patient_id.to_string(),
            name: new.name.trim().to_string(),
            phone: normalize(new.phone),
            email: normalize(new.email),
            address: normalize(new.address),
            location: normalize(new.location),
            initial_complaint: normalize(new.initial_complaint),
            initial_diagnosis: normalize(new.initial_diagnosis),
            photo_uri: normalize(new.photo_uri),
            group_label: normalize(new.group_label),
            is_favorite: new.is_favorite,
            created_at: now,
            updated_at: now,
            provenance: Some(Provenance {
                source_system: normalize(new.source_system),
                local_modified_at: Some(now),
                ..Default::default()
            }),
        };
        let provenance = patient.provenance.clone().unwrap_or_default();

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            r#"
            INSERT INTO patients (
                local_id, patient_id, name, phone, email, address, location,
                initial_complaint, initial_diagnosis, photo_uri, group_label, is_favorite,
                created_at, updated_at, source_system, external_system_id,
                last_synced_at, sync_version, local_modified_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
            "#,
            params![
                patient.local_id,
                patient.patient_id,
                patient.name,
                patient.phone,
                patient.email,
                patient.address,
                patient.location,
                patient.initial_complaint,
                patient.initial_diagnosis,
                patient.photo_uri,
                patient.group_label,
                patient.is_favorite,
                patient.created_at,
                patient.updated_at,
                provenance.source_system,
                provenance.external_system_id,
                provenance.last_synced_at,
                provenance.sync_version,
                provenance.local_modified_at,
            ],
        )?;
        append_change(
            &tx,
            RecordKind::Patient,
            &patient.local_id,
            ChangeOperation::Create,
            &serde_json::to_string(&patient)?,
            now,
        )?;
        tx.commit()?;

        tracing::debug!(local_id = %patient.local_id, patient_id = %patient.patient_id, "patient inserted");
        self.notify_changes(1);
        Ok(patient)
    }

    /// Merge `patch` into an existing patient.
    ///
    /// `updated_at` never moves backwards: if the clock reads earlier than the
    /// stored value, the stored value is kept.
    pub fn update_patient(&self, local_id: &str, patch: PatientPatch) -> DbResult<Patient> {
        let mut patient = self
            .get_patient(local_id)?
            .ok_or_else(|| DbError::NotFound(format!("patient {}", local_id)))?;

        if patch.is_empty() {
            tracing::debug!(local_id, "empty patch still recorded as an update");
        }
        patient.apply(patch);
        require_text("name", &patient.name)?;

        let now = self.now_ms();
        patient.updated_at = patient.updated_at.max(now);
        let provenance = patient.provenance.get_or_insert_with(Provenance::default);
        provenance.local_modified_at = Some(patient.updated_at);
        let local_modified_at = provenance.local_modified_at;

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            r#"
            UPDATE patients SET
                name = ?2,
                phone = ?3,
                email = ?4,
                address = ?5,
                location = ?6,
                initial_complaint = ?7,
                initial_diagnosis = ?8,
                photo_uri = ?9,
                group_label = ?10,
                is_favorite = ?11,
                updated_at = ?12,
                local_modified_at = ?13
            WHERE local_id = ?1
            "#,
            params![
                patient.local_id,
                patient.name,
                patient.phone,
                patient.email,
                patient.address,
                patient.location,
                patient.initial_complaint,
                patient.initial_diagnosis,
                patient.photo_uri,
                patient.group_label,
                patient.is_favorite,
                patient.updated_at,
                local_modified_at,
            ],
        )?;
        append_change(
            &tx,
            RecordKind::Patient,
            &patient.local_id,
            ChangeOperation::Update,
            &serde_json::to_string(&patient)?,
            now,
        )?;
        tx.commit()?;

        self.notify_changes(1);
        Ok(patient)
    }

    /// Mark or unmark a patient as favorite.
    pub fn set_favorite(&self, local_id: &str, favorite: bool) -> DbResult<Patient> {
        self.update_patient(
            local_id,
            PatientPatch {
                is_favorite: Some(favorite),
                ..Default::default()
            },
        )
    }

    /// Get a patient by local ID.
    pub fn get_patient(&self, local_id: &str) -> DbResult<Option<Patient>> {
        self.conn
            .query_row(
                &format!("{} WHERE local_id = ?1", PATIENT_SELECT),
                [local_id],
                patient_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Get a patient by external identifier.
    pub fn get_patient_by_patient_id(&self, patient_id: &str) -> DbResult<Option<Patient>> {
        self.conn
            .query_row(
                &format!("{} WHERE patient_id = ?1", PATIENT_SELECT),
                [patient_id],
                patient_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Look patients up by an indexed field.
    ///
    /// Results are ordered by the indexed field, then creation time.
    pub fn query_patients(&self, index: PatientIndex, matcher: &Matcher) -> DbResult<Vec<Patient>> {
        let column = index.column();
        let (predicate, value) = matcher.predicate(column);
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE {} ORDER BY {}, created_at, local_id",
            PATIENT_SELECT, predicate, column
        ))?;
        let rows = stmt.query_map([value], patient_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Every patient, oldest first.
    pub fn fetch_all_patients(&self) -> DbResult<Vec<Patient>> {
        let mut stmt = self.conn.prepare(&format!(
            "{} ORDER BY created_at, local_id",
            PATIENT_SELECT
        ))?;
        let rows = stmt.query_map([], patient_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn patient_count(&self) -> DbResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM patients", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Delete a patient and all of their notes.
    ///
    /// Returns the number of pending changes recorded (one per removed row).
    pub fn delete_patient(&self, local_id: &str) -> DbResult<u64> {
        let patient = self
            .get_patient(local_id)?
            .ok_or_else(|| DbError::NotFound(format!("patient {}", local_id)))?;
        let notes = self.notes_for_patient(local_id)?;
        let now = self.now_ms();

        let tx = self.conn.unchecked_transaction()?;
        for note in &notes {
            tx.execute("DELETE FROM clinical_notes WHERE local_id = ?1", [&note.local_id])?;
            append_change(
                &tx,
                RecordKind::ClinicalNote,
                &note.local_id,
                ChangeOperation::Delete,
                &serde_json::to_string(note)?,
                now,
            )?;
        }
        tx.execute("DELETE FROM patients WHERE local_id = ?1", [local_id])?;
        append_change(
            &tx,
            RecordKind::Patient,
            local_id,
            ChangeOperation::Delete,
            &serde_json::to_string(&patient)?,
            now,
        )?;
        tx.commit()?;

        let recorded = notes.len() as u64 + 1;
        tracing::debug!(local_id, notes = notes.len(), "patient deleted");
        self.notify_changes(recorded);
        Ok(recorded)
    }

    /// Record where a patient lives remotely. Not a local change: nothing is
    /// queued for sync.
    pub fn link_patient_external_id(
        &self,
        local_id: &str,
        source_system: &str,
        external_system_id: &str,
    ) -> DbResult<Patient> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE patients SET
                source_system = ?2,
                external_system_id = ?3,
                sync_version = COALESCE(sync_version, 0)
            WHERE local_id = ?1
            "#,
            params![local_id, source_system, external_system_id],
        )?;
        if rows_affected == 0 {
            return Err(DbError::NotFound(format!("patient {}", local_id)));
        }
        self.get_patient(local_id)?
            .ok_or_else(|| DbError::NotFound(format!("patient {}", local_id)))
    }
}
