//! Clinical note database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::outbox::append_change;
use super::{require_text, Database, DbError, DbResult, Matcher};
use crate::models::{
    normalize, ChangeOperation, ClinicalNote, NewClinicalNote, NotePatch, RecordKind,
};

const NOTE_SELECT: &str = r#"
    SELECT local_id, patient_local_id, content, visit_type, author_id, created_at, updated_at
    FROM clinical_notes
"#;

/// Indexed note fields that support lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteIndex {
    /// Owning patient's local ID
    PatientLocalId,
}

impl NoteIndex {
    fn column(&self) -> &'static str {
        match self {
            NoteIndex::PatientLocalId => "patient_local_id",
        }
    }
}

fn note_from_row(row: &Row<'_>) -> rusqlite::Result<ClinicalNote> {
    Ok(ClinicalNote {
        local_id: row.get(0)?,
        patient_local_id: row.get(1)?,
        content: row.get(2)?,
        visit_type: row.get(3)?,
        author_id: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

impl Database {
    /// Insert a note. The owning patient must already exist.
    pub fn insert_note(&self, new: NewClinicalNote) -> DbResult<ClinicalNote> {
        require_text("content", &new.content)?;
        require_text("patient_local_id", &new.patient_local_id)?;
        if self.get_patient(&new.patient_local_id)?.is_none() {
            return Err(DbError::Validation(format!(
                "patient {} does not exist",
                new.patient_local_id
            )));
        }

        let now = self.now_ms();
        let note = ClinicalNote {
            local_id: uuid::Uuid::new_v4().to_string(),
            patient_local_id: new.patient_local_id,
            content: new.content.trim().to_string(),
            visit_type: normalize(new.visit_type),
            author_id: normalize(new.author_id),
            created_at: now,
            updated_at: now,
        };

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            r#"
            INSERT INTO clinical_notes (
                local_id, patient_local_id, content, visit_type, author_id,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                note.local_id,
                note.patient_local_id,
                note.content,
                note.visit_type,
                note.author_id,
                note.created_at,
                note.updated_at,
            ],
        )?;
        append_change(
            &tx,
            RecordKind::ClinicalNote,
            &note.local_id,
            ChangeOperation::Create,
            &serde_json::to_string(&note)?,
            now,
        )?;
        tx.commit()?;

        self.notify_changes(1);
        Ok(note)
    }

    /// Merge `patch` into an existing note, clamping `updated_at` like
    /// [`Database::update_patient`].
    pub fn update_note(&self, local_id: &str, patch: NotePatch) -> DbResult<ClinicalNote> {
        let mut note = self
            .get_note(local_id)?
            .ok_or_else(|| DbError::NotFound(format!("note {}", local_id)))?;

        note.apply(patch);
        require_text("content", &note.content)?;

        let now = self.now_ms();
        note.updated_at = note.updated_at.max(now);

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            r#"
            UPDATE clinical_notes SET
                content = ?2,
                visit_type = ?3,
                author_id = ?4,
                updated_at = ?5
            WHERE local_id = ?1
            "#,
            params![
                note.local_id,
                note.content,
                note.visit_type,
                note.author_id,
                note.updated_at,
            ],
        )?;
        append_change(
            &tx,
            RecordKind::ClinicalNote,
            &note.local_id,
            ChangeOperation::Update,
            &serde_json::to_string(&note)?,
            now,
        )?;
        tx.commit()?;

        self.notify_changes(1);
        Ok(note)
    }

    /// Get a note by local ID.
    pub fn get_note(&self, local_id: &str) -> DbResult<Option<ClinicalNote>> {
        self.conn
            .query_row(
                &format!("{} WHERE local_id = ?1", NOTE_SELECT),
                [local_id],
                note_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Look notes up by an indexed field, ordered by that field then
    /// creation time.
    pub fn query_notes(&self, index: NoteIndex, matcher: &Matcher) -> DbResult<Vec<ClinicalNote>> {
        let column = index.column();
        let (predicate, value) = matcher.predicate(column);
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE {} ORDER BY {}, created_at, local_id",
            NOTE_SELECT, predicate, column
        ))?;
        let rows = stmt.query_map([value], note_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// All notes for one patient, oldest first.
    pub fn notes_for_patient(&self, patient_local_id: &str) -> DbResult<Vec<ClinicalNote>> {
        self.query_notes(
            NoteIndex::PatientLocalId,
            &Matcher::Equals(patient_local_id.to_string()),
        )
    }

    /// Every note, oldest first.
    pub fn fetch_all_notes(&self) -> DbResult<Vec<ClinicalNote>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} ORDER BY created_at, local_id", NOTE_SELECT))?;
        let rows = stmt.query_map([], note_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Delete a note.
    pub fn delete_note(&self, local_id: &str) -> DbResult<()> {
        let note = self
            .get_note(local_id)?
            .ok_or_else(|| DbError::NotFound(format!("note {}", local_id)))?;
        let now = self.now_ms();

        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM clinical_notes WHERE local_id = ?1", [local_id])?;
        append_change(
            &tx,
            RecordKind::ClinicalNote,
            local_id,
            ChangeOperation::Delete,
            &serde_json::to_string(&note)?,
            now,
        )?;
        tx.commit()?;

        self.notify_changes(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewPatient;

    fn setup() -> (Database, String) {
        let db = Database::open_in_memory().unwrap();
        let patient = db.insert_patient(NewPatient::new("Max"), "PT202501001").unwrap();
        (db, patient.local_id)
    }

    #[test]
    fn test_insert_and_get() {
        let (db, patient_id) = setup();

        let mut new = NewClinicalNote::new(&patient_id, "BP 120/80, afebrile");
        new.visit_type = Some("consultation".into());
        new.author_id = Some("user-7".into());
        let note = db.insert_note(new).unwrap();

        let retrieved = db.get_note(&note.local_id).unwrap().unwrap();
        assert_eq!(retrieved, note);
        assert_eq!(retrieved.visit_type, Some("consultation".into()));
    }

    #[test]
    fn test_insert_requires_existing_patient() {
        let (db, _) = setup();
        let err = db
            .insert_note(NewClinicalNote::new("no-such-patient", "text"))
            .unwrap_err();
        assert!(matches!(err, DbError::Validation(_)));
    }

    #[test]
    fn test_insert_requires_content() {
        let (db, patient_id) = setup();
        let err = db
            .insert_note(NewClinicalNote::new(&patient_id, "\n"))
            .unwrap_err();
        assert!(matches!(err, DbError::Validation(_)));
    }

    #[test]
    fn test_update_note() {
        let (db, patient_id) = setup();
        let note = db
            .insert_note(NewClinicalNote::new(&patient_id, "Initial"))
            .unwrap();

        let updated = db
            .update_note(
                &note.local_id,
                NotePatch {
                    content: Some("Revised".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.content, "Revised");
        assert_eq!(updated.patient_local_id, patient_id);
        assert!(updated.updated_at >= note.updated_at);

        let err = db.update_note("missing", NotePatch::default()).unwrap_err();
        assert!(matches!(err, DbError::NotFound(_)));
    }

    #[test]
    fn test_notes_for_patient() {
        let (db, first) = setup();
        let second = db
            .insert_patient(NewPatient::new("Luna"), "PT202501002")
            .unwrap()
            .local_id;

        db.insert_note(NewClinicalNote::new(&first, "a")).unwrap();
        db.insert_note(NewClinicalNote::new(&second, "b")).unwrap();
        db.insert_note(NewClinicalNote::new(&first, "c")).unwrap();

        let notes = db.notes_for_patient(&first).unwrap();
        assert_eq!(notes.len(), 2);
        assert!(notes.iter().all(|n| n.patient_local_id == first));
        assert_eq!(db.fetch_all_notes().unwrap().len(), 3);
    }

    #[test]
    fn test_delete_note() {
        let (db, patient_id) = setup();
        let note = db
            .insert_note(NewClinicalNote::new(&patient_id, "temp"))
            .unwrap();

        db.delete_note(&note.local_id).unwrap();
        assert!(db.get_note(&note.local_id).unwrap().is_none());
        assert!(matches!(
            db.delete_note(&note.local_id),
            Err(DbError::NotFound(_))
        ));
    }

    mod props {
        use super::*;
        use crate::clock::ManualClock;
        use proptest::prelude::*;
        use std::collections::BTreeMap;
        use std::sync::Arc;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            #[test]
            fn fetch_all_returns_exactly_what_was_written(
                steps in proptest::collection::vec(
                    ("[a-z]{1,20}", -5_000i64..5_000, proptest::option::of(-5_000i64..5_000)),
                    0..25,
                )
            ) {
                let clock = Arc::new(ManualClock::new(1_000_000));
                let db = Database::open_in_memory_with_clock(clock.clone()).unwrap();
                let patient = db.insert_patient(NewPatient::new("Max"), "PT202501001").unwrap();
                let mut expected = BTreeMap::new();

                for (content, insert_shift, update_shift) in steps {
                    clock.advance(insert_shift);
                    let mut note = db
                        .insert_note(NewClinicalNote::new(&patient.local_id, content))
                        .unwrap();

                    if let Some(shift) = update_shift {
                        clock.advance(shift);
                        note = db
                            .update_note(
                                &note.local_id,
                                NotePatch {
                                    visit_type: Some("follow-up".into()),
                                    ..Default::default()
                                },
                            )
                            .unwrap();
                    }
                    expected.insert(note.local_id.clone(), note);
                }

                let fetched: BTreeMap<_, _> = db
                    .fetch_all_notes()
                    .unwrap()
                    .into_iter()
                    .map(|n| (n.local_id.clone(), n))
                    .collect();
                prop_assert_eq!(&fetched, &expected);
                for note in fetched.values() {
                    prop_assert!(note.created_at <= note.updated_at);
                }
            }
        }
    }
}
