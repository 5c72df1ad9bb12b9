//! Schema migration integration tests against file-backed stores.

use carebook_core::db::migrations::{layout_mismatches, migrate, migrate_to, schema_version};
use carebook_core::db::schema::CURRENT_SCHEMA_VERSION;
use carebook_core::db::{Database, DbError, MigrationError};
use carebook_core::models::NewPatient;
use rusqlite::{params, Connection};

fn seed_v1(conn: &mut Connection) {
    migrate_to(conn, 1).unwrap();
    conn.execute(
        "INSERT INTO patients (local_id, patient_id, name, phone, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params!["p-1", "PT202412001", "Amara Okafor", "555-0101", 1_000, 2_000],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO patient_notes (local_id, patient_local_id, content, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params!["n-1", "p-1", "Presented with fever", 1_500, 1_500],
    )
    .unwrap();
}

#[test]
fn test_v1_store_upgrades_and_keeps_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.sqlite3");

    {
        let mut conn = Connection::open(&path).unwrap();
        seed_v1(&mut conn);
        assert_eq!(schema_version(&conn).unwrap(), 1);
    }

    let db = Database::open(&path).unwrap();
    assert_eq!(db.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
    assert!(layout_mismatches(db.conn()).unwrap().is_empty());

    let patient = db.get_patient("p-1").unwrap().unwrap();
    assert_eq!(patient.patient_id, "PT202412001");
    assert_eq!(patient.phone.as_deref(), Some("555-0101"));
    assert!(!patient.is_favorite);
    assert_eq!(patient.photo_uri, None);
    assert_eq!(patient.provenance, None);

    let notes = db.notes_for_patient("p-1").unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].content, "Presented with fever");
    assert_eq!(notes[0].visit_type, None);

    // Rows that predate the outbox were never queued.
    assert_eq!(db.pending_change_count().unwrap(), 0);
}

#[test]
fn test_every_intermediate_version_reaches_current() {
    for start in 1..CURRENT_SCHEMA_VERSION {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.sqlite3");
        {
            let mut conn = Connection::open(&path).unwrap();
            migrate_to(&mut conn, start).unwrap();
            conn.execute(
                "INSERT INTO patients (local_id, patient_id, name, created_at, updated_at)
                 VALUES ('p', 'PT202501001', 'Kept', 1, 1)",
                [],
            )
            .unwrap();
        }

        let mut conn = Connection::open(&path).unwrap();
        let report = migrate(&mut conn).unwrap();
        assert_eq!(report.from_version, start);
        assert_eq!(report.to_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(
            report.applied,
            ((start + 1)..=CURRENT_SCHEMA_VERSION).collect::<Vec<_>>()
        );

        let name: String = conn
            .query_row("SELECT name FROM patients WHERE local_id = 'p'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(name, "Kept");
    }
}

#[test]
fn test_reopen_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.sqlite3");

    {
        let db = Database::open(&path).unwrap();
        db.insert_patient(NewPatient::new("Bo"), "PT202501001").unwrap();
    }

    let mut conn = Connection::open(&path).unwrap();
    let report = migrate(&mut conn).unwrap();
    assert!(report.is_noop());
    drop(conn);

    let db = Database::open(&path).unwrap();
    assert_eq!(db.patient_count().unwrap(), 1);
    assert_eq!(db.pending_change_count().unwrap(), 1);
}

#[test]
fn test_newer_store_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.sqlite3");
    {
        let conn = Connection::open(&path).unwrap();
        conn.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION + 1)
            .unwrap();
    }

    let err = Database::open(&path).unwrap_err();
    assert!(matches!(
        err,
        DbError::Migration(MigrationError::Downgrade { .. })
    ));
}

#[test]
fn test_duplicate_identifiers_repaired_on_upgrade() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.sqlite3");
    {
        let mut conn = Connection::open(&path).unwrap();
        migrate_to(&mut conn, 4).unwrap();
        for (local_id, created_at) in [("first", 1), ("second", 2)] {
            conn.execute(
                "INSERT INTO patients (local_id, patient_id, name, created_at, updated_at)
                 VALUES (?1, 'PT202501001', 'Dup', ?2, ?2)",
                params![local_id, created_at],
            )
            .unwrap();
        }
    }

    let db = Database::open(&path).unwrap();
    assert!(layout_mismatches(db.conn()).unwrap().is_empty());
    assert_eq!(
        db.get_patient("first").unwrap().unwrap().patient_id,
        "PT202501001"
    );
    assert_eq!(
        db.get_patient("second").unwrap().unwrap().patient_id,
        "PT202501001-second"
    );
    assert!(db
        .insert_patient(NewPatient::new("Late"), "PT202501001")
        .is_err());
}
