//! Forward-only schema migrations.
//!
//! Each [`Migration`] moves the store from `version - 1` to `version` inside
//! one SQLite transaction together with the `PRAGMA user_version` stamp, so a
//! failed step leaves the store at the last committed version.

use rusqlite::{Connection, Transaction};
use thiserror::Error;

use super::schema::{
    self, index_name, index_sql, ColumnSpec, TableSchema, CLINICAL_NOTES, CURRENT_SCHEMA_VERSION,
    LEGACY_NOTES, NOTE_COLUMNS_V1, NOTE_COLUMNS_V2, PATIENTS, PATIENT_COLUMNS_V1,
    PATIENT_COLUMNS_V2, PATIENT_COLUMNS_V4, PENDING_CHANGES, PENDING_CHANGE_COLUMNS,
};

/// Migration errors. All of them are fatal at startup.
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store is at schema version {found}, cannot migrate down to {target}")]
    Downgrade { found: u32, target: u32 },

    #[error("invalid migration plan: {0}")]
    InvalidPlan(String),

    #[error("invalid step in migration to v{version}: {reason}")]
    InvalidStep { version: u32, reason: String },

    #[error("migration to v{version} failed: {source}")]
    StepFailed {
        version: u32,
        #[source]
        source: rusqlite::Error,
    },
}

pub type MigrationResult<T> = Result<T, MigrationError>;

/// One structural change.
#[derive(Debug, Clone)]
pub enum MigrationStep {
    CreateTable(TableSchema),
    /// Optional columns only; existing rows read them as NULL.
    AddColumns {
        table: &'static str,
        columns: Vec<ColumnSpec>,
    },
    /// Structural fixes (rename, drop, recreate). Destructive statements
    /// discard local-only rows in the affected table.
    Raw(&'static str),
}

/// All steps needed to reach `version`.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub steps: Vec<MigrationStep>,
}

/// What a migration run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub from_version: u32,
    pub to_version: u32,
    pub applied: Vec<u32>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

const RENAME_NOTES_V3: &str = r#"
ALTER TABLE patient_notes RENAME TO clinical_notes;
DROP INDEX IF EXISTS idx_patient_notes_patient_local_id;
CREATE INDEX IF NOT EXISTS idx_clinical_notes_patient_local_id ON clinical_notes(patient_local_id);
"#;

// Rows sharing a patient_id keep the oldest; the others get their local id
// appended so the unique index can be built.
const UNIQUE_PATIENT_ID_V5: &str = r#"
UPDATE patients SET patient_id = patient_id || '-' || local_id
WHERE rowid NOT IN (SELECT MIN(rowid) FROM patients GROUP BY patient_id);
DROP INDEX IF EXISTS idx_patients_patient_id;
CREATE UNIQUE INDEX IF NOT EXISTS idx_patients_patient_id ON patients(patient_id);
"#;

/// The canonical migration lineage, ascending.
pub fn migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "patients and patient notes",
            steps: vec![
                MigrationStep::CreateTable(TableSchema::new(PATIENTS, PATIENT_COLUMNS_V1)),
                MigrationStep::CreateTable(TableSchema::new(LEGACY_NOTES, NOTE_COLUMNS_V1)),
            ],
        },
        Migration {
            version: 2,
            description: "patient photo, group and favorite; note visit type and author",
            steps: vec![
                MigrationStep::AddColumns {
                    table: PATIENTS,
                    columns: PATIENT_COLUMNS_V2.to_vec(),
                },
                MigrationStep::AddColumns {
                    table: LEGACY_NOTES,
                    columns: NOTE_COLUMNS_V2.to_vec(),
                },
            ],
        },
        Migration {
            version: 3,
            description: "rename patient_notes to clinical_notes",
            steps: vec![MigrationStep::Raw(RENAME_NOTES_V3)],
        },
        Migration {
            version: 4,
            description: "patient sync provenance and pending change outbox",
            steps: vec![
                MigrationStep::AddColumns {
                    table: PATIENTS,
                    columns: PATIENT_COLUMNS_V4.to_vec(),
                },
                MigrationStep::CreateTable(TableSchema::new(
                    PENDING_CHANGES,
                    PENDING_CHANGE_COLUMNS,
                )),
            ],
        },
        Migration {
            version: 5,
            description: "unique patient identifiers",
            steps: vec![MigrationStep::Raw(UNIQUE_PATIENT_ID_V5)],
        },
    ]
}

/// Read the schema version stamped on the store.
pub fn schema_version(conn: &Connection) -> MigrationResult<u32> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(u32::try_from(version).unwrap_or(0))
}

/// Bring the store up to [`CURRENT_SCHEMA_VERSION`].
pub fn migrate(conn: &mut Connection) -> MigrationResult<MigrationReport> {
    run_migrations(conn, &migrations(), CURRENT_SCHEMA_VERSION)
}

/// Bring the store up to `target`, which must not exceed the current version.
pub fn migrate_to(conn: &mut Connection, target: u32) -> MigrationResult<MigrationReport> {
    if target > CURRENT_SCHEMA_VERSION {
        return Err(MigrationError::InvalidPlan(format!(
            "target v{} is newer than the registry (v{})",
            target, CURRENT_SCHEMA_VERSION
        )));
    }
    run_migrations(conn, &migrations(), target)
}

/// Apply every migration in `plan` whose version is in `(current, target]`.
pub fn run_migrations(
    conn: &mut Connection,
    plan: &[Migration],
    target: u32,
) -> MigrationResult<MigrationReport> {
    validate_plan(plan, target)?;

    let from_version = schema_version(conn)?;
    if from_version > target {
        return Err(MigrationError::Downgrade {
            found: from_version,
            target,
        });
    }

    let mut applied = Vec::new();
    for migration in plan
        .iter()
        .filter(|m| m.version > from_version && m.version <= target)
    {
        apply_migration(conn, migration).map_err(|e| {
            tracing::error!(
                version = migration.version,
                error = %e,
                "schema migration failed, store left at previous version"
            );
            e
        })?;
        tracing::info!(
            version = migration.version,
            description = migration.description,
            "applied schema migration"
        );
        applied.push(migration.version);
    }

    Ok(MigrationReport {
        from_version,
        to_version: schema_version(conn)?,
        applied,
    })
}

/// Check ordering and step payloads before anything touches the store.
pub fn validate_plan(plan: &[Migration], target: u32) -> MigrationResult<()> {
    let mut expected = 1;
    for migration in plan {
        if migration.version != expected {
            return Err(MigrationError::InvalidPlan(format!(
                "expected v{}, found v{}",
                expected, migration.version
            )));
        }
        if migration.steps.is_empty() {
            return Err(MigrationError::InvalidStep {
                version: migration.version,
                reason: "migration has no steps".into(),
            });
        }
        for step in &migration.steps {
            validate_step(migration.version, step)?;
        }
        expected += 1;
    }

    let last = expected - 1;
    if target > last {
        return Err(MigrationError::InvalidPlan(format!(
            "plan ends at v{} but target is v{}",
            last, target
        )));
    }
    Ok(())
}

fn validate_step(version: u32, step: &MigrationStep) -> MigrationResult<()> {
    let invalid = |reason: String| MigrationError::InvalidStep { version, reason };
    match step {
        MigrationStep::CreateTable(table) => {
            if table.columns.is_empty() {
                return Err(invalid(format!("table {} has no columns", table.name)));
            }
            if table.columns.iter().filter(|c| c.primary_key).count() != 1 {
                return Err(invalid(format!(
                    "table {} must have exactly one primary key",
                    table.name
                )));
            }
        }
        MigrationStep::AddColumns { table, columns } => {
            if columns.is_empty() {
                return Err(invalid(format!("no columns to add to {}", table)));
            }
            if let Some(column) = columns.iter().find(|c| !c.optional || c.primary_key) {
                return Err(invalid(format!(
                    "column {}.{} must be optional to be added",
                    table, column.name
                )));
            }
        }
        MigrationStep::Raw(sql) => {
            if sql.trim().is_empty() {
                return Err(invalid("empty raw statement".into()));
            }
        }
    }
    Ok(())
}

fn apply_migration(conn: &mut Connection, migration: &Migration) -> MigrationResult<()> {
    let step_failed = |source| MigrationError::StepFailed {
        version: migration.version,
        source,
    };

    let tx = conn.transaction()?;
    for step in &migration.steps {
        apply_step(&tx, step).map_err(step_failed)?;
    }
    tx.pragma_update(None, "user_version", migration.version)
        .map_err(step_failed)?;
    tx.commit().map_err(step_failed)?;
    Ok(())
}

fn apply_step(tx: &Transaction<'_>, step: &MigrationStep) -> rusqlite::Result<()> {
    match step {
        MigrationStep::CreateTable(table) => {
            tx.execute_batch(&table.create_sql())?;
            for column in table.indexed_columns() {
                tx.execute_batch(&index_sql(table.name, column))?;
            }
        }
        MigrationStep::AddColumns { table, columns } => {
            for column in columns {
                tx.execute_batch(&format!(
                    "ALTER TABLE {} ADD COLUMN {}",
                    table,
                    column.column_sql()
                ))?;
                if column.indexed {
                    tx.execute_batch(&index_sql(table, column))?;
                }
            }
        }
        MigrationStep::Raw(sql) => tx.execute_batch(sql)?,
    }
    Ok(())
}

/// Compare the on-disk layout with the registry at the store's version.
///
/// Returns a list of human-readable mismatches; empty means consistent.
pub fn layout_mismatches(conn: &Connection) -> MigrationResult<Vec<String>> {
    let version = schema_version(conn)?;
    let Some(tables) = schema::tables_at(version) else {
        return Ok(vec![format!("unsupported schema version {}", version)]);
    };

    let mut mismatches = Vec::new();
    for table in &tables {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table.name))?;
        let on_disk: Vec<(String, String, bool)> = stmt
            .query_map([], |row| Ok((row.get(1)?, row.get(2)?, row.get::<_, i64>(3)? != 0)))?
            .collect::<Result<_, _>>()?;

        if on_disk.is_empty() {
            mismatches.push(format!("missing table {}", table.name));
            continue;
        }

        for column in &table.columns {
            match on_disk.iter().find(|(name, _, _)| name == column.name) {
                None => mismatches.push(format!("missing column {}.{}", table.name, column.name)),
                Some((_, sql_type, not_null)) => {
                    if sql_type != column.kind.sql_type() {
                        mismatches.push(format!(
                            "{}.{} has type {}, expected {}",
                            table.name,
                            column.name,
                            sql_type,
                            column.kind.sql_type()
                        ));
                    }
                    if *not_null == column.optional {
                        mismatches.push(format!(
                            "{}.{} nullability differs from registry",
                            table.name, column.name
                        ));
                    }
                }
            }
        }
        for (name, _, _) in &on_disk {
            if table.column(name).is_none() {
                mismatches.push(format!("unexpected column {}.{}", table.name, name));
            }
        }

        let mut stmt = conn.prepare(&format!("PRAGMA index_list({})", table.name))?;
        let indexes: Vec<(String, bool)> = stmt
            .query_map([], |row| Ok((row.get(1)?, row.get::<_, i64>(2)? != 0)))?
            .collect::<Result<_, _>>()?;

        for column in table.indexed_columns() {
            let name = index_name(table.name, column.name);
            match indexes.iter().find(|(index, _)| *index == name) {
                None => mismatches.push(format!("missing index {}", name)),
                Some((_, unique)) if *unique != column.unique => mismatches.push(format!(
                    "index {} uniqueness differs from registry",
                    name
                )),
                Some(_) => {}
            }
        }
    }

    if version >= 3 {
        let legacy: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [LEGACY_NOTES],
            |row| row.get(0),
        )?;
        if legacy > 0 {
            mismatches.push(format!(
                "legacy table {} still present next to {}",
                LEGACY_NOTES, CLINICAL_NOTES
            ));
        }
    }

    Ok(mismatches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::ColumnType;

    fn memory() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        conn
    }

    #[test]
    fn test_canonical_plan_is_valid() {
        validate_plan(&migrations(), CURRENT_SCHEMA_VERSION).unwrap();
        assert_eq!(
            migrations().last().unwrap().version,
            CURRENT_SCHEMA_VERSION
        );
    }

    #[test]
    fn test_fresh_store_reaches_current() {
        let mut conn = memory();
        let report = migrate(&mut conn).unwrap();

        assert_eq!(report.from_version, 0);
        assert_eq!(report.to_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(report.applied, vec![1, 2, 3, 4, 5]);
        assert!(layout_mismatches(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_second_run_is_noop() {
        let mut conn = memory();
        migrate(&mut conn).unwrap();

        let report = migrate(&mut conn).unwrap();
        assert!(report.is_noop());
        assert_eq!(report.from_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(report.to_version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_each_intermediate_layout_matches_registry() {
        for target in 1..=CURRENT_SCHEMA_VERSION {
            let mut conn = memory();
            migrate_to(&mut conn, target).unwrap();
            assert_eq!(schema_version(&conn).unwrap(), target);
            let mismatches = layout_mismatches(&conn).unwrap();
            assert!(mismatches.is_empty(), "v{}: {:?}", target, mismatches);
        }
    }

    #[test]
    fn test_downgrade_rejected() {
        let mut conn = memory();
        migrate(&mut conn).unwrap();

        let err = migrate_to(&mut conn, 2).unwrap_err();
        assert!(matches!(
            err,
            MigrationError::Downgrade {
                found: 5,
                target: 2
            }
        ));
    }

    #[test]
    fn test_add_required_column_rejected_before_running() {
        let mut plan = migrations();
        plan.push(Migration {
            version: 6,
            description: "bad",
            steps: vec![MigrationStep::AddColumns {
                table: PATIENTS,
                columns: vec![ColumnSpec::required("mrn", ColumnType::String)],
            }],
        });

        let mut conn = memory();
        let err = run_migrations(&mut conn, &plan, 6).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidStep { version: 6, .. }));
        // Validation happens before any version is applied.
        assert_eq!(schema_version(&conn).unwrap(), 0);
    }

    #[test]
    fn test_out_of_order_plan_rejected() {
        let mut plan = migrations();
        plan.swap(1, 2);

        let mut conn = memory();
        let err = run_migrations(&mut conn, &plan, CURRENT_SCHEMA_VERSION).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidPlan(_)));
    }

    #[test]
    fn test_failed_version_rolls_back_atomically() {
        let mut plan = migrations();
        plan.push(Migration {
            version: 6,
            description: "half broken",
            steps: vec![
                MigrationStep::Raw("CREATE TABLE scratch (local_id TEXT PRIMARY KEY)"),
                MigrationStep::Raw("THIS IS NOT SQL"),
            ],
        });

        let mut conn = memory();
        let err = run_migrations(&mut conn, &plan, 6).unwrap_err();
        assert!(matches!(err, MigrationError::StepFailed { version: 6, .. }));

        // v1..v5 committed, v6 rolled back entirely.
        assert_eq!(schema_version(&conn).unwrap(), 5);
        let scratch: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'scratch'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(scratch, 0);
    }
}
