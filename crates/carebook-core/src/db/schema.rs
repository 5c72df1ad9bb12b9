//! Schema registry.
//!
//! Declares the table/column layout of the store at every supported schema
//! version. The column lists below are shared with the migration steps in
//! [`super::migrations`], but a new version still needs its own migration
//! entry: the registry alone never changes an existing store.

/// Current schema version. Stamped into `PRAGMA user_version`.
pub const CURRENT_SCHEMA_VERSION: u32 = 5;

pub const PATIENTS: &str = "patients";
/// Name of the notes table before v3.
pub const LEGACY_NOTES: &str = "patient_notes";
pub const CLINICAL_NOTES: &str = "clinical_notes";
pub const PENDING_CHANGES: &str = "pending_changes";

/// Logical column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Number,
    Boolean,
}

impl ColumnType {
    /// SQLite storage type. Booleans are stored as 0/1, timestamps as epoch ms.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::String => "TEXT",
            ColumnType::Number | ColumnType::Boolean => "INTEGER",
        }
    }
}

/// A single column declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub kind: ColumnType,
    pub optional: bool,
    pub indexed: bool,
    /// Backed by a unique index. Implies `indexed`.
    pub unique: bool,
    pub primary_key: bool,
    /// Table whose `local_id` this column references.
    pub references: Option<&'static str>,
}

impl ColumnSpec {
    pub const fn required(name: &'static str, kind: ColumnType) -> Self {
        Self {
            name,
            kind,
            optional: false,
            indexed: false,
            unique: false,
            primary_key: false,
            references: None,
        }
    }

    pub const fn optional(name: &'static str, kind: ColumnType) -> Self {
        Self {
            optional: true,
            ..Self::required(name, kind)
        }
    }

    pub const fn key(name: &'static str) -> Self {
        Self {
            primary_key: true,
            ..Self::required(name, ColumnType::String)
        }
    }

    pub const fn indexed(self) -> Self {
        Self {
            indexed: true,
            ..self
        }
    }

    pub const fn unique(self) -> Self {
        Self {
            indexed: true,
            unique: true,
            ..self
        }
    }

    pub const fn references(self, table: &'static str) -> Self {
        Self {
            references: Some(table),
            ..self
        }
    }

    /// Column definition as used in `CREATE TABLE` / `ADD COLUMN`.
    pub fn column_sql(&self) -> String {
        let mut sql = format!("{} {}", self.name, self.kind.sql_type());
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
        }
        if !self.optional {
            sql.push_str(" NOT NULL");
        }
        if let Some(table) = self.references {
            sql.push_str(&format!(" REFERENCES {}(local_id)", table));
        }
        sql
    }
}

/// A table declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: &'static str,
    pub columns: Vec<ColumnSpec>,
}

impl TableSchema {
    pub fn new(name: &'static str, columns: &[ColumnSpec]) -> Self {
        Self {
            name,
            columns: columns.to_vec(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn indexed_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter().filter(|c| c.indexed)
    }

    pub fn create_sql(&self) -> String {
        let columns: Vec<String> = self.columns.iter().map(|c| c.column_sql()).collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            self.name,
            columns.join(",\n    ")
        )
    }

    fn extend(&mut self, columns: &[ColumnSpec]) {
        self.columns.extend_from_slice(columns);
    }

    fn make_unique(&mut self, name: &str) {
        if let Some(column) = self.columns.iter_mut().find(|c| c.name == name) {
            *column = column.unique();
        }
    }
}

/// Name of the index backing an indexed column.
pub fn index_name(table: &str, column: &str) -> String {
    format!("idx_{}_{}", table, column)
}

/// `CREATE [UNIQUE] INDEX` statement for an indexed column.
pub fn index_sql(table: &str, column: &ColumnSpec) -> String {
    format!(
        "CREATE {}INDEX IF NOT EXISTS {} ON {}({})",
        if column.unique { "UNIQUE " } else { "" },
        index_name(table, column.name),
        table,
        column.name
    )
}

use ColumnType::{Boolean, Number, String as Text};

pub const PATIENT_COLUMNS_V1: &[ColumnSpec] = &[
    ColumnSpec::key("local_id"),
    ColumnSpec::required("patient_id", Text).indexed(),
    ColumnSpec::required("name", Text),
    ColumnSpec::optional("phone", Text),
    ColumnSpec::optional("email", Text),
    ColumnSpec::optional("address", Text),
    ColumnSpec::optional("location", Text),
    ColumnSpec::optional("initial_complaint", Text),
    ColumnSpec::optional("initial_diagnosis", Text),
    ColumnSpec::required("created_at", Number),
    ColumnSpec::required("updated_at", Number),
];

pub const PATIENT_COLUMNS_V2: &[ColumnSpec] = &[
    ColumnSpec::optional("photo_uri", Text),
    ColumnSpec::optional("group_label", Text),
    ColumnSpec::optional("is_favorite", Boolean),
];

pub const PATIENT_COLUMNS_V4: &[ColumnSpec] = &[
    ColumnSpec::optional("source_system", Text),
    ColumnSpec::optional("external_system_id", Text).indexed(),
    ColumnSpec::optional("last_synced_at", Number),
    ColumnSpec::optional("sync_version", Number),
    ColumnSpec::optional("local_modified_at", Number),
];

pub const NOTE_COLUMNS_V1: &[ColumnSpec] = &[
    ColumnSpec::key("local_id"),
    ColumnSpec::required("patient_local_id", Text)
        .indexed()
        .references(PATIENTS),
    ColumnSpec::required("content", Text),
    ColumnSpec::required("created_at", Number),
    ColumnSpec::required("updated_at", Number),
];

pub const NOTE_COLUMNS_V2: &[ColumnSpec] = &[
    ColumnSpec::optional("visit_type", Text),
    ColumnSpec::optional("author_id", Text),
];

pub const PENDING_CHANGE_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::key("change_id"),
    ColumnSpec::required("seq", Number).indexed(),
    ColumnSpec::required("record_kind", Text),
    ColumnSpec::required("record_key", Text).indexed(),
    ColumnSpec::required("operation", Text),
    ColumnSpec::required("payload", Text),
    ColumnSpec::required("payload_digest", Text),
    ColumnSpec::required("created_at", Number),
];

/// Full table layout at `version`, or `None` for unsupported versions.
pub fn tables_at(version: u32) -> Option<Vec<TableSchema>> {
    if version == 0 || version > CURRENT_SCHEMA_VERSION {
        return None;
    }

    let mut patients = TableSchema::new(PATIENTS, PATIENT_COLUMNS_V1);
    let mut notes = TableSchema::new(LEGACY_NOTES, NOTE_COLUMNS_V1);

    if version >= 2 {
        patients.extend(PATIENT_COLUMNS_V2);
        notes.extend(NOTE_COLUMNS_V2);
    }
    if version >= 3 {
        notes.name = CLINICAL_NOTES;
    }
    if version >= 4 {
        patients.extend(PATIENT_COLUMNS_V4);
    }
    if version >= 5 {
        patients.make_unique("patient_id");
    }

    let mut tables = vec![patients, notes];
    if version >= 4 {
        tables.push(TableSchema::new(PENDING_CHANGES, PENDING_CHANGE_COLUMNS));
    }
    Some(tables)
}

/// Table layout at [`CURRENT_SCHEMA_VERSION`].
pub fn current_tables() -> Vec<TableSchema> {
    tables_at(CURRENT_SCHEMA_VERSION).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_versions_outside_range() {
        assert!(tables_at(0).is_none());
        assert!(tables_at(CURRENT_SCHEMA_VERSION + 1).is_none());
    }

    #[test]
    fn test_notes_table_renamed_in_v3() {
        let v2 = tables_at(2).unwrap();
        assert!(v2.iter().any(|t| t.name == LEGACY_NOTES));
        assert!(!v2.iter().any(|t| t.name == CLINICAL_NOTES));

        let v3 = tables_at(3).unwrap();
        assert!(v3.iter().any(|t| t.name == CLINICAL_NOTES));
        assert!(!v3.iter().any(|t| t.name == LEGACY_NOTES));
    }

    #[test]
    fn test_current_layout() {
        let tables = current_tables();
        let names: Vec<_> = tables.iter().map(|t| t.name).collect();
        assert_eq!(names, vec![PATIENTS, CLINICAL_NOTES, PENDING_CHANGES]);

        let patients = &tables[0];
        assert!(patients.column("patient_id").unwrap().unique);
        assert!(patients.column("is_favorite").unwrap().optional);
        assert_eq!(
            patients.column("sync_version").unwrap().kind,
            ColumnType::Number
        );

        let notes = &tables[1];
        let fk = notes.column("patient_local_id").unwrap();
        assert!(fk.indexed);
        assert!(!fk.optional);
        assert_eq!(fk.references, Some(PATIENTS));
    }

    #[test]
    fn test_column_sql() {
        assert_eq!(
            ColumnSpec::key("local_id").column_sql(),
            "local_id TEXT PRIMARY KEY NOT NULL"
        );
        assert_eq!(
            ColumnSpec::optional("phone", ColumnType::String).column_sql(),
            "phone TEXT"
        );
        assert_eq!(
            NOTE_COLUMNS_V1[1].column_sql(),
            "patient_local_id TEXT NOT NULL REFERENCES patients(local_id)"
        );
    }

    #[test]
    fn test_patient_id_unique_from_v5() {
        let v4 = tables_at(4).unwrap();
        let column = v4[0].column("patient_id").unwrap();
        assert!(column.indexed && !column.unique);

        let v5 = tables_at(5).unwrap();
        assert!(v5[0].column("patient_id").unwrap().unique);
        assert_eq!(
            index_sql(PATIENTS, v5[0].column("patient_id").unwrap()),
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_patients_patient_id ON patients(patient_id)"
        );
    }

    #[test]
    fn test_create_sql_is_valid() {
        let conn = Connection::open_in_memory().unwrap();
        for table in current_tables() {
            conn.execute_batch(&table.create_sql()).unwrap();
            for column in table.indexed_columns() {
                conn.execute_batch(&index_sql(table.name, column)).unwrap();
            }
        }
    }
}
