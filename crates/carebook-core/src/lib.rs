//! Carebook Core Library
//!
//! Offline-first patient record store and sync coordinator for the mobile
//! app.
//!
//! # Architecture
//!
//! ```text
//!   UI action
//!       │
//!       ▼
//!  ┌──────────────────────────────┐      record_local_changes
//!  │ Record Store (SQLite)        │ ───────────────────────────┐
//!  │  patients / clinical_notes   │                            │
//!  │  pending_changes (outbox)    │                            ▼
//!  └──────────────┬───────────────┘                 ┌─────────────────────┐
//!                 │ oldest N entries                │  Sync Coordinator   │
//!                 └──────────────────────────────▶  │  idle/syncing/...   │
//!                                                   └──────────┬──────────┘
//!                                                              │ when online
//!                                                              ▼
//!                                                      Remote transport
//!                                                     (host or Rust impl)
//! ```
//!
//! # Core Principle
//!
//! **Local writes never wait for the network.** Every mutation commits locally
//! with an outbox entry; the pending count only drops when the remote
//! acknowledges a change.
//!
//! # Modules
//!
//! - [`db`]: SQLite store, schema registry and migrations
//! - [`models`]: Domain types (Patient, ClinicalNote, PendingChange)
//! - [`identifier`]: Period-scoped patient identifiers
//! - [`sync`]: Sync state machine and outbox drain
//! - [`state`]: Persisted application state
//! - [`config`]: Host-supplied configuration

pub mod clock;
pub mod config;
pub mod db;
pub mod identifier;
pub mod models;
pub mod state;
pub mod sync;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CoreConfig;
pub use db::{Database, DbError, Matcher, NoteIndex, PatientIndex};
pub use identifier::{IdGenerator, IdGeneratorConfig, PeriodGranularity};
pub use models::{
    ChangeOperation, ClinicalNote, NewClinicalNote, NewPatient, NotePatch, Patient, PatientPatch,
    PendingChange, Provenance, RecordKind,
};
pub use state::{AppSnapshot, AppStateStore, PatientFilter, Settings, UserProfile};
pub use sync::{
    NetworkStatus, PrimaryStatus, PushOutcome, SyncCoordinator, SyncDriver, SyncPhase,
    SyncStatusView, SyncTrigger,
};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::sync::{Arc, Mutex};

use db::ChangeSink;
use sync::{ConnectionType, PushFailure, SyncTicket};

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum CarebookError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Sync error: {0}")]
    SyncError(String),

    #[error("State error: {0}")]
    StateError(String),
}

impl From<db::DbError> for CarebookError {
    fn from(e: db::DbError) -> Self {
        match e {
            db::DbError::NotFound(what) => CarebookError::NotFound(what),
            db::DbError::Validation(reason) => CarebookError::InvalidInput(reason),
            other => CarebookError::DatabaseError(other.to_string()),
        }
    }
}

impl From<sync::SyncError> for CarebookError {
    fn from(e: sync::SyncError) -> Self {
        match e {
            sync::SyncError::Store(db) => db.into(),
            other => CarebookError::SyncError(other.to_string()),
        }
    }
}

impl From<state::StateError> for CarebookError {
    fn from(e: state::StateError) -> Self {
        CarebookError::StateError(e.to_string())
    }
}

impl From<serde_json::Error> for CarebookError {
    fn from(e: serde_json::Error) -> Self {
        CarebookError::SerializationError(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for CarebookError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        CarebookError::DatabaseError(format!("Lock poisoned: {}", e))
    }
}

// =========================================================================
// Main API Object
// =========================================================================

/// Persisted snapshot plus where it lives. In-memory cores have no file.
struct AppState {
    store: Option<AppStateStore>,
    snapshot: AppSnapshot,
}

impl AppState {
    fn persist(&self) -> Result<(), CarebookError> {
        if let Some(store) = &self.store {
            store.save(&self.snapshot)?;
        }
        Ok(())
    }
}

/// A drain handed to the host: the ticket and its frozen batch.
struct ActiveSync {
    ticket: SyncTicket,
    batch: Vec<PendingChange>,
}

/// Thread-safe core for FFI.
///
/// Locks are always taken in the order `active_sync`, `db`, `state`.
#[derive(uniffi::Object)]
pub struct CarebookCore {
    db: Mutex<Database>,
    coordinator: Arc<SyncCoordinator>,
    state: Mutex<AppState>,
    active_sync: Mutex<Option<ActiveSync>>,
    id_tag: String,
}

impl CarebookCore {
    /// Open file-backed storage with an explicit clock.
    pub fn open_with_clock(
        config: CoreConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>, CarebookError> {
        let db = Database::open_with_clock(&config.database_path, clock.clone())?;
        let store = AppStateStore::new(&config.snapshot_path);
        let snapshot = if store.path().exists() {
            store.load()
        } else {
            AppSnapshot {
                settings: config.initial_settings(),
                ..Default::default()
            }
        };
        Self::assemble(db, clock, Some(store), snapshot, &config)
    }

    /// In-memory store and no snapshot file.
    pub fn open_in_memory_with_clock(
        config: CoreConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>, CarebookError> {
        let db = Database::open_in_memory_with_clock(clock.clone())?;
        let snapshot = AppSnapshot {
            settings: config.initial_settings(),
            ..Default::default()
        };
        Self::assemble(db, clock, None, snapshot, &config)
    }

    /// Store first (already migrated), then the coordinator seeded from the
    /// outbox, then the restored snapshot.
    fn assemble(
        mut db: Database,
        clock: Arc<dyn Clock>,
        store: Option<AppStateStore>,
        snapshot: AppSnapshot,
        config: &CoreConfig,
    ) -> Result<Arc<Self>, CarebookError> {
        let pending = db.pending_change_count()?;
        let coordinator = Arc::new(SyncCoordinator::new(clock, pending));
        db.attach_change_sink(coordinator.clone() as Arc<dyn ChangeSink>);
        coordinator.restore_last_sync_time(snapshot.last_sync_time);

        let schema_version = db.schema_version()?;
        tracing::info!(
            pending,
            schema_version,
            logged_in = snapshot.current_user.is_some(),
            "carebook core ready"
        );

        Ok(Arc::new(Self {
            db: Mutex::new(db),
            coordinator,
            state: Mutex::new(AppState { store, snapshot }),
            active_sync: Mutex::new(None),
            id_tag: config.id_tag.clone(),
        }))
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    fn id_generator(&self) -> Result<IdGenerator, CarebookError> {
        let state = self.state.lock()?;
        Ok(IdGenerator::new(IdGeneratorConfig {
            tag: self.id_tag.clone(),
            granularity: state.snapshot.settings.id_granularity,
        }))
    }

    fn update_snapshot(&self, f: impl FnOnce(&mut AppSnapshot)) -> Result<(), CarebookError> {
        let mut state = self.state.lock()?;
        f(&mut state.snapshot);
        state.persist()
    }

    /// Persist the last sync time after a successful drain.
    fn after_sync(&self) -> Result<FfiSyncStatus, CarebookError> {
        let sync_state = self.coordinator.state();
        if sync_state.phase == SyncPhase::Success {
            self.update_snapshot(|s| s.last_sync_time = sync_state.last_sync_time)?;
        }
        Ok(self.coordinator.view().into())
    }
}

#[uniffi::export]
impl CarebookCore {
    /// Open or create the store and snapshot named by `config`.
    #[uniffi::constructor]
    pub fn open(config: FfiCoreConfig) -> Result<Arc<Self>, CarebookError> {
        Self::open_with_clock(config.into(), Arc::new(SystemClock))
    }

    /// In-memory core (for testing).
    #[uniffi::constructor]
    pub fn open_in_memory() -> Result<Arc<Self>, CarebookError> {
        Self::open_in_memory_with_clock(CoreConfig::default(), Arc::new(SystemClock))
    }

    // =========================================================================
    // Patient Operations
    // =========================================================================

    /// Next identifier for the current period, without reserving it.
    pub fn generate_patient_identifier(&self) -> Result<String, CarebookError> {
        let generator = self.id_generator()?;
        let db = self.db.lock()?;
        Ok(generator.generate(&*db, db.now_ms()))
    }

    /// Create a patient with a freshly generated identifier.
    pub fn create_patient(&self, patient: FfiNewPatient) -> Result<FfiPatient, CarebookError> {
        let generator = self.id_generator()?;
        let db = self.db.lock()?;
        let patient_id = generator.generate(&*db, db.now_ms());
        let created = db.insert_patient(patient.into(), &patient_id)?;
        Ok(created.into())
    }

    pub fn get_patient(&self, local_id: String) -> Result<Option<FfiPatient>, CarebookError> {
        let db = self.db.lock()?;
        Ok(db.get_patient(&local_id)?.map(Into::into))
    }

    pub fn get_patient_by_patient_id(
        &self,
        patient_id: String,
    ) -> Result<Option<FfiPatient>, CarebookError> {
        let db = self.db.lock()?;
        Ok(db.get_patient_by_patient_id(&patient_id)?.map(Into::into))
    }

    /// Patients whose identifier starts with `prefix`.
    pub fn find_patients_by_identifier_prefix(
        &self,
        prefix: String,
    ) -> Result<Vec<FfiPatient>, CarebookError> {
        let db = self.db.lock()?;
        let patients = db.query_patients(PatientIndex::PatientId, &Matcher::Prefix(prefix))?;
        Ok(patients.into_iter().map(Into::into).collect())
    }

    /// Patients imported under a remote system's identifier.
    pub fn find_patients_by_external_id(
        &self,
        external_system_id: String,
    ) -> Result<Vec<FfiPatient>, CarebookError> {
        let db = self.db.lock()?;
        let patients = db.query_patients(
            PatientIndex::ExternalSystemId,
            &Matcher::Equals(external_system_id),
        )?;
        Ok(patients.into_iter().map(Into::into).collect())
    }

    /// Every patient, oldest first.
    pub fn list_patients(&self) -> Result<Vec<FfiPatient>, CarebookError> {
        let db = self.db.lock()?;
        Ok(db.fetch_all_patients()?.into_iter().map(Into::into).collect())
    }

    /// Patients matching the saved filter and search text.
    pub fn visible_patients(&self) -> Result<Vec<FfiPatient>, CarebookError> {
        let patients = {
            let db = self.db.lock()?;
            db.fetch_all_patients()?
        };
        let state = self.state.lock()?;
        let snapshot = &state.snapshot;
        Ok(patients
            .into_iter()
            .filter(|p| is_visible(p, &snapshot.active_filter, &snapshot.search_text))
            .map(Into::into)
            .collect())
    }

    pub fn update_patient(
        &self,
        local_id: String,
        patch: FfiPatientPatch,
    ) -> Result<FfiPatient, CarebookError> {
        let db = self.db.lock()?;
        Ok(db.update_patient(&local_id, patch.into())?.into())
    }

    pub fn set_patient_favorite(
        &self,
        local_id: String,
        favorite: bool,
    ) -> Result<FfiPatient, CarebookError> {
        let db = self.db.lock()?;
        Ok(db.set_favorite(&local_id, favorite)?.into())
    }

    /// Record a remote system's identifier for a patient.
    pub fn link_patient_external_id(
        &self,
        local_id: String,
        source_system: String,
        external_system_id: String,
    ) -> Result<FfiPatient, CarebookError> {
        let db = self.db.lock()?;
        Ok(db
            .link_patient_external_id(&local_id, &source_system, &external_system_id)?
            .into())
    }

    /// Delete a patient and their notes. Returns the number of rows removed.
    pub fn delete_patient(&self, local_id: String) -> Result<u64, CarebookError> {
        let db = self.db.lock()?;
        Ok(db.delete_patient(&local_id)?)
    }

    // =========================================================================
    // Note Operations
    // =========================================================================

    pub fn create_note(&self, note: FfiNewNote) -> Result<FfiNote, CarebookError> {
        let db = self.db.lock()?;
        Ok(db.insert_note(note.into())?.into())
    }

    pub fn get_note(&self, local_id: String) -> Result<Option<FfiNote>, CarebookError> {
        let db = self.db.lock()?;
        Ok(db.get_note(&local_id)?.map(Into::into))
    }

    pub fn notes_for_patient(
        &self,
        patient_local_id: String,
    ) -> Result<Vec<FfiNote>, CarebookError> {
        let db = self.db.lock()?;
        Ok(db
            .notes_for_patient(&patient_local_id)?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    pub fn update_note(&self, local_id: String, patch: FfiNotePatch) -> Result<FfiNote, CarebookError> {
        let db = self.db.lock()?;
        Ok(db.update_note(&local_id, patch.into())?.into())
    }

    pub fn delete_note(&self, local_id: String) -> Result<(), CarebookError> {
        let db = self.db.lock()?;
        db.delete_note(&local_id)?;
        Ok(())
    }

    // =========================================================================
    // Sync Operations
    // =========================================================================

    /// Report connectivity. Returns `true` when the host should start an
    /// automatic sync now.
    pub fn set_network_status(&self, status: FfiNetworkStatus) -> Result<bool, CarebookError> {
        let should_sync = self.coordinator.set_network_status(status.into());
        let auto_sync = self.state.lock()?.snapshot.settings.auto_sync;
        Ok(should_sync && auto_sync)
    }

    /// Start a host-driven drain and return its frozen batch.
    pub fn begin_sync(&self, trigger: SyncTrigger) -> Result<Vec<FfiPendingChange>, CarebookError> {
        let batch_size = self.state.lock()?.snapshot.settings.sync_batch_size as usize;
        let mut active = self.active_sync.lock()?;
        let db = self.db.lock()?;

        let driver = SyncDriver::new(&self.coordinator, batch_size);
        let (ticket, batch) = driver.begin(&db, trigger)?;
        let changes = batch.iter().cloned().map(Into::into).collect();
        *active = Some(ActiveSync { ticket, batch });
        Ok(changes)
    }

    /// The batch of the drain in progress.
    pub fn pending_changes_for_sync(&self) -> Result<Vec<FfiPendingChange>, CarebookError> {
        let active = self.active_sync.lock()?;
        match active.as_ref() {
            Some(a) if self.coordinator.is_current(&a.ticket) => {
                Ok(a.batch.iter().cloned().map(Into::into).collect())
            }
            _ => Err(sync::SyncError::NoActiveSync.into()),
        }
    }

    /// The host pushed the batch; apply the remote's response.
    pub fn complete_sync(&self, outcome: FfiPushOutcome) -> Result<FfiSyncStatus, CarebookError> {
        {
            let mut active = self.active_sync.lock()?;
            let current = active.take().ok_or(sync::SyncError::NoActiveSync)?;
            let db = self.db.lock()?;
            let batch_size = current.batch.len();
            SyncDriver::new(&self.coordinator, batch_size).finish(
                &db,
                &current.ticket,
                &outcome.into(),
            );
        }
        self.after_sync()
    }

    /// The host could not push the batch.
    pub fn fail_sync(&self, message: String) -> Result<FfiSyncStatus, CarebookError> {
        let mut active = self.active_sync.lock()?;
        let current = active.take().ok_or(sync::SyncError::NoActiveSync)?;
        self.coordinator.fail_sync(&current.ticket, message);
        Ok(self.coordinator.view().into())
    }

    /// Abandon the drain in progress. A late `complete_sync` is rejected.
    pub fn cancel_sync(&self) -> Result<FfiSyncStatus, CarebookError> {
        self.active_sync.lock()?.take();
        self.coordinator.cancel_sync();
        Ok(self.coordinator.view().into())
    }

    pub fn sync_status(&self) -> FfiSyncStatus {
        self.coordinator.view().into()
    }

    pub fn pending_change_count(&self) -> u64 {
        self.coordinator.state().pending_changes
    }

    // =========================================================================
    // Session & Settings
    // =========================================================================

    pub fn login(&self, user: FfiUserProfile) -> Result<(), CarebookError> {
        tracing::info!(user_id = %user.user_id, "user logged in");
        self.update_snapshot(|s| s.current_user = Some(user.into()))
    }

    /// Clear the session. Records and pending changes stay on the device.
    pub fn logout(&self) -> Result<(), CarebookError> {
        tracing::info!("user logged out");
        self.update_snapshot(|s| {
            s.current_user = None;
            s.search_text.clear();
            s.active_filter = PatientFilter::All;
        })
    }

    pub fn current_user(&self) -> Result<Option<FfiUserProfile>, CarebookError> {
        let state = self.state.lock()?;
        Ok(state.snapshot.current_user.clone().map(Into::into))
    }

    pub fn settings(&self) -> Result<FfiSettings, CarebookError> {
        let state = self.state.lock()?;
        Ok(state.snapshot.settings.clone().into())
    }

    pub fn update_settings(&self, settings: FfiSettings) -> Result<FfiSettings, CarebookError> {
        let settings: Settings = settings.into();
        self.update_snapshot(|s| s.settings = settings.clone())?;
        Ok(settings.into())
    }

    pub fn set_search_text(&self, text: String) -> Result<(), CarebookError> {
        self.update_snapshot(|s| s.search_text = text)
    }

    pub fn set_active_filter(&self, filter: FfiPatientFilter) -> Result<(), CarebookError> {
        self.update_snapshot(|s| s.active_filter = filter.into())
    }

    pub fn ui_preferences(&self) -> Result<FfiUiPreferences, CarebookError> {
        let state = self.state.lock()?;
        Ok(FfiUiPreferences {
            search_text: state.snapshot.search_text.clone(),
            active_filter: state.snapshot.active_filter.clone().into(),
        })
    }

    /// Cancel any drain in progress and flush the snapshot.
    pub fn shutdown(&self) -> Result<(), CarebookError> {
        if self.active_sync.lock()?.take().is_some() {
            self.coordinator.cancel_sync();
        }
        let state = self.state.lock()?;
        state.persist()?;
        tracing::info!(
            pending = self.coordinator.state().pending_changes,
            "carebook core shut down"
        );
        Ok(())
    }
}

fn is_visible(patient: &Patient, filter: &PatientFilter, search_text: &str) -> bool {
    let in_filter = match filter {
        PatientFilter::All => true,
        PatientFilter::Favorites => patient.is_favorite,
        PatientFilter::Group(label) => patient.group_label.as_deref() == Some(label.as_str()),
    };
    let needle = search_text.trim().to_lowercase();
    in_filter
        && (needle.is_empty()
            || patient.name.to_lowercase().contains(&needle)
            || patient.patient_id.to_lowercase().starts_with(&needle))
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe startup configuration.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiCoreConfig {
    pub database_path: String,
    pub snapshot_path: String,
    pub id_tag: Option<String>,
    pub id_granularity: Option<PeriodGranularity>,
    pub sync_batch_size: Option<u32>,
}

impl From<FfiCoreConfig> for CoreConfig {
    fn from(config: FfiCoreConfig) -> Self {
        let defaults = CoreConfig::default();
        CoreConfig {
            database_path: config.database_path.into(),
            snapshot_path: config.snapshot_path.into(),
            id_tag: config.id_tag.unwrap_or(defaults.id_tag),
            id_granularity: config.id_granularity.unwrap_or(defaults.id_granularity),
            sync_batch_size: config.sync_batch_size.unwrap_or(defaults.sync_batch_size),
        }
    }
}

/// FFI-safe patient.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPatient {
    pub local_id: String,
    pub patient_id: String,
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
    pub created_at: i64,
    pub updated_at: i64,
    pub source_system: Option<String>,
    pub external_system_id: Option<String>,
    pub last_synced_at: Option<i64>,
    pub is_synced: bool,
}

impl From<Patient> for FfiPatient {
    fn from(patient: Patient) -> Self {
        let is_synced = patient.is_synced();
        let provenance = patient.provenance.unwrap_or_default();
        Self {
            local_id: patient.local_id,
            patient_id: patient.patient_id,
            name: patient.name,
            phone: patient.phone,
            email: patient.email,
            address: patient.address,
            location: patient.location,
            initial_complaint: patient.initial_complaint,
            initial_diagnosis: patient.initial_diagnosis,
            photo_uri: patient.photo_uri,
            group_label: patient.group_label,
            is_favorite: patient.is_favorite,
            created_at: patient.created_at,
            updated_at: patient.updated_at,
            source_system: provenance.source_system,
            external_system_id: provenance.external_system_id,
            last_synced_at: provenance.last_synced_at,
            is_synced,
        }
    }
}

/// FFI-safe new patient.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiNewPatient {
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
}

impl From<FfiNewPatient> for NewPatient {
    fn from(p: FfiNewPatient) -> Self {
        NewPatient {
            name: p.name,
            phone: p.phone,
            email: p.email,
            address: p.address,
            location: p.location,
            initial_complaint: p.initial_complaint,
            initial_diagnosis: p.initial_diagnosis,
            photo_uri: p.photo_uri,
            group_label: p.group_label,
            is_favorite: p.is_favorite,
            source_system: None,
        }
    }
}

/// FFI-safe patient patch. `None` leaves a field alone; an empty string
/// clears it.
#[derive(Debug, Clone, Default, uniffi::Record)]
pub struct FfiPatientPatch {
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

impl From<FfiPatientPatch> for PatientPatch {
    fn from(p: FfiPatientPatch) -> Self {
        PatientPatch {
            name: p.name,
            phone: p.phone,
            email: p.email,
            address: p.address,
            location: p.location,
            initial_complaint: p.initial_complaint,
            initial_diagnosis: p.initial_diagnosis,
            photo_uri: p.photo_uri,
            group_label: p.group_label,
            is_favorite: p.is_favorite,
        }
    }
}

/// FFI-safe clinical note.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiNote {
    pub local_id: String,
    pub patient_local_id: String,
    pub content: String,
    pub visit_type: Option<String>,
    pub author_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<ClinicalNote> for FfiNote {
    fn from(note: ClinicalNote) -> Self {
        Self {
            local_id: note.local_id,
            patient_local_id: note.patient_local_id,
            content: note.content,
            visit_type: note.visit_type,
            author_id: note.author_id,
            created_at: note.created_at,
            updated_at: note.updated_at,
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiNewNote {
    pub patient_local_id: String,
    pub content: String,
    pub visit_type: Option<String>,
    pub author_id: Option<String>,
}

impl From<FfiNewNote> for NewClinicalNote {
    fn from(n: FfiNewNote) -> Self {
        NewClinicalNote {
            patient_local_id: n.patient_local_id,
            content: n.content,
            visit_type: n.visit_type,
            author_id: n.author_id,
        }
    }
}

#[derive(Debug, Clone, Default, uniffi::Record)]
pub struct FfiNotePatch {
    pub content: Option<String>,
    pub visit_type: Option<String>,
    pub author_id: Option<String>,
}

impl From<FfiNotePatch> for NotePatch {
    fn from(n: FfiNotePatch) -> Self {
        NotePatch {
            content: n.content,
            visit_type: n.visit_type,
            author_id: n.author_id,
        }
    }
}

/// FFI-safe outbox entry. `change_id` is the idempotency key.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPendingChange {
    pub change_id: String,
    pub seq: i64,
    pub record_kind: String,
    pub record_key: String,
    pub operation: String,
    pub payload: String,
    pub payload_digest: String,
    pub created_at: i64,
}

impl From<PendingChange> for FfiPendingChange {
    fn from(change: PendingChange) -> Self {
        Self {
            change_id: change.change_id,
            seq: change.seq,
            record_kind: change.record_kind.as_str().to_string(),
            record_key: change.record_key,
            operation: change.operation.as_str().to_string(),
            payload: change.payload,
            payload_digest: change.payload_digest,
            created_at: change.created_at,
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPushFailure {
    pub change_id: String,
    pub message: String,
}

/// Remote response reported by the host.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPushOutcome {
    pub accepted_count: u64,
    pub failures: Vec<FfiPushFailure>,
}

impl From<FfiPushOutcome> for PushOutcome {
    fn from(outcome: FfiPushOutcome) -> Self {
        PushOutcome {
            accepted_count: outcome.accepted_count,
            failures: outcome
                .failures
                .into_iter()
                .map(|f| PushFailure {
                    change_id: f.change_id,
                    message: f.message,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiNetworkStatus {
    pub is_connected: bool,
    pub is_internet_reachable: Option<bool>,
    pub connection_type: ConnectionType,
}

impl From<FfiNetworkStatus> for NetworkStatus {
    fn from(status: FfiNetworkStatus) -> Self {
        NetworkStatus {
            is_connected: status.is_connected,
            is_internet_reachable: status.is_internet_reachable,
            connection_type: status.connection_type,
        }
    }
}

/// FFI-safe sync status.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSyncStatus {
    pub primary: PrimaryStatus,
    pub pending_count: u64,
    pub last_sync_time: Option<i64>,
    pub last_error: Option<String>,
    pub message: String,
}

impl From<SyncStatusView> for FfiSyncStatus {
    fn from(view: SyncStatusView) -> Self {
        let message = view.message();
        Self {
            primary: view.primary,
            pending_count: view.pending_count,
            last_sync_time: view.last_sync_time,
            last_error: view.last_error,
            message,
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiUserProfile {
    pub user_id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub role: Option<String>,
}

impl From<FfiUserProfile> for UserProfile {
    fn from(u: FfiUserProfile) -> Self {
        UserProfile {
            user_id: u.user_id,
            display_name: u.display_name,
            email: u.email,
            role: u.role,
        }
    }
}

impl From<UserProfile> for FfiUserProfile {
    fn from(u: UserProfile) -> Self {
        Self {
            user_id: u.user_id,
            display_name: u.display_name,
            email: u.email,
            role: u.role,
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSettings {
    pub auto_sync: bool,
    pub id_granularity: PeriodGranularity,
    pub language: String,
    pub sync_batch_size: u32,
}

impl From<FfiSettings> for Settings {
    fn from(s: FfiSettings) -> Self {
        Settings {
            auto_sync: s.auto_sync,
            id_granularity: s.id_granularity,
            language: s.language,
            sync_batch_size: state::clamp_batch_size(s.sync_batch_size as i64),
        }
    }
}

impl From<Settings> for FfiSettings {
    fn from(s: Settings) -> Self {
        Self {
            auto_sync: s.auto_sync,
            id_granularity: s.id_granularity,
            language: s.language,
            sync_batch_size: s.sync_batch_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, uniffi::Enum)]
pub enum FfiPatientFilter {
    All,
    Favorites,
    Group { label: String },
}

impl From<FfiPatientFilter> for PatientFilter {
    fn from(f: FfiPatientFilter) -> Self {
        match f {
            FfiPatientFilter::All => PatientFilter::All,
            FfiPatientFilter::Favorites => PatientFilter::Favorites,
            FfiPatientFilter::Group { label } => PatientFilter::Group(label),
        }
    }
}

impl From<PatientFilter> for FfiPatientFilter {
    fn from(f: PatientFilter) -> Self {
        match f {
            PatientFilter::All => FfiPatientFilter::All,
            PatientFilter::Favorites => FfiPatientFilter::Favorites,
            PatientFilter::Group(label) => FfiPatientFilter::Group { label },
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiUiPreferences {
    pub search_text: String,
    pub active_filter: FfiPatientFilter,
}
