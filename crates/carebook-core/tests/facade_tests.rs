//! End-to-end tests through the host-facing `CarebookCore` object.

use std::sync::Arc;

use carebook_core::clock::ManualClock;
use carebook_core::identifier::PeriodGranularity;
use carebook_core::sync::{ConnectionType, PrimaryStatus, SyncTrigger};
use carebook_core::{
    CarebookCore, CarebookError, CoreConfig, FfiNetworkStatus, FfiNewNote, FfiNewPatient,
    FfiPatientFilter, FfiPatientPatch, FfiPushFailure, FfiPushOutcome, FfiSettings,
    FfiUserProfile,
};

// 2025-01-15T10:00:00Z
const JAN_15: i64 = 1_736_935_200_000;

fn new_patient(name: &str) -> FfiNewPatient {
    FfiNewPatient {
        name: name.to_string(),
        phone: None,
        email: None,
        address: None,
        location: None,
        initial_complaint: None,
        initial_diagnosis: None,
        photo_uri: None,
        group_label: None,
        is_favorite: false,
    }
}

fn online() -> FfiNetworkStatus {
    FfiNetworkStatus {
        is_connected: true,
        is_internet_reachable: Some(true),
        connection_type: ConnectionType::Wifi,
    }
}

fn in_memory(clock: Arc<ManualClock>) -> Arc<CarebookCore> {
    CarebookCore::open_in_memory_with_clock(CoreConfig::default(), clock).unwrap()
}

#[test]
fn test_create_patient_assigns_sequential_ids() {
    let core = in_memory(Arc::new(ManualClock::new(JAN_15)));

    assert_eq!(core.generate_patient_identifier().unwrap(), "PT202501001");
    let first = core.create_patient(new_patient("Amara")).unwrap();
    let second = core.create_patient(new_patient("Bo")).unwrap();

    assert_eq!(first.patient_id, "PT202501001");
    assert_eq!(second.patient_id, "PT202501002");
    assert!(!first.is_synced);
    assert_eq!(core.pending_change_count(), 2);
}

#[test]
fn test_blank_name_rejected() {
    let core = in_memory(Arc::new(ManualClock::new(JAN_15)));
    let err = core.create_patient(new_patient("   ")).unwrap_err();
    assert!(matches!(err, CarebookError::InvalidInput(_)));
    assert_eq!(core.pending_change_count(), 0);
}

#[test]
fn test_update_missing_patient_is_not_found() {
    let core = in_memory(Arc::new(ManualClock::new(JAN_15)));
    let err = core
        .update_patient("nope".into(), FfiPatientPatch::default())
        .unwrap_err();
    assert!(matches!(err, CarebookError::NotFound(_)));
}

#[test]
fn test_host_driven_sync_round() {
    let clock = Arc::new(ManualClock::new(JAN_15));
    let core = in_memory(clock.clone());

    let patient = core.create_patient(new_patient("Amara")).unwrap();
    core.create_note(FfiNewNote {
        patient_local_id: patient.local_id.clone(),
        content: "Follow-up in two weeks".into(),
        visit_type: Some("consultation".into()),
        author_id: None,
    })
    .unwrap();

    assert_eq!(core.sync_status().primary, PrimaryStatus::Offline);
    assert!(matches!(
        core.begin_sync(SyncTrigger::Manual),
        Err(CarebookError::SyncError(_))
    ));

    assert!(core.set_network_status(online()).unwrap());
    let batch = core.begin_sync(SyncTrigger::Automatic).unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].record_kind, "patient");
    assert_eq!(batch[1].record_kind, "clinical_note");
    assert_eq!(core.pending_changes_for_sync().unwrap().len(), 2);
    assert_eq!(core.sync_status().primary, PrimaryStatus::Syncing);

    // A write while the batch is in flight.
    core.set_patient_favorite(patient.local_id.clone(), true)
        .unwrap();

    clock.advance(1_000);
    let status = core
        .complete_sync(FfiPushOutcome {
            accepted_count: 2,
            failures: vec![],
        })
        .unwrap();

    assert_eq!(status.primary, PrimaryStatus::Pending);
    assert_eq!(status.pending_count, 1);
    assert_eq!(status.last_sync_time, Some(JAN_15 + 1_000));
    assert!(matches!(
        core.complete_sync(FfiPushOutcome {
            accepted_count: 0,
            failures: vec![],
        }),
        Err(CarebookError::SyncError(_))
    ));
}

#[test]
fn test_rejected_change_reports_error() {
    let core = in_memory(Arc::new(ManualClock::new(JAN_15)));
    core.create_patient(new_patient("Amara")).unwrap();
    core.set_network_status(online()).unwrap();

    let batch = core.begin_sync(SyncTrigger::Manual).unwrap();
    let status = core
        .complete_sync(FfiPushOutcome {
            accepted_count: 0,
            failures: vec![FfiPushFailure {
                change_id: batch[0].change_id.clone(),
                message: "validation failed".into(),
            }],
        })
        .unwrap();

    assert_eq!(status.primary, PrimaryStatus::Error);
    assert_eq!(status.pending_count, 1);
    assert!(status.last_error.is_some());
    assert!(status.message.contains("safe on this device"));
}

#[test]
fn test_cancel_then_fail_has_no_active_sync() {
    let core = in_memory(Arc::new(ManualClock::new(JAN_15)));
    core.create_patient(new_patient("Amara")).unwrap();
    core.set_network_status(online()).unwrap();
    core.begin_sync(SyncTrigger::Automatic).unwrap();

    let status = core.cancel_sync().unwrap();
    assert_eq!(status.primary, PrimaryStatus::Error);
    assert_eq!(status.last_error.as_deref(), Some("sync cancelled"));
    assert_eq!(status.pending_count, 1);
    assert!(core.fail_sync("late".into()).is_err());
    assert!(core.pending_changes_for_sync().is_err());
}

#[test]
fn test_auto_sync_setting_suppresses_signal() {
    let core = in_memory(Arc::new(ManualClock::new(JAN_15)));
    core.create_patient(new_patient("Amara")).unwrap();

    let mut settings = core.settings().unwrap();
    settings.auto_sync = false;
    core.update_settings(settings).unwrap();

    assert!(!core.set_network_status(online()).unwrap());
    assert_eq!(core.sync_status().primary, PrimaryStatus::Pending);
}

#[test]
fn test_daily_identifiers_after_settings_change() {
    let core = in_memory(Arc::new(ManualClock::new(JAN_15)));
    let settings = core.update_settings(FfiSettings {
        auto_sync: true,
        id_granularity: PeriodGranularity::Day,
        language: "en".into(),
        sync_batch_size: 10_000,
    });
    let settings = settings.unwrap();
    assert_eq!(settings.sync_batch_size, 500);

    let patient = core.create_patient(new_patient("Amara")).unwrap();
    assert_eq!(patient.patient_id, "PT20250115001");
}

#[test]
fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = CoreConfig::in_dir(dir.path());
    let clock = Arc::new(ManualClock::new(JAN_15));

    {
        let core = CarebookCore::open_with_clock(config.clone(), clock.clone()).unwrap();
        core.login(FfiUserProfile {
            user_id: "u-7".into(),
            display_name: "Dr. Mensah".into(),
            email: None,
            role: None,
        })
        .unwrap();
        let patient = core.create_patient(new_patient("Amara")).unwrap();
        core.update_patient(
            patient.local_id,
            FfiPatientPatch {
                group_label: Some("ward-3".into()),
                ..Default::default()
            },
        )
        .unwrap();
        core.create_patient(new_patient("Bo")).unwrap();
        core.set_active_filter(FfiPatientFilter::Group {
            label: "ward-3".into(),
        })
        .unwrap();

        core.set_network_status(online()).unwrap();
        core.begin_sync(SyncTrigger::Manual).unwrap();
        core.complete_sync(FfiPushOutcome {
            accepted_count: 3,
            failures: vec![],
        })
        .unwrap();
        core.shutdown().unwrap();
    }

    let core = CarebookCore::open_with_clock(config, clock).unwrap();
    let user = core.current_user().unwrap().unwrap();
    assert_eq!(user.display_name, "Dr. Mensah");

    let status = core.sync_status();
    assert_eq!(status.primary, PrimaryStatus::Offline);
    assert_eq!(status.last_sync_time, Some(JAN_15));
    assert_eq!(status.pending_count, 0);

    let visible = core.visible_patients().unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].name, "Amara");

    core.logout().unwrap();
    assert!(core.current_user().unwrap().is_none());
    assert_eq!(core.visible_patients().unwrap().len(), 2);
    assert_eq!(core.list_patients().unwrap().len(), 2);
}
