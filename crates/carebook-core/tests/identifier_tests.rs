//! Identifier generation against a real store.

use carebook_core::db::Database;
use carebook_core::identifier::{IdGenerator, IdGeneratorConfig, PeriodGranularity};
use carebook_core::models::NewPatient;

// 2025-01-31T23:59:59.500Z and one second later.
const END_OF_JAN: i64 = 1_738_367_999_500;
const START_OF_FEB: i64 = END_OF_JAN + 1_000;

#[test]
fn test_sequence_restarts_each_month() {
    let db = Database::open_in_memory().unwrap();
    let generator = IdGenerator::default();

    for _ in 0..3 {
        let id = generator.generate(&db, END_OF_JAN);
        db.insert_patient(NewPatient::new("Jan"), &id).unwrap();
    }
    let feb = generator.generate(&db, START_OF_FEB);
    assert_eq!(feb, "PT202502001");
    db.insert_patient(NewPatient::new("Feb"), &feb).unwrap();

    assert_eq!(generator.generate(&db, END_OF_JAN), "PT202501004");
}

#[test]
fn test_duplicate_identifier_rejected_by_store() {
    let db = Database::open_in_memory().unwrap();
    db.insert_patient(NewPatient::new("A"), "PT202501001").unwrap();
    assert!(db.insert_patient(NewPatient::new("B"), "PT202501001").is_err());
}

#[test]
fn test_tags_do_not_share_sequences() {
    let db = Database::open_in_memory().unwrap();
    db.insert_patient(NewPatient::new("A"), "PT202501007").unwrap();

    let clinic = IdGenerator::new(IdGeneratorConfig {
        tag: "CL".into(),
        granularity: PeriodGranularity::Month,
    });
    assert_eq!(clinic.generate(&db, END_OF_JAN), "CL202501001");
    assert_eq!(IdGenerator::default().generate(&db, END_OF_JAN), "PT202501008");
}

#[test]
fn test_like_wildcards_in_tag_are_literal() {
    let db = Database::open_in_memory().unwrap();
    db.insert_patient(NewPatient::new("A"), "PT202501009").unwrap();

    let odd = IdGenerator::new(IdGeneratorConfig {
        tag: "P_".into(),
        granularity: PeriodGranularity::Month,
    });
    assert_eq!(odd.generate(&db, END_OF_JAN), "P_202501001");
}

#[test]
fn test_switching_granularity_keeps_families_apart() {
    let db = Database::open_in_memory().unwrap();
    let monthly = IdGenerator::default();
    let daily = IdGenerator::new(IdGeneratorConfig {
        tag: "PT".into(),
        granularity: PeriodGranularity::Day,
    });

    let mut issued = Vec::new();
    for generator in [&daily, &monthly, &daily, &monthly] {
        let id = generator.generate(&db, END_OF_JAN);
        db.insert_patient(NewPatient::new("Switch"), &id).unwrap();
        issued.push(id);
    }

    assert_eq!(
        issued,
        vec![
            "PT20250131001",
            "PT202501001",
            "PT20250131002",
            "PT202501002",
        ]
    );
}
