//! Period-scoped patient identifiers.
//!
//! Identifiers look like `PT202501006`: a fixed tag, the calendar period and a
//! zero-padded sequence that restarts every period. They are assigned on the
//! device without asking the backend, so two devices working offline in the
//! same period can hand out the same identifier.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{Database, DbResult, Matcher, PatientIndex};

/// Width of the zero-padded sequence.
const SEQUENCE_WIDTH: usize = 3;

/// How long a sequence runs before restarting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, uniffi::Enum)]
#[serde(rename_all = "snake_case")]
pub enum PeriodGranularity {
    #[default]
    Month,
    Day,
}

impl PeriodGranularity {
    fn format(&self) -> &'static str {
        match self {
            PeriodGranularity::Month => "%Y%m",
            PeriodGranularity::Day => "%Y%m%d",
        }
    }
}

/// Identifier generator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdGeneratorConfig {
    pub tag: String,
    pub granularity: PeriodGranularity,
}

impl Default for IdGeneratorConfig {
    fn default() -> Self {
        Self {
            tag: "PT".to_string(),
            granularity: PeriodGranularity::Month,
        }
    }
}

/// Lookup of identifiers already handed out.
pub trait IdentifierSource {
    fn identifiers_with_prefix(&self, prefix: &str) -> DbResult<Vec<String>>;
}

impl IdentifierSource for Database {
    fn identifiers_with_prefix(&self, prefix: &str) -> DbResult<Vec<String>> {
        let patients =
            self.query_patients(PatientIndex::PatientId, &Matcher::Prefix(prefix.to_string()))?;
        Ok(patients.into_iter().map(|p| p.patient_id).collect())
    }
}

/// Generates patient identifiers.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    config: IdGeneratorConfig,
}

impl IdGenerator {
    pub fn new(config: IdGeneratorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IdGeneratorConfig {
        &self.config
    }

    /// Calendar period (UTC) containing `now_ms`, e.g. `202501`.
    pub fn period_for(&self, now_ms: i64) -> String {
        let now = DateTime::<Utc>::from_timestamp_millis(now_ms).unwrap_or_default();
        now.format(self.config.granularity.format()).to_string()
    }

    /// Tag plus period, e.g. `PT202501`.
    pub fn prefix_for_period(&self, period: &str) -> String {
        format!("{}{}", self.config.tag, period)
    }

    /// Next identifier for the period containing `now_ms`.
    pub fn generate<S: IdentifierSource + ?Sized>(&self, source: &S, now_ms: i64) -> String {
        let period = self.period_for(now_ms);
        self.generate_for_period(source, &period, now_ms)
    }

    /// Next identifier for an explicit period.
    ///
    /// Never fails: if the lookup errors, the sequence falls back to the
    /// low-order digits of `now_ms`. That fallback can collide with a
    /// properly sequenced identifier from the same period.
    pub fn generate_for_period<S: IdentifierSource + ?Sized>(
        &self,
        source: &S,
        period: &str,
        now_ms: i64,
    ) -> String {
        let prefix = self.prefix_for_period(period);
        let sequence = match source.identifiers_with_prefix(&prefix) {
            Ok(existing) => self.next_sequence(period, &existing),
            Err(e) => {
                let fallback = fallback_sequence(now_ms);
                tracing::warn!(
                    prefix = %prefix,
                    fallback,
                    error = %e,
                    "identifier lookup failed, using timestamp-derived sequence"
                );
                fallback
            }
        };
        format!("{}{:0width$}", prefix, sequence, width = SEQUENCE_WIDTH)
    }

    /// One past the highest sequence among `existing` for `period`.
    ///
    /// Only suffixes this generator could have produced count: all digits,
    /// at least [`SEQUENCE_WIDTH`] long and non-zero. Under month granularity
    /// a suffix that starts with a day of that month belongs to the daily
    /// family (`PT20250115001` is not sequence 15001 of `PT202501`).
    pub fn next_sequence(&self, period: &str, existing: &[String]) -> u64 {
        let prefix = self.prefix_for_period(period);
        existing
            .iter()
            .filter_map(|id| id.strip_prefix(prefix.as_str()))
            .filter(|suffix| self.is_sequence_suffix(period, suffix))
            .filter_map(|suffix| suffix.parse::<u64>().ok())
            .filter(|n| *n > 0)
            .max()
            .unwrap_or(0)
            + 1
    }

    fn is_sequence_suffix(&self, period: &str, suffix: &str) -> bool {
        if suffix.len() < SEQUENCE_WIDTH || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        match self.config.granularity {
            PeriodGranularity::Day => true,
            PeriodGranularity::Month => {
                suffix.len() < 2 + SEQUENCE_WIDTH
                    || NaiveDate::parse_from_str(&format!("{}{}", period, &suffix[..2]), "%Y%m%d")
                        .is_err()
            }
        }
    }
}

fn fallback_sequence(now_ms: i64) -> u64 {
    match now_ms.rem_euclid(1000) as u64 {
        0 => 1,
        n => n,
    }
}
