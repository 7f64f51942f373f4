//! Sync run state and results

use crate::models::source::SourceKind;
use chrono::{DateTime, NaiveDate, Utc};
use mdash_common::events::SyncStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Orchestration phase of one source within a sync
///
/// `Idle -> Fetching -> Normalizing -> Upserting -> {Success | Error}`;
/// any non-terminal phase may go straight to `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Fetching,
    Normalizing,
    Upserting,
    Success,
    Error,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Fetching => "fetching",
            SyncPhase::Normalizing => "normalizing",
            SyncPhase::Upserting => "upserting",
            SyncPhase::Success => "success",
            SyncPhase::Error => "error",
        }
    }

    pub fn status(&self) -> SyncStatus {
        match self {
            SyncPhase::Idle => SyncStatus::Pending,
            SyncPhase::Fetching | SyncPhase::Normalizing | SyncPhase::Upserting => {
                SyncStatus::InProgress
            }
            SyncPhase::Success => SyncStatus::Success,
            SyncPhase::Error => SyncStatus::Error,
        }
    }

    pub fn can_transition_to(&self, next: SyncPhase) -> bool {
        use SyncPhase::*;
        matches!(
            (*self, next),
            (Idle, Fetching)
                | (Fetching, Normalizing)
                | (Normalizing, Upserting)
                | (Upserting, Success)
                | (Idle | Fetching | Normalizing | Upserting, Error)
        )
    }
}

/// Why a sync ran (recorded for history)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Manual,
    Scheduled,
}

impl SyncTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTrigger::Manual => "manual",
            SyncTrigger::Scheduled => "scheduled",
        }
    }
}

/// Result of one source within a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub source: SourceKind,
    pub status: SyncStatus,
    pub records_fetched: usize,
    pub rows_written: usize,
    pub chunks: usize,
    /// Rows rejected by normalization (reported, never silently dropped)
    #[serde(default)]
    pub invalid_rows: Vec<usize>,
    pub error_kind: Option<String>,
    /// Redacted, single-line
    pub message: Option<String>,
}

/// Result of a whole sync run across a project's sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub project_id: Uuid,
    pub trigger: SyncTrigger,
    pub range_start: NaiveDate,
    pub range_end: NaiveDate,
    pub status: SyncStatus,
    pub outcomes: Vec<SourceOutcome>,
    pub rows_written: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncReport {
    pub fn failed_sources(&self) -> Vec<SourceKind> {
        self.outcomes
            .iter()
            .filter(|o| o.status == SyncStatus::Error)
            .map(|o| o.source)
            .collect()
    }

    pub fn outcome(&self, source: SourceKind) -> Option<&SourceOutcome> {
        self.outcomes.iter().find(|o| o.source == source)
    }

    /// Run status derived from per-source outcomes
    pub fn overall_status(outcomes: &[SourceOutcome]) -> SyncStatus {
        let failed = outcomes
            .iter()
            .filter(|o| o.status == SyncStatus::Error)
            .count();
        match failed {
            0 => SyncStatus::Success,
            n if n == outcomes.len() => SyncStatus::Error,
            _ => SyncStatus::PartialSuccess,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(source: SourceKind, status: SyncStatus) -> SourceOutcome {
        SourceOutcome {
            source,
            status,
            records_fetched: 0,
            rows_written: 0,
            chunks: 0,
            invalid_rows: vec![],
            error_kind: None,
            message: None,
        }
    }

    #[test]
    fn test_phase_transitions() {
        assert!(SyncPhase::Idle.can_transition_to(SyncPhase::Fetching));
        assert!(SyncPhase::Fetching.can_transition_to(SyncPhase::Error));
        assert!(!SyncPhase::Fetching.can_transition_to(SyncPhase::Upserting));
        assert!(!SyncPhase::Success.can_transition_to(SyncPhase::Error));
        assert_eq!(SyncPhase::Normalizing.status(), SyncStatus::InProgress);
    }

    #[test]
    fn test_overall_status() {
        let ok = outcome(SourceKind::Sheet, SyncStatus::Success);
        let bad = outcome(SourceKind::Ads, SyncStatus::Error);
        assert_eq!(SyncReport::overall_status(&[ok.clone()]), SyncStatus::Success);
        assert_eq!(
            SyncReport::overall_status(&[ok, bad.clone()]),
            SyncStatus::PartialSuccess
        );
        assert_eq!(SyncReport::overall_status(&[bad]), SyncStatus::Error);
    }
}
