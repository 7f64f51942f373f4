//! Data models for mdash-sync

pub mod backup;
pub mod metrics;
pub mod records;
pub mod run;
pub mod source;

pub use backup::{BackupPayload, BackupSnapshot};
pub use metrics::{builtin_rule, AggregationRule, MetricSet, RuleTable};
pub use records::{DailyMetricRecord, IndividualRecord, RawRecord, StorageMode};
pub use run::{SourceOutcome, SyncPhase, SyncReport, SyncTrigger};
pub use source::{
    AdsSourceConfig, CrmSourceConfig, FieldCondition, FieldMap, FieldMapping, SheetSourceConfig,
    SourceBase, SourceConfig, SourceKind, SyncCadence, SyncConfig,
};
