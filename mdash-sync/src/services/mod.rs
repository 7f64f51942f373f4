//! Sync engine services

pub mod cache;
pub mod chunker;
pub mod identity;
pub mod mode_migration;
pub mod normalizer;
pub mod orchestrator;
pub mod scheduler;

pub use cache::{CacheKey, CacheSettings, CacheStats, TtlCache};
pub use chunker::{plan_chunks, AggregateMetrics, ChunkResult, DateChunk, RangeFetcher};
pub use identity::{IdentityProvider, StaticIdentity};
pub use mode_migration::{MigrationResult, ModeMigrationManager, ModeValidation, SwitchOptions};
pub use normalizer::{IndividualBatch, Normalizer};
pub use orchestrator::{SyncOrchestrator, SyncSettings};
pub use scheduler::Scheduler;
