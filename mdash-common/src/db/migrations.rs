//! Database schema migrations
//!
//! Versioned migrations upgrade databases created by older builds without
//! data loss. `init::create_schema` always creates the current layout, so on a
//! fresh database every migration finds its change already present and only
//! records the version.
//!
//! # Migration Guidelines
//!
//! 1. **Never modify existing migrations** - users upgrade from any older version
//! 2. **Always add new migrations** - one function per schema change
//! 3. **Idempotent** - check `pragma_table_info` before altering
//! 4. **Use ALTER TABLE** - prefer it over DROP/CREATE to preserve rows

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version
///
/// **IMPORTANT:** Increment this when adding new migrations
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Get current schema version from database
///
/// Returns 0 if schema_version table doesn't exist or has no rows
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("✓ Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("✓ Migration v2 completed");
    }

    info!("All migrations completed successfully");
    Ok(())
}

/// Migration v1: source-specific `extra` JSON on daily_metrics
///
/// Early databases stored only numeric metrics per day.
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v1: Add extra column to daily_metrics");
    add_column_if_missing(
        pool,
        "daily_metrics",
        "extra",
        "ALTER TABLE daily_metrics ADD COLUMN extra TEXT NOT NULL DEFAULT '{}'",
    )
    .await
}

/// Migration v2: record_type and source on individual_records
///
/// Needed to merge record types during individual → aggregate conversion and
/// to keep per-source aggregate keys.
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v2: Add record_type/source columns to individual_records");
    add_column_if_missing(
        pool,
        "individual_records",
        "record_type",
        "ALTER TABLE individual_records ADD COLUMN record_type TEXT NOT NULL DEFAULT 'record'",
    )
    .await?;
    add_column_if_missing(
        pool,
        "individual_records",
        "source",
        "ALTER TABLE individual_records ADD COLUMN source TEXT NOT NULL DEFAULT 'sheet'",
    )
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_individual_records_type ON individual_records(project_id, record_type)",
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Apply `ddl` unless `table.column` already exists
///
/// A missing table is skipped; `init::create_schema` creates it with the
/// current layout.
async fn add_column_if_missing(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    ddl: &str,
) -> Result<()> {
    let table_exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name = ?)",
    )
    .bind(table)
    .fetch_one(pool)
    .await?;

    if !table_exists {
        info!("  {} table doesn't exist yet - skipping", table);
        return Ok(());
    }

    let has_column: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?")
            .bind(table)
            .bind(column)
            .fetch_one(pool)
            .await?;

    if has_column > 0 {
        info!("  {}.{} already exists - skipping", table, column);
        return Ok(());
    }

    // Concurrent initialization may add the column first
    match sqlx::query(ddl).execute(pool).await {
        Ok(_) => {
            info!("  ✓ Added {} column to {} table", column, table);
            Ok(())
        }
        Err(sqlx::Error::Database(db_err)) if db_err.message().contains("duplicate column") => {
            info!("  {}.{} added concurrently - skipping", table, column);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
