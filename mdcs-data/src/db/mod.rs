//! Database access for mdcs-data

pub mod observers;
pub mod points;

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
///
/// Connects to mdcs.db in the root folder, creating it if needed.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Use proper SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create the mdcs-data tables if they don't exist yet.
///
/// Also used by tests against an in-memory database.
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    // Registered observer definitions, one row per (id, version)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS observers (
            observer_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            owner TEXT NOT NULL,
            definition TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (observer_id, version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // The flat form: one row per prompt response
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS survey_responses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL,
            observer_id TEXT NOT NULL,
            survey_id TEXT NOT NULL,
            survey_version INTEGER NOT NULL,
            point_id TEXT,
            epoch_millis INTEGER NOT NULL,
            timezone TEXT NOT NULL,
            client TEXT,
            repeatable_set_id TEXT,
            repeatable_set_iteration INTEGER,
            prompt_id TEXT NOT NULL,
            prompt_type TEXT NOT NULL,
            display_label TEXT NOT NULL,
            unit TEXT,
            response TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Lookup used by the duplicate filter
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_survey_responses_point_id
        ON survey_responses (username, observer_id, survey_id, survey_version, point_id)
        "#,
    )
    .execute(pool)
    .await?;

    // Rejected upload points, kept for diagnostics
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS invalid_points (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL,
            observer_id TEXT NOT NULL,
            observer_version INTEGER NOT NULL,
            point_index INTEGER NOT NULL,
            data TEXT NOT NULL,
            reason TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (observers, survey_responses, invalid_points)");

    Ok(())
}
