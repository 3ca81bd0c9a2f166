use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the schema on an open pool. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Full session record as JSON, with the columns listings filter on
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            course_name TEXT NOT NULL,
            state TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            failure_kind TEXT,
            body_json TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Single-row table for the learned limits
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS adaptive_limits (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            max_chunk_chars INTEGER NOT NULL,
            max_items_per_chunk INTEGER NOT NULL,
            success_streak INTEGER NOT NULL,
            failure_streak INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_fingerprint ON sessions(fingerprint, state)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_updated_at ON sessions(updated_at DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
