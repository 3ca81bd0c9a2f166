//! SQLite-backed [`SessionStore`] implementation.
//!
//! Each session is one row in `sessions`: the full record serialized as
//! JSON in `body_json`, plus the state, fingerprint and failure kind as
//! plain columns so listings and prior-failure counts stay in SQL. The
//! learned limits live in the single-row `adaptive_limits` table.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use course_forge_core::error::FailureKind;
use course_forge_core::limits::AdaptiveLimits;
use course_forge_core::session::{ProcessingSession, SessionState};
use course_forge_core::store::{SessionStore, SessionSummary};

/// SQLite implementation of the [`SessionStore`] trait.
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn decode_session(body: &str) -> Result<ProcessingSession> {
    serde_json::from_str(body).with_context(|| "Failed to decode stored session")
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn save_session(&self, session: &ProcessingSession) -> Result<()> {
        let body = serde_json::to_string(session)?;
        sqlx::query(
            r#"
            INSERT INTO sessions (id, course_name, state, fingerprint, failure_kind,
                                  body_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                course_name = excluded.course_name,
                state = excluded.state,
                fingerprint = excluded.fingerprint,
                failure_kind = excluded.failure_kind,
                body_json = excluded.body_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&session.session_id)
        .bind(&session.course_name)
        .bind(session.state.as_str())
        .bind(session.fingerprint())
        .bind(session.failure.as_ref().map(|f| f.kind.as_str()))
        .bind(&body)
        .bind(session.created_at.timestamp())
        .bind(session.updated_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_session(&self, session_id: &str) -> Result<Option<ProcessingSession>> {
        let row = sqlx::query("SELECT body_json FROM sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let body: String = row.get("body_json");
                Ok(Some(decode_session(&body)?))
            }
            None => Ok(None),
        }
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let rows = sqlx::query("SELECT body_json FROM sessions ORDER BY updated_at DESC, id ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let body: String = row.get("body_json");
            out.push(SessionSummary::from_session(&decode_session(&body)?));
        }
        Ok(out)
    }

    async fn failure_count(&self, fingerprint: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sessions WHERE fingerprint = ? AND state = ? AND failure_kind IS NOT NULL AND failure_kind != ?",
        )
        .bind(fingerprint)
        .bind(SessionState::Failed.as_str())
        .bind(FailureKind::Cancelled.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE state IN (?, ?) AND updated_at < ?")
            .bind(SessionState::Completed.as_str())
            .bind(SessionState::Failed.as_str())
            .bind(cutoff.timestamp())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn save_limits(&self, limits: &AdaptiveLimits) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO adaptive_limits (id, max_chunk_chars, max_items_per_chunk,
                                         success_streak, failure_streak, updated_at)
            VALUES (1, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                max_chunk_chars = excluded.max_chunk_chars,
                max_items_per_chunk = excluded.max_items_per_chunk,
                success_streak = excluded.success_streak,
                failure_streak = excluded.failure_streak,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(limits.max_chunk_chars as i64)
        .bind(limits.max_items_per_chunk as i64)
        .bind(limits.success_streak as i64)
        .bind(limits.failure_streak as i64)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_limits(&self) -> Result<Option<AdaptiveLimits>> {
        let row = sqlx::query(
            "SELECT max_chunk_chars, max_items_per_chunk, success_streak, failure_streak FROM adaptive_limits WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| AdaptiveLimits {
            max_chunk_chars: r.get::<i64, _>("max_chunk_chars") as usize,
            max_items_per_chunk: r.get::<i64, _>("max_items_per_chunk") as usize,
            success_streak: r.get::<i64, _>("success_streak") as u32,
            failure_streak: r.get::<i64, _>("failure_streak") as u32,
        }))
    }
}

impl SqliteSessionStore {
    /// Remove the learned limits so the next run starts from config.
    pub async fn reset_limits(&self) -> Result<bool> {
        let result = sqlx::query("DELETE FROM adaptive_limits WHERE id = 1")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
