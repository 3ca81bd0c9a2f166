//! Persistence abstraction for sessions and adaptive limits.
//!
//! The [`SessionStore`] trait is everything the engine needs to make a
//! session durable: the full session record keyed by `session_id`, plus the
//! single process-wide [`AdaptiveLimits`] record. Backends (SQLite in the
//! application, [`memory::InMemorySessionStore`] for tests) plug in behind it.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::FailureKind;
use crate::limits::AdaptiveLimits;
use crate::models::ProcessingStrategy;
use crate::session::{ProcessingSession, SessionState};

/// One row of a session listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub course_name: String,
    pub state: SessionState,
    pub strategy: ProcessingStrategy,
    pub current_chunk_index: usize,
    pub total_chunks: usize,
    pub course_id: Option<String>,
    pub failure_kind: Option<FailureKind>,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionSummary {
    pub fn from_session(session: &ProcessingSession) -> Self {
        Self {
            session_id: session.session_id.clone(),
            course_name: session.course_name.clone(),
            state: session.state,
            strategy: session.strategy,
            current_chunk_index: session.current_chunk_index,
            total_chunks: session.chunks.len(),
            course_id: session.course_structure.course_id.clone(),
            failure_kind: session.failure.as_ref().map(|f| f.kind),
            fingerprint: session.fingerprint().to_string(),
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

/// Abstract storage backend for sessions.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`save_session`](SessionStore::save_session) | Insert or replace the full session record |
/// | [`load_session`](SessionStore::load_session) | Fetch a session by id |
/// | [`list_sessions`](SessionStore::list_sessions) | Summaries, newest first |
/// | [`failure_count`](SessionStore::failure_count) | Failed (not cancelled) sessions for a transcript |
/// | [`delete_terminal_before`](SessionStore::delete_terminal_before) | Retention purge |
/// | [`save_limits`](SessionStore::save_limits) | Persist the adaptive limits record |
/// | [`load_limits`](SessionStore::load_limits) | Read the adaptive limits record |
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save_session(&self, session: &ProcessingSession) -> Result<()>;

    async fn load_session(&self, session_id: &str) -> Result<Option<ProcessingSession>>;

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>>;

    /// Number of sessions for `fingerprint` that ended in `Failed` for any
    /// reason other than cancellation.
    async fn failure_count(&self, fingerprint: &str) -> Result<u64>;

    /// Delete terminal sessions last updated before `cutoff`. Returns the
    /// number removed.
    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn save_limits(&self, limits: &AdaptiveLimits) -> Result<()>;

    async fn load_limits(&self) -> Result<Option<AdaptiveLimits>>;
}

/// Shared predicate for [`SessionStore::failure_count`].
pub fn counts_as_prior_failure(session: &ProcessingSession) -> bool {
    session.state == SessionState::Failed
        && session
            .failure
            .as_ref()
            .is_some_and(|f| f.kind != FailureKind::Cancelled)
}
