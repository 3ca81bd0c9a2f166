//! In-memory [`SessionStore`] implementation for tests and embedding.
//!
//! Uses `HashMap` behind `std::sync::RwLock`. Sessions are stored as owned
//! clones, so a caller holding a session cannot mutate the stored copy.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::limits::AdaptiveLimits;
use crate::session::ProcessingSession;

use super::{counts_as_prior_failure, SessionStore, SessionSummary};

/// In-memory session store.
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, ProcessingSession>>,
    limits: RwLock<Option<AdaptiveLimits>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            limits: RwLock::new(None),
        }
    }

    /// Number of stored sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deep copy of the current contents, for simulating a restart from
    /// the same durable state.
    pub fn snapshot(&self) -> Result<Self> {
        let sessions = self.sessions.read().map_err(|_| poisoned())?.clone();
        let limits = *self.limits.read().map_err(|_| poisoned())?;
        Ok(Self {
            sessions: RwLock::new(sessions),
            limits: RwLock::new(limits),
        })
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> anyhow::Error {
    anyhow!("in-memory session store lock poisoned")
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save_session(&self, session: &ProcessingSession) -> Result<()> {
        let mut sessions = self.sessions.write().map_err(|_| poisoned())?;
        sessions.insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn load_session(&self, session_id: &str) -> Result<Option<ProcessingSession>> {
        let sessions = self.sessions.read().map_err(|_| poisoned())?;
        Ok(sessions.get(session_id).cloned())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let sessions = self.sessions.read().map_err(|_| poisoned())?;
        let mut out: Vec<SessionSummary> = sessions.values().map(SessionSummary::from_session).collect();
        out.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        Ok(out)
    }

    async fn failure_count(&self, fingerprint: &str) -> Result<u64> {
        let sessions = self.sessions.read().map_err(|_| poisoned())?;
        Ok(sessions
            .values()
            .filter(|s| s.fingerprint() == fingerprint && counts_as_prior_failure(s))
            .count() as u64)
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut sessions = self.sessions.write().map_err(|_| poisoned())?;
        let before = sessions.len();
        sessions.retain(|_, s| !(s.state.is_terminal() && s.updated_at < cutoff));
        Ok((before - sessions.len()) as u64)
    }

    async fn save_limits(&self, limits: &AdaptiveLimits) -> Result<()> {
        *self.limits.write().map_err(|_| poisoned())? = Some(*limits);
        Ok(())
    }

    async fn load_limits(&self) -> Result<Option<AdaptiveLimits>> {
        Ok(*self.limits.read().map_err(|_| poisoned())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FailureKind, SessionFailure};
    use crate::session::SessionState;

    fn session(id: &str, text: &str) -> ProcessingSession {
        ProcessingSession::new(id.into(), "c".into(), "d".into(), text.into(), Utc::now())
    }

    fn failed(id: &str, text: &str, kind: FailureKind) -> ProcessingSession {
        let mut s = session(id, text);
        s.fail(
            SessionFailure {
                kind,
                message: "x".into(),
                chunk_index: None,
                chunk_summary: None,
                attempts: 1,
            },
            Utc::now(),
        )
        .unwrap();
        s
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let store = InMemorySessionStore::new();
        let s = session("a", "text");
        store.save_session(&s).await.unwrap();
        assert_eq!(store.load_session("a").await.unwrap(), Some(s));
        assert_eq!(store.load_session("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failure_count_ignores_cancelled() {
        let store = InMemorySessionStore::new();
        store.save_session(&failed("1", "same", FailureKind::Validation)).await.unwrap();
        store.save_session(&failed("2", "same", FailureKind::Cancelled)).await.unwrap();
        store.save_session(&failed("3", "other", FailureKind::Auth)).await.unwrap();
        store.save_session(&session("4", "same")).await.unwrap();
        let fp = crate::parser::fingerprint("same");
        assert_eq!(store.failure_count(&fp).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_terminal_before() {
        let store = InMemorySessionStore::new();
        store.save_session(&failed("old", "t", FailureKind::Auth)).await.unwrap();
        store.save_session(&session("active", "t")).await.unwrap();
        let removed = store
            .delete_terminal_before(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        let left = store.list_sessions().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].state, SessionState::Created);
    }

    #[tokio::test]
    async fn test_limits_roundtrip() {
        let store = InMemorySessionStore::new();
        assert_eq!(store.load_limits().await.unwrap(), None);
        let l = AdaptiveLimits {
            max_chunk_chars: 1234,
            ..AdaptiveLimits::default()
        };
        store.save_limits(&l).await.unwrap();
        assert_eq!(store.load_limits().await.unwrap(), Some(l));
    }

    #[tokio::test]
    async fn test_snapshot_is_independent() {
        let store = InMemorySessionStore::new();
        store.save_session(&session("a", "t")).await.unwrap();
        let copy = store.snapshot().unwrap();
        store.save_session(&session("b", "t")).await.unwrap();
        assert_eq!(copy.len(), 1);
        assert_eq!(store.len(), 2);
    }
}
