//! Session manager: the public entry point for building courses.
//!
//! Wraps a [`SessionEngine`] with the concurrency rules sessions need:
//!
//! - every operation on a session holds that session's async lock, so two
//!   advances of the same session never interleave;
//! - different sessions never share a lock and proceed independently;
//! - [`SessionManager::cancel`] raises the session's [`CancelToken`] *before*
//!   taking the lock, so a running drive stops at its next handler boundary.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Duration;
use futures::lock::Mutex as AsyncMutex;
use tracing::info;
use uuid::Uuid;

use crate::engine::{CancelToken, SessionEngine};
use crate::error::SessionError;
use crate::limits::AdaptiveLimits;
use crate::session::{ProcessingSession, SessionState};
use crate::store::SessionSummary;

/// A new course-build request.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub course_name: String,
    pub description: String,
    pub transcript: String,
}

/// Owns per-session locks and cancellation tokens around a shared engine.
pub struct SessionManager {
    engine: SessionEngine,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    cancels: Mutex<HashMap<String, CancelToken>>,
}

impl SessionManager {
    pub fn new(engine: SessionEngine) -> Self {
        Self {
            engine,
            locks: Mutex::new(HashMap::new()),
            cancels: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &SessionEngine {
        &self.engine
    }

    /// Load the persisted adaptive limits into the shared handle, if any.
    pub async fn restore_limits(&self) -> Result<AdaptiveLimits, SessionError> {
        let limits = self.engine.limits();
        match self.engine.store().load_limits().await? {
            Some(saved) => Ok(limits.replace(saved)),
            None => Ok(limits.snapshot()),
        }
    }

    /// Persist a new session in `Created` without driving it.
    pub async fn create(&self, request: BuildRequest) -> Result<ProcessingSession, SessionError> {
        let session = ProcessingSession::new(
            Uuid::new_v4().to_string(),
            request.course_name,
            request.description,
            request.transcript,
            self.engine.clock().now(),
        );
        self.engine.store().save_session(&session).await?;
        info!(session_id = %session.session_id, course = %session.course_name, "session created");
        Ok(session)
    }

    /// Create a session and drive it until it pauses or terminates.
    pub async fn start(&self, request: BuildRequest) -> Result<ProcessingSession, SessionError> {
        let session = self.create(request).await?;
        self.resume(&session.session_id).await
    }

    /// Re-enter the session's current handler and drive from there.
    ///
    /// A session waiting for continuation stays paused; use
    /// [`continue_session`](Self::continue_session) to advance it.
    pub async fn resume(&self, session_id: &str) -> Result<ProcessingSession, SessionError> {
        self.with_session(session_id, |engine, session, cancel| {
            Box::pin(async move { engine.drive(session, cancel).await })
        })
        .await
    }

    /// Advance a session paused in `WaitingForContinuation`.
    pub async fn continue_session(&self, session_id: &str) -> Result<ProcessingSession, SessionError> {
        self.with_session(session_id, |engine, session, cancel| {
            Box::pin(async move {
                engine.continue_from_wait(session).await?;
                engine.drive(session, cancel).await
            })
        })
        .await
    }

    /// Run exactly one handler.
    pub async fn step(&self, session_id: &str) -> Result<ProcessingSession, SessionError> {
        self.with_session(session_id, |engine, session, cancel| {
            Box::pin(async move { engine.step(session, cancel).await.map(|_| ()) })
        })
        .await
    }

    /// Cancel a session. Terminal sessions are returned unchanged.
    pub async fn cancel(&self, session_id: &str, reason: &str) -> Result<ProcessingSession, SessionError> {
        self.token_for(session_id).cancel(reason);
        let reason = reason.to_string();
        self.with_session(session_id, move |engine, session, _| {
            Box::pin(async move {
                if engine.cancel(session, &reason).await? {
                    info!(session_id = %session.session_id, reason = %reason, "session cancelled");
                }
                Ok(())
            })
        })
        .await
    }

    pub async fn status(&self, session_id: &str) -> Result<ProcessingSession, SessionError> {
        self.engine
            .store()
            .load_session(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    pub async fn list(&self) -> Result<Vec<SessionSummary>, SessionError> {
        Ok(self.engine.store().list_sessions().await?)
    }

    /// Delete terminal sessions not updated within `retention`.
    pub async fn purge_terminal(&self, retention: Duration) -> Result<u64, SessionError> {
        let cutoff = self.engine.clock().now() - retention;
        let removed = self.engine.store().delete_terminal_before(cutoff).await?;
        info!(removed, cutoff = %cutoff, "purged terminal sessions");
        Ok(removed)
    }

    /// Load, operate on, and release a session under its lock.
    async fn with_session<F>(&self, session_id: &str, op: F) -> Result<ProcessingSession, SessionError>
    where
        F: for<'a> FnOnce(
            &'a SessionEngine,
            &'a mut ProcessingSession,
            &'a CancelToken,
        ) -> futures::future::BoxFuture<'a, Result<(), SessionError>>,
    {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let mut session = match self.status(session_id).await {
            Ok(session) => session,
            Err(err) => {
                self.forget(session_id);
                return Err(err);
            }
        };
        let cancel = self.token_for(session_id);
        let result = op(&self.engine, &mut session, &cancel).await;

        if session.state.is_terminal() {
            self.forget(session_id);
        }
        result.map(|_| session)
    }

    fn lock_for(&self, session_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn token_for(&self, session_id: &str) -> CancelToken {
        let mut cancels = self.cancels.lock().unwrap_or_else(|p| p.into_inner());
        cancels.entry(session_id.to_string()).or_default().clone()
    }

    /// Drop the lock and token of a session that needs no more driving.
    /// A caller still queued on the old lock runs against the stored
    /// terminal state, which every operation treats as a no-op or error.
    fn forget(&self, session_id: &str) {
        self.locks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(session_id);
        self.cancels
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(session_id);
    }

    /// Sessions with an active lock entry. Exposed for diagnostics.
    pub fn tracked_sessions(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or_default()
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("tracked_sessions", &self.tracked_sessions())
            .finish()
    }
}

/// True when the session needs an explicit continue to make progress.
pub fn is_paused(session: &ProcessingSession) -> bool {
    session.state == SessionState::WaitingForContinuation
}
