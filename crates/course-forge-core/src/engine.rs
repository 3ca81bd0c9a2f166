//! Session engine: runs the handler for a session's current state.
//!
//! Each call to [`SessionEngine::step`] executes exactly one state handler
//! and persists the session before returning. Because every handler can be
//! re-entered from its persisted state, a process restart simply loads the
//! session and steps again.
//!
//! # Handlers
//!
//! | State | Work |
//! |-------|------|
//! | `Created` | move to `Parsing` |
//! | `Parsing` | parse the source text |
//! | `Chunking` | analyze, choose a strategy, chunk |
//! | `Processing` | complete, or move to `CreatingCourseUnit` |
//! | `CreatingCourseUnit` | submit the current chunk (course, unit, content) |
//! | `WaitingForContinuation` | nothing; needs an explicit continue |
//!
//! Submission failures are classified by [`CollaboratorError`]: transient
//! errors are retried with backoff up to the [`RetryPolicy`] budget, size
//! rejections additionally shrink the limits, escalate the strategy and
//! re-chunk the remaining items, and anything else fails the session at once.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::analyzer::{analyze, AnalyzerConfig};
use crate::chunk::{chunk_items, rechunk_remaining};
use crate::collaborator::{truncate_message, Collaborator, CollaboratorError};
use crate::error::{FailureKind, SessionError, SessionFailure};
use crate::limits::LimitsStore;
use crate::models::{Chunk, CourseUnit, ProcessingStrategy, UnitContent};
use crate::parser::parse_transcript;
use crate::retry::{with_timeout, Clock, RetryPolicy};
use crate::session::{ProcessingSession, SessionState};
use crate::store::SessionStore;

/// Tunables for the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub analyzer: AnalyzerConfig,
    pub retry: RetryPolicy,
}

/// What the caller should do after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// More work is ready; step again.
    Continue,
    /// Waiting for an explicit continue.
    Paused,
    /// `Completed` or `Failed`.
    Terminal,
}

/// Progress notifications emitted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Transition {
        session_id: String,
        from: SessionState,
        to: SessionState,
    },
    Planned {
        session_id: String,
        strategy: ProcessingStrategy,
        score: f64,
        items: usize,
        chunks: usize,
    },
    ChunkSubmitted {
        session_id: String,
        chunk_index: usize,
        total_chunks: usize,
        unit_id: String,
    },
    RetryScheduled {
        session_id: String,
        chunk_index: usize,
        retry: u32,
        delay_ms: u64,
        error: String,
    },
    Rechunked {
        session_id: String,
        from_chunk: usize,
        total_chunks: usize,
        strategy: ProcessingStrategy,
        max_chunk_chars: usize,
    },
    Failed {
        session_id: String,
        kind: FailureKind,
        message: String,
    },
}

/// Receives [`SessionEvent`]s. Must not block.
pub trait SessionObserver: Send + Sync {
    fn on_event(&self, event: &SessionEvent);
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl SessionObserver for NoopObserver {
    fn on_event(&self, _event: &SessionEvent) {}
}

/// Cooperative cancellation flag, checked at every handler boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    reason: Arc<Mutex<Option<String>>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self, reason: &str) {
        if let Ok(mut slot) = self.reason.lock() {
            slot.get_or_insert_with(|| reason.to_string());
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.lock().ok().and_then(|r| r.clone())
    }
}

enum SubmitError {
    Backend(CollaboratorError),
    Engine(SessionError),
}

impl From<CollaboratorError> for SubmitError {
    fn from(err: CollaboratorError) -> Self {
        Self::Backend(err)
    }
}

impl From<anyhow::Error> for SubmitError {
    fn from(err: anyhow::Error) -> Self {
        Self::Engine(SessionError::Store(err))
    }
}

/// Drives sessions through their states against a collaborator.
#[derive(Clone)]
pub struct SessionEngine {
    collaborator: Arc<dyn Collaborator>,
    store: Arc<dyn SessionStore>,
    limits: LimitsStore,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn SessionObserver>,
    config: EngineConfig,
}

impl SessionEngine {
    pub fn new(
        collaborator: Arc<dyn Collaborator>,
        store: Arc<dyn SessionStore>,
        limits: LimitsStore,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            collaborator,
            store,
            limits,
            clock,
            observer: Arc::new(NoopObserver),
            config,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn limits(&self) -> &LimitsStore {
        &self.limits
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Step until the session pauses or terminates.
    pub async fn drive(&self, session: &mut ProcessingSession, cancel: &CancelToken) -> Result<(), SessionError> {
        loop {
            match self.step(session, cancel).await? {
                Step::Continue => continue,
                Step::Paused | Step::Terminal => return Ok(()),
            }
        }
    }

    /// Run the handler for the session's current state once.
    pub async fn step(&self, session: &mut ProcessingSession, cancel: &CancelToken) -> Result<Step, SessionError> {
        if session.state.is_terminal() {
            return Ok(Step::Terminal);
        }
        if let Some(reason) = cancel.reason() {
            return self.cancel(session, &reason).await.map(|_| Step::Terminal);
        }

        match session.state {
            SessionState::Created => {
                self.transition(session, SessionState::Parsing).await?;
                Ok(Step::Continue)
            }
            SessionState::Parsing => {
                session.transcript = parse_transcript(&session.source_text);
                let stats = &session.transcript.stats;
                info!(
                    session_id = %session.session_id,
                    items = session.transcript.items.len(),
                    code_items = stats.code_items,
                    topic_items = stats.topic_items,
                    skipped = stats.skipped_paragraphs,
                    warnings = session.transcript.warnings.len(),
                    "transcript parsed"
                );
                self.transition(session, SessionState::Chunking).await?;
                Ok(Step::Continue)
            }
            SessionState::Chunking => {
                self.plan(session).await?;
                self.transition(session, SessionState::Processing).await?;
                Ok(Step::Continue)
            }
            SessionState::Processing => {
                if session.all_submitted() {
                    self.transition(session, SessionState::Completed).await?;
                    info!(
                        session_id = %session.session_id,
                        units = session.course_structure.units.len(),
                        "session completed"
                    );
                    Ok(Step::Terminal)
                } else {
                    self.transition(session, SessionState::CreatingCourseUnit).await?;
                    Ok(Step::Continue)
                }
            }
            SessionState::CreatingCourseUnit => self.submit_current(session).await,
            SessionState::WaitingForContinuation => Ok(Step::Paused),
            SessionState::Completed | SessionState::Failed => Ok(Step::Terminal),
        }
    }

    /// Leave `WaitingForContinuation` on an explicit continue.
    pub async fn continue_from_wait(&self, session: &mut ProcessingSession) -> Result<(), SessionError> {
        if session.state != SessionState::WaitingForContinuation {
            return Err(SessionError::WrongState {
                id: session.session_id.clone(),
                state: session.state,
                expected: SessionState::WaitingForContinuation,
            });
        }
        self.transition(session, SessionState::Processing).await
    }

    /// Mark a non-terminal session `Failed` with a cancellation reason.
    /// Already created backend units are left in place.
    pub async fn cancel(&self, session: &mut ProcessingSession, reason: &str) -> Result<bool, SessionError> {
        if session.state.is_terminal() {
            return Ok(false);
        }
        let chunk = session.current_chunk().cloned();
        let attempts = session.retry_count_for_current_chunk;
        self.fail(session, FailureKind::Cancelled, reason.to_string(), chunk.as_ref(), attempts)
            .await?;
        Ok(true)
    }

    async fn plan(&self, session: &mut ProcessingSession) -> Result<(), SessionError> {
        let limits = self.limits.snapshot();
        let prior_failures = self.store.failure_count(session.fingerprint()).await?;
        let report = analyze(&session.transcript, &limits, prior_failures, &self.config.analyzer);

        session.strategy = report.strategy;
        session.complexity_score = report.score;
        session.chunks = chunk_items(&session.transcript.items, report.strategy, &limits);
        session.current_chunk_index = 0;
        session.retry_count_for_current_chunk = 0;

        info!(
            session_id = %session.session_id,
            strategy = %report.strategy,
            score = report.score,
            prior_failures,
            max_chunk_chars = limits.max_chunk_chars,
            chunks = session.chunks.len(),
            "session planned"
        );
        self.observer.on_event(&SessionEvent::Planned {
            session_id: session.session_id.clone(),
            strategy: report.strategy,
            score: report.score,
            items: session.transcript.items.len(),
            chunks: session.chunks.len(),
        });
        Ok(())
    }

    async fn submit_current(&self, session: &mut ProcessingSession) -> Result<Step, SessionError> {
        let Some(chunk) = session.current_chunk().cloned() else {
            // Nothing left; let Processing complete the session.
            self.transition(session, SessionState::Processing).await?;
            return Ok(Step::Continue);
        };

        match self.submit_chunk(session, &chunk).await {
            Ok(unit_id) => {
                let limits = self.limits.record_success();
                self.store.save_limits(&limits).await?;

                session.current_chunk_index += 1;
                session.retry_count_for_current_chunk = 0;
                debug!(
                    session_id = %session.session_id,
                    chunk = chunk.index,
                    unit_id = %unit_id,
                    "chunk attached"
                );
                self.observer.on_event(&SessionEvent::ChunkSubmitted {
                    session_id: session.session_id.clone(),
                    chunk_index: chunk.index,
                    total_chunks: session.chunks.len(),
                    unit_id,
                });

                self.transition(session, SessionState::Processing).await?;
                if !session.all_submitted() && session.strategy.is_incremental() {
                    self.transition(session, SessionState::WaitingForContinuation).await?;
                    return Ok(Step::Paused);
                }
                Ok(Step::Continue)
            }
            Err(SubmitError::Engine(err)) => Err(err),
            Err(SubmitError::Backend(err)) => self.handle_failure(session, &chunk, err).await,
        }
    }

    /// Ensure the course and the chunk's unit exist, then attach content.
    /// Safe to re-run: existing ids in the course structure are reused.
    async fn submit_chunk(&self, session: &mut ProcessingSession, chunk: &Chunk) -> Result<String, SubmitError> {
        let timeout = self.config.retry.call_timeout();
        let clock = self.clock.as_ref();

        let course_id = match session.course_structure.course_id.clone() {
            Some(id) => id,
            None => {
                let id = with_timeout(
                    clock,
                    timeout,
                    self.collaborator
                        .create_course(&session.course_name, &session.course_description),
                )
                .await?;
                info!(session_id = %session.session_id, course_id = %id, "course created");
                session.course_structure.course_id = Some(id.clone());
                self.store.save_session(session).await?;
                id
            }
        };

        let position = chunk.index + 1;
        let unit_id = match session.course_structure.unit_at(position) {
            Some(unit) if unit.attached => return Ok(unit.unit_id.clone()),
            Some(unit) => unit.unit_id.clone(),
            None => {
                let name = session.unit_name(chunk);
                let id = with_timeout(
                    clock,
                    timeout,
                    self.collaborator.create_structural_unit(&course_id, position, &name),
                )
                .await?;
                session.course_structure.units.push(CourseUnit {
                    unit_id: id.clone(),
                    position,
                    name,
                    start: chunk.start,
                    end: chunk.end,
                    content_chars: 0,
                    attached: false,
                });
                self.store.save_session(session).await?;
                id
            }
        };

        let content = UnitContent::from_chunk(chunk, &session.transcript.items);
        with_timeout(
            clock,
            timeout,
            self.collaborator.attach_content(&course_id, &unit_id, &content),
        )
        .await?;

        if let Some(unit) = session.course_structure.unit_at_mut(position) {
            unit.start = chunk.start;
            unit.end = chunk.end;
            unit.content_chars = chunk.estimated_chars;
            unit.attached = true;
        }
        Ok(unit_id)
    }

    async fn handle_failure(
        &self,
        session: &mut ProcessingSession,
        chunk: &Chunk,
        err: CollaboratorError,
    ) -> Result<Step, SessionError> {
        let attempts = session.retry_count_for_current_chunk + 1;
        warn!(
            session_id = %session.session_id,
            chunk = chunk.index,
            attempt = attempts,
            kind = err.kind(),
            error = %err,
            "chunk submission failed"
        );

        if !err.is_transient() {
            let message = truncate_message(&err.to_string());
            return self
                .fail(session, FailureKind::from_collaborator(&err), message, Some(chunk), attempts)
                .await;
        }

        session.retry_count_for_current_chunk = attempts;
        let limits = if err.is_size_related() {
            let rejected = match &err {
                CollaboratorError::PayloadTooLarge { size, .. } if *size > 0 => *size,
                _ => chunk.estimated_chars,
            };
            self.limits.record_size_failure(rejected)
        } else {
            self.limits.record_transient_failure()
        };
        self.store.save_limits(&limits).await?;

        let policy = &self.config.retry;
        if !policy.should_retry(attempts) {
            let message = truncate_message(&format!("gave up after {} attempts: {}", attempts, err));
            return self
                .fail(session, FailureKind::RetriesExhausted, message, Some(chunk), attempts)
                .await;
        }

        if err.is_size_related() {
            session.strategy = session.strategy.escalate();
            let from = session.current_chunk_index;
            rechunk_remaining(
                &mut session.chunks,
                from,
                &session.transcript.items,
                session.strategy,
                &limits,
            );
            session.rechunk_count += 1;
            info!(
                session_id = %session.session_id,
                from_chunk = from,
                chunks = session.chunks.len(),
                strategy = %session.strategy,
                max_chunk_chars = limits.max_chunk_chars,
                "remaining content re-chunked"
            );
            self.observer.on_event(&SessionEvent::Rechunked {
                session_id: session.session_id.clone(),
                from_chunk: from,
                total_chunks: session.chunks.len(),
                strategy: session.strategy,
                max_chunk_chars: limits.max_chunk_chars,
            });
        }

        let delay = policy.delay_for(attempts, err.retry_after());
        self.observer.on_event(&SessionEvent::RetryScheduled {
            session_id: session.session_id.clone(),
            chunk_index: session.current_chunk_index,
            retry: attempts,
            delay_ms: delay.as_millis() as u64,
            error: err.to_string(),
        });
        self.transition(session, SessionState::Processing).await?;
        self.clock.sleep(delay).await;
        Ok(Step::Continue)
    }

    async fn fail(
        &self,
        session: &mut ProcessingSession,
        kind: FailureKind,
        message: String,
        chunk: Option<&Chunk>,
        attempts: u32,
    ) -> Result<Step, SessionError> {
        let from = session.state;
        let failure = SessionFailure {
            kind,
            message: message.clone(),
            chunk_index: chunk.map(|c| c.index),
            chunk_summary: chunk.map(|c| session.chunk_summary(c)),
            attempts,
        };
        session.fail(failure, self.clock.now())?;
        self.store.save_session(session).await?;

        warn!(
            session_id = %session.session_id,
            from = %from,
            kind = %kind,
            message = %message,
            "session failed"
        );
        self.observer.on_event(&SessionEvent::Transition {
            session_id: session.session_id.clone(),
            from,
            to: SessionState::Failed,
        });
        self.observer.on_event(&SessionEvent::Failed {
            session_id: session.session_id.clone(),
            kind,
            message,
        });
        Ok(Step::Terminal)
    }

    async fn transition(&self, session: &mut ProcessingSession, to: SessionState) -> Result<(), SessionError> {
        let from = session.state;
        session.transition(to, self.clock.now())?;
        self.store.save_session(session).await?;
        debug!(session_id = %session.session_id, from = %from, to = %to, "session transition");
        self.observer.on_event(&SessionEvent::Transition {
            session_id: session.session_id.clone(),
            from,
            to,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::MockCollaborator;
    use crate::limits::{AdaptiveLimits, LimitsPolicy};
    use crate::retry::ManualClock;
    use crate::store::memory::InMemorySessionStore;
    use chrono::Utc;
    use std::time::Duration;

    const TEXT: &str = "# Variables\n\nA variable names a value.\n\n```python\nx = 1\nprint(x)\n```\n";

    struct Recorder(Mutex<Vec<SessionEvent>>);

    impl SessionObserver for Recorder {
        fn on_event(&self, event: &SessionEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    fn engine(mock: MockCollaborator, clock: Arc<ManualClock>) -> SessionEngine {
        SessionEngine::new(
            Arc::new(mock),
            Arc::new(InMemorySessionStore::new()),
            LimitsStore::new(LimitsPolicy::default(), AdaptiveLimits::default()),
            clock,
            EngineConfig::default(),
        )
    }

    fn new_session(text: &str) -> ProcessingSession {
        ProcessingSession::new("s".into(), "Course".into(), "About".into(), text.into(), Utc::now())
    }

    fn happy_mock() -> MockCollaborator {
        let mut mock = MockCollaborator::new();
        mock.expect_create_course().times(1).returning(|_, _| Ok("c1".into()));
        mock.expect_create_structural_unit()
            .returning(|_, pos, _| Ok(format!("u{}", pos)));
        mock.expect_attach_content().returning(|_, _, _| Ok(()));
        mock
    }

    #[tokio::test]
    async fn test_drive_small_session_to_completion() {
        let clock = Arc::new(ManualClock::new());
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let engine = engine(happy_mock(), clock.clone()).with_observer(recorder.clone());
        let mut s = new_session(TEXT);

        engine.drive(&mut s, &CancelToken::new()).await.unwrap();

        assert_eq!(s.state, SessionState::Completed);
        assert_eq!(s.strategy, ProcessingStrategy::SinglePass);
        assert_eq!(s.chunks.len(), 1);
        assert_eq!(s.course_structure.course_id.as_deref(), Some("c1"));
        assert_eq!(s.course_structure.units.len(), 1);
        assert!(s.course_structure.units[0].attached);
        assert_eq!(s.course_structure.units[0].name, "Variables");
        assert!(clock.sleeps().is_empty());

        let events = recorder.0.lock().unwrap();
        let transitions: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Transition { to, .. } => Some(*to),
                _ => None,
            })
            .collect();
        assert_eq!(
            transitions,
            vec![
                SessionState::Parsing,
                SessionState::Chunking,
                SessionState::Processing,
                SessionState::CreatingCourseUnit,
                SessionState::Processing,
                SessionState::Completed,
            ]
        );
    }

    #[tokio::test]
    async fn test_auth_error_fails_without_retry() {
        let mut mock = MockCollaborator::new();
        mock.expect_create_course()
            .times(1)
            .returning(|_, _| Err(CollaboratorError::Auth("token expired".into())));
        let clock = Arc::new(ManualClock::new());
        let engine = engine(mock, clock.clone());
        let mut s = new_session(TEXT);

        engine.drive(&mut s, &CancelToken::new()).await.unwrap();

        assert_eq!(s.state, SessionState::Failed);
        let failure = s.failure.as_ref().unwrap();
        assert_eq!(failure.kind, FailureKind::Auth);
        assert_eq!(failure.attempts, 1);
        assert!(failure.message.contains("token expired"));
        assert!(failure.chunk_summary.as_ref().unwrap().contains("Variables"));
        assert_eq!(s.retry_count_for_current_chunk, 0);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_transient_errors_retry_with_backoff_then_give_up() {
        let mut mock = MockCollaborator::new();
        mock.expect_create_course()
            .times(3)
            .returning(|_, _| Err(CollaboratorError::Transient("503".into())));
        let clock = Arc::new(ManualClock::new());
        let engine = engine(mock, clock.clone());
        let mut s = new_session(TEXT);

        engine.drive(&mut s, &CancelToken::new()).await.unwrap();

        assert_eq!(s.state, SessionState::Failed);
        assert_eq!(s.failure.as_ref().unwrap().kind, FailureKind::RetriesExhausted);
        assert_eq!(s.failure.as_ref().unwrap().attempts, 3);
        assert_eq!(s.retry_count_for_current_chunk, 3);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(2), Duration::from_secs(4)]);
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        struct Hang;

        #[async_trait::async_trait]
        impl Collaborator for Hang {
            async fn create_course(&self, _: &str, _: &str) -> Result<String, CollaboratorError> {
                futures::future::pending().await
            }
            async fn create_structural_unit(&self, _: &str, _: usize, _: &str) -> Result<String, CollaboratorError> {
                futures::future::pending().await
            }
            async fn attach_content(&self, _: &str, _: &str, _: &UnitContent) -> Result<(), CollaboratorError> {
                futures::future::pending().await
            }
        }

        let clock = Arc::new(ManualClock::expiring_timers());
        let engine = SessionEngine::new(
            Arc::new(Hang),
            Arc::new(InMemorySessionStore::new()),
            LimitsStore::new(LimitsPolicy::default(), AdaptiveLimits::default()),
            clock.clone(),
            EngineConfig::default(),
        );
        let mut s = new_session(TEXT);
        engine.drive(&mut s, &CancelToken::new()).await.unwrap();

        let failure = s.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::RetriesExhausted);
        assert!(failure.message.contains("timed out"));
        assert_eq!(failure.attempts, 3);
        assert_eq!(clock.sleeps().len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_token_checked_between_steps() {
        let engine = engine(MockCollaborator::new(), Arc::new(ManualClock::new()));
        let mut s = new_session(TEXT);
        let cancel = CancelToken::new();

        assert_eq!(engine.step(&mut s, &cancel).await.unwrap(), Step::Continue);
        cancel.cancel("user asked");
        cancel.cancel("ignored");
        assert_eq!(engine.step(&mut s, &cancel).await.unwrap(), Step::Terminal);

        assert_eq!(s.state, SessionState::Failed);
        let failure = s.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::Cancelled);
        assert_eq!(failure.message, "user asked");
    }

    #[tokio::test]
    async fn test_continue_requires_waiting_state() {
        let engine = engine(MockCollaborator::new(), Arc::new(ManualClock::new()));
        let mut s = new_session(TEXT);
        let err = engine.continue_from_wait(&mut s).await.unwrap_err();
        assert!(matches!(err, SessionError::WrongState { .. }));
    }

    #[tokio::test]
    async fn test_empty_transcript_completes_without_backend_calls() {
        let engine = engine(MockCollaborator::new(), Arc::new(ManualClock::new()));
        let mut s = new_session("");
        engine.drive(&mut s, &CancelToken::new()).await.unwrap();
        assert_eq!(s.state, SessionState::Completed);
        assert!(s.chunks.is_empty());
        assert_eq!(s.course_structure.course_id, None);
    }
}
