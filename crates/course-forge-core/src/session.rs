//! Session aggregate and its state machine.
//!
//! A [`ProcessingSession`] is always in exactly one [`SessionState`]. Every
//! state change goes through [`ProcessingSession::transition`], which
//! rejects anything outside the transition table below.
//!
//! ```text
//! Created ──> Parsing ──> Chunking ──> Processing ──> Completed
//!                                       │  ▲   ▲
//!                                       ▼  │   │
//!                          CreatingCourseUnit  WaitingForContinuation
//!
//! every non-terminal state ──> Failed
//! ```
//!
//! `Processing` is the dispatch state: from there the engine either submits
//! the next chunk (`CreatingCourseUnit`), pauses for an explicit continue
//! (`WaitingForContinuation`, incremental strategies only), or completes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SessionError, SessionFailure};
use crate::models::{ChatTranscript, Chunk, CourseStructure, ProcessingStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Parsing,
    Chunking,
    Processing,
    CreatingCourseUnit,
    WaitingForContinuation,
    Completed,
    Failed,
}

impl SessionState {
    pub const ALL: [SessionState; 8] = [
        Self::Created,
        Self::Parsing,
        Self::Chunking,
        Self::Processing,
        Self::CreatingCourseUnit,
        Self::WaitingForContinuation,
        Self::Completed,
        Self::Failed,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The transition table.
    pub fn can_transition_to(self, to: SessionState) -> bool {
        use SessionState::*;
        if to == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, to),
            (Created, Parsing)
                | (Parsing, Chunking)
                | (Chunking, Processing)
                | (Processing, CreatingCourseUnit)
                | (Processing, WaitingForContinuation)
                | (Processing, Completed)
                | (CreatingCourseUnit, Processing)
                | (WaitingForContinuation, Processing)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Parsing => "parsing",
            Self::Chunking => "chunking",
            Self::Processing => "processing",
            Self::CreatingCourseUnit => "creating_course_unit",
            Self::WaitingForContinuation => "waiting_for_continuation",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.as_str() == s)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The durable unit of work turning one transcript into one course.
///
/// Serialized in full after every transition, so any state can be
/// re-entered after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingSession {
    pub session_id: String,
    pub course_name: String,
    pub course_description: String,
    /// Raw input, kept until the session is purged so `Parsing` can be re-run.
    pub source_text: String,
    pub transcript: ChatTranscript,
    pub strategy: ProcessingStrategy,
    pub complexity_score: f64,
    pub chunks: Vec<Chunk>,
    pub current_chunk_index: usize,
    pub state: SessionState,
    pub course_structure: CourseStructure,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub retry_count_for_current_chunk: u32,
    /// Size-driven re-chunks performed so far.
    #[serde(default)]
    pub rechunk_count: u32,
    #[serde(default)]
    pub failure: Option<SessionFailure>,
}

impl ProcessingSession {
    pub fn new(
        session_id: String,
        course_name: String,
        course_description: String,
        source_text: String,
        now: DateTime<Utc>,
    ) -> Self {
        let fingerprint = crate::parser::fingerprint(&source_text);
        Self {
            session_id,
            course_name,
            course_description,
            source_text,
            transcript: ChatTranscript {
                fingerprint,
                ..ChatTranscript::default()
            },
            strategy: ProcessingStrategy::SinglePass,
            complexity_score: 0.0,
            chunks: Vec::new(),
            current_chunk_index: 0,
            state: SessionState::Created,
            course_structure: CourseStructure::default(),
            created_at: now,
            updated_at: now,
            retry_count_for_current_chunk: 0,
            rechunk_count: 0,
            failure: None,
        }
    }

    pub fn fingerprint(&self) -> &str {
        &self.transcript.fingerprint
    }

    /// Move to `to`, or fail with [`SessionError::InvalidTransition`].
    pub fn transition(&mut self, to: SessionState, now: DateTime<Utc>) -> Result<(), SessionError> {
        if !self.state.can_transition_to(to) {
            return Err(SessionError::InvalidTransition { from: self.state, to });
        }
        self.state = to;
        self.updated_at = now;
        Ok(())
    }

    /// Record `failure` and move to `Failed`.
    pub fn fail(&mut self, failure: SessionFailure, now: DateTime<Utc>) -> Result<(), SessionError> {
        self.transition(SessionState::Failed, now)?;
        self.failure = Some(failure);
        Ok(())
    }

    pub fn current_chunk(&self) -> Option<&Chunk> {
        self.chunks.get(self.current_chunk_index)
    }

    pub fn remaining_chunks(&self) -> usize {
        self.chunks.len().saturating_sub(self.current_chunk_index)
    }

    pub fn all_submitted(&self) -> bool {
        self.current_chunk_index >= self.chunks.len()
    }

    /// Display name for the unit holding `chunk`: its first topic's title.
    pub fn unit_name(&self, chunk: &Chunk) -> String {
        let items = chunk.items(&self.transcript.items);
        items
            .iter()
            .find(|i| !i.is_code() && !i.title.is_empty())
            .or_else(|| items.iter().find(|i| !i.title.is_empty()))
            .map(|i| i.title.clone())
            .unwrap_or_else(|| format!("Part {}", chunk.index + 1))
    }

    /// Short description of `chunk` for failure reports: titles plus the
    /// start of the first body.
    pub fn chunk_summary(&self, chunk: &Chunk) -> String {
        const PREVIEW_LEN: usize = 200;
        let items = chunk.items(&self.transcript.items);
        let titles: Vec<&str> = items.iter().map(|i| i.title.as_str()).collect();
        let body = items.first().map(|i| i.body.as_str()).unwrap_or_default();
        let mut cut = body.len().min(PREVIEW_LEN);
        while cut > 0 && !body.is_char_boundary(cut) {
            cut -= 1;
        }
        let ellipsis = if cut < body.len() { "..." } else { "" };
        format!(
            "chunk {} [items {}..{}, ~{} chars] {} | {}{}",
            chunk.index,
            chunk.start,
            chunk.end,
            chunk.estimated_chars,
            titles.join(" / "),
            &body[..cut],
            ellipsis
        )
    }
}
