//! Session errors and the user-visible failure record.
//!
//! Two layers:
//!
//! - [`SessionError`] is returned by engine and manager calls when the call
//!   itself could not proceed (unknown session, rejected transition, store
//!   failure).
//! - [`SessionFailure`] is recorded *inside* a session that reached `Failed`.
//!   It carries the last chunk's summary and the backend error so a caller
//!   can resume with adjusted input instead of starting over.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::collaborator::CollaboratorError;
use crate::session::SessionState;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid transition {from} -> {to}")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session {id} is {state}; expected {expected}")]
    WrongState {
        id: String,
        state: SessionState,
        expected: SessionState,
    },

    #[error("session store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

/// Why a session failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Auth,
    Validation,
    PayloadTooLarge,
    RateLimited,
    Timeout,
    Transient,
    RetriesExhausted,
    Cancelled,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Validation => "validation",
            Self::PayloadTooLarge => "payload_too_large",
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::Transient => "transient",
            Self::RetriesExhausted => "retries_exhausted",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_collaborator(err: &CollaboratorError) -> Self {
        match err {
            CollaboratorError::Auth(_) => Self::Auth,
            CollaboratorError::Validation(_) => Self::Validation,
            CollaboratorError::PayloadTooLarge { .. } => Self::PayloadTooLarge,
            CollaboratorError::RateLimited { .. } => Self::RateLimited,
            CollaboratorError::Timeout(_) => Self::Timeout,
            CollaboratorError::Transient(_) => Self::Transient,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure details stored on a `Failed` session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Chunk being submitted when the session failed, if any.
    pub chunk_index: Option<usize>,
    pub chunk_summary: Option<String>,
    /// Submissions made for that chunk, including the failing one.
    pub attempts: u32,
}

impl std::fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(idx) = self.chunk_index {
            write!(f, " (chunk {}, {} attempt(s))", idx, self.attempts)?;
        }
        if let Some(summary) = &self.chunk_summary {
            write!(f, "\n  last chunk: {}", summary)?;
        }
        Ok(())
    }
}
