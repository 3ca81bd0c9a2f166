//! The minimal capability the course backend must expose.
//!
//! The session engine only ever talks to a backend through [`Collaborator`].
//! Implementations are responsible for transport, authentication and schema
//! mapping; they report failures through the [`CollaboratorError`] taxonomy
//! so the engine can decide between retrying, shrinking and failing.

use std::time::Duration;

use async_trait::async_trait;
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use thiserror::Error;

use crate::models::UnitContent;

/// Longest backend message kept in an error, in bytes.
const MAX_MESSAGE_LEN: usize = 500;

/// Failure reported by a [`Collaborator`] call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CollaboratorError {
    #[error("authorization failed: {0}")]
    Auth(String),

    #[error("request rejected as invalid: {0}")]
    Validation(String),

    #[error("payload of {size} chars rejected as too large: {message}")]
    PayloadTooLarge { size: usize, message: String },

    #[error("rate limited: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("transient backend error: {0}")]
    Transient(String),
}

impl CollaboratorError {
    /// Transient errors are retried; the rest fail the session at once.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::PayloadTooLarge { .. } | Self::RateLimited { .. } | Self::Timeout(_) | Self::Transient(_)
        )
    }

    pub fn is_size_related(&self) -> bool {
        matches!(self, Self::PayloadTooLarge { .. })
    }

    /// Server-suggested wait, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Stable snake_case label, used in persisted failures and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::Validation(_) => "validation",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::RateLimited { .. } => "rate_limited",
            Self::Timeout(_) => "timeout",
            Self::Transient(_) => "transient",
        }
    }
}

/// Truncate a backend message for storage and display.
pub fn truncate_message(message: &str) -> String {
    let trimmed = message.trim();
    if trimmed.len() <= MAX_MESSAGE_LEN {
        return trimmed.to_string();
    }
    let mut cut = MAX_MESSAGE_LEN;
    while cut > 0 && !trimmed.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &trimmed[..cut])
}

/// Course backend operations required by the session engine.
///
/// Implemented by real clients and by test mocks. Every call may be retried
/// after a transient failure, so implementations should not assume a call
/// is made only once.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Collaborator: Send + Sync {
    /// Create the root course. Returns the backend's course id.
    async fn create_course(&self, name: &str, description: &str) -> Result<String, CollaboratorError>;

    /// Create a structural unit at `position` (1-based). Returns the unit id.
    async fn create_structural_unit(
        &self,
        course_id: &str,
        position: usize,
        name: &str,
    ) -> Result<String, CollaboratorError>;

    /// Attach a chunk's content to a unit. May fail with
    /// [`CollaboratorError::PayloadTooLarge`].
    async fn attach_content(
        &self,
        course_id: &str,
        unit_id: &str,
        content: &UnitContent,
    ) -> Result<(), CollaboratorError>;
}
