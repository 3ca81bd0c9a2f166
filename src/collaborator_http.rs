//! JSON REST [`Collaborator`] over reqwest.
//!
//! | Call | Request | Response |
//! |------|---------|----------|
//! | `create_course` | `POST /courses {name, description}` | `{"id": "..."}` |
//! | `create_structural_unit` | `POST /courses/{id}/units {position, name}` | `{"id": "..."}` |
//! | `attach_content` | `POST /courses/{id}/units/{unit}/content` [`UnitContent`] | any 2xx |
//!
//! Every request carries `Authorization: Bearer <token>` when a token is set.
//! Non-success statuses are mapped onto [`CollaboratorError`]:
//!
//! - 401/403 → `Auth`
//! - 400/422 → `Validation`
//! - 413 → `PayloadTooLarge`
//! - 429 → `RateLimited`, honouring `Retry-After` seconds
//! - 5xx and other statuses → `Transient`

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use course_forge_core::collaborator::{truncate_message, Collaborator, CollaboratorError};
use course_forge_core::models::UnitContent;

use crate::config::CollaboratorConfig;

/// HTTP client for the course backend.
pub struct HttpCollaborator {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

#[derive(Deserialize)]
struct Created {
    id: serde_json::Value,
}

impl HttpCollaborator {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            timeout,
        })
    }

    pub fn from_config(config: &CollaboratorConfig) -> Result<Self> {
        Self::new(
            &config.base_url,
            config.token(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<Response, CollaboratorError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "collaborator request");

        let mut request = self.client.post(&url).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| map_transport_error(e, self.timeout))?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(map_status(response, body_len(body)).await)
        }
    }

    async fn post_for_id(&self, path: &str, body: &serde_json::Value) -> Result<String, CollaboratorError> {
        let response = self.post(path, body).await?;
        let created: Created = response
            .json()
            .await
            .map_err(|e| CollaboratorError::Transient(format!("invalid response body: {}", e)))?;
        match created.id {
            serde_json::Value::String(id) if !id.is_empty() => Ok(id),
            serde_json::Value::Number(n) => Ok(n.to_string()),
            other => Err(CollaboratorError::Transient(format!(
                "response id is not a string or number: {}",
                other
            ))),
        }
    }
}

fn body_len(body: &serde_json::Value) -> usize {
    serde_json::to_string(body).map(|s| s.len()).unwrap_or_default()
}

fn map_transport_error(err: reqwest::Error, timeout: Duration) -> CollaboratorError {
    if err.is_timeout() {
        CollaboratorError::Timeout(timeout)
    } else {
        CollaboratorError::Transient(truncate_message(&err.to_string()))
    }
}

/// Parse a `Retry-After` header given in seconds.
fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

async fn map_status(response: Response, request_len: usize) -> CollaboratorError {
    let status = response.status();
    let wait = retry_after(&response);
    let text = response.text().await.unwrap_or_default();
    let message = truncate_message(&format!("{}: {}", status, text.trim()));

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CollaboratorError::Auth(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => CollaboratorError::Validation(message),
        StatusCode::PAYLOAD_TOO_LARGE => CollaboratorError::PayloadTooLarge {
            size: request_len,
            message,
        },
        StatusCode::TOO_MANY_REQUESTS => CollaboratorError::RateLimited {
            retry_after: wait,
            message,
        },
        _ => CollaboratorError::Transient(message),
    }
}

#[async_trait]
impl Collaborator for HttpCollaborator {
    async fn create_course(&self, name: &str, description: &str) -> Result<String, CollaboratorError> {
        self.post_for_id("/courses", &json!({ "name": name, "description": description }))
            .await
    }

    async fn create_structural_unit(
        &self,
        course_id: &str,
        position: usize,
        name: &str,
    ) -> Result<String, CollaboratorError> {
        self.post_for_id(
            &format!("/courses/{}/units", course_id),
            &json!({ "position": position, "name": name }),
        )
        .await
    }

    async fn attach_content(
        &self,
        course_id: &str,
        unit_id: &str,
        content: &UnitContent,
    ) -> Result<(), CollaboratorError> {
        let body = serde_json::to_value(content)
            .map_err(|e| CollaboratorError::Validation(format!("content not serializable: {}", e)))?;
        self.post(&format!("/courses/{}/units/{}/content", course_id, unit_id), &body)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let c = HttpCollaborator::new("http://localhost:1/api/", None, Duration::from_secs(1)).unwrap();
        assert_eq!(c.base_url, "http://localhost:1/api");
    }

    #[test]
    fn test_body_len_counts_serialized_json() {
        assert_eq!(body_len(&json!({"a": 1})), 7);
    }
}
