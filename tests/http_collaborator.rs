//! `HttpCollaborator` against a local axum stub backend.
//!
//! The stub picks its response from the request: course names and unit ids
//! select error statuses, so each test drives one classification path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

use course_forge::collaborator_http::HttpCollaborator;
use course_forge_core::collaborator::{Collaborator, CollaboratorError};
use course_forge_core::engine::{EngineConfig, SessionEngine};
use course_forge_core::limits::{AdaptiveLimits, LimitsPolicy, LimitsStore};
use course_forge_core::manager::{BuildRequest, SessionManager};
use course_forge_core::models::{ContentItem, ContentKind, UnitContent};
use course_forge_core::retry::ManualClock;
use course_forge_core::session::SessionState;
use course_forge_core::store::memory::InMemorySessionStore;

// ─── Stub backend ───

#[derive(Default)]
struct Stub {
    courses: AtomicUsize,
    units: AtomicUsize,
    attached: Mutex<Vec<Value>>,
    tokens: Mutex<Vec<Option<String>>>,
}

fn record_token(stub: &Stub, headers: &HeaderMap) {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    stub.tokens.lock().unwrap().push(token);
}

async fn create_course(State(stub): State<Arc<Stub>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    record_token(&stub, &headers);
    match body["name"].as_str().unwrap_or_default() {
        "auth" => (StatusCode::UNAUTHORIZED, "bad token").into_response(),
        "forbidden" => (StatusCode::FORBIDDEN, "no access").into_response(),
        "invalid" => (StatusCode::UNPROCESSABLE_ENTITY, "name too short").into_response(),
        "limited" => (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, "7")],
            "slow down",
        )
            .into_response(),
        "down" => (StatusCode::SERVICE_UNAVAILABLE, "maintenance").into_response(),
        "slow" => {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(json!({ "id": "late" })).into_response()
        }
        _ => {
            let n = stub.courses.fetch_add(1, Ordering::SeqCst) + 1;
            (StatusCode::CREATED, Json(json!({ "id": format!("c-{}", n) }))).into_response()
        }
    }
}

async fn create_unit(
    State(stub): State<Arc<Stub>>,
    Path(course_id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if course_id == "missing-id" {
        return Json(json!({ "name": body["name"] })).into_response();
    }
    // Numeric ids, as some backends return.
    let n = stub.units.fetch_add(1, Ordering::SeqCst) + 1;
    (StatusCode::CREATED, Json(json!({ "id": n }))).into_response()
}

async fn attach(
    State(stub): State<Arc<Stub>>,
    Path((_course_id, unit_id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    if unit_id == "big" {
        return (StatusCode::PAYLOAD_TOO_LARGE, "request entity too large").into_response();
    }
    stub.attached.lock().unwrap().push(body);
    StatusCode::NO_CONTENT.into_response()
}

async fn spawn_stub() -> (String, Arc<Stub>) {
    let stub = Arc::new(Stub::default());
    let app = Router::new()
        .route("/courses", post(create_course))
        .route("/courses/{id}/units", post(create_unit))
        .route("/courses/{id}/units/{unit}/content", post(attach))
        .with_state(stub.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), stub)
}

fn client(base_url: &str) -> HttpCollaborator {
    HttpCollaborator::new(base_url, Some("secret".into()), Duration::from_secs(2)).unwrap()
}

fn content() -> UnitContent {
    UnitContent {
        items: vec![ContentItem {
            kind: ContentKind::Topic,
            title: "Ownership".into(),
            body: "Each value has one owner.".into(),
            language: None,
            word_count: 5,
            origin_offset: 0,
        }],
        estimated_chars: 60,
        oversized: false,
    }
}

// ─── Success paths ───

#[tokio::test]
async fn test_create_course_sends_bearer_token() {
    let (url, stub) = spawn_stub().await;
    let id = client(&url).create_course("Rust", "intro").await.unwrap();
    assert_eq!(id, "c-1");
    assert_eq!(
        stub.tokens.lock().unwrap().as_slice(),
        &[Some("Bearer secret".to_string())]
    );
}

#[tokio::test]
async fn test_numeric_unit_id_is_stringified() {
    let (url, _stub) = spawn_stub().await;
    let c = client(&url);
    assert_eq!(c.create_structural_unit("c-1", 1, "Intro").await.unwrap(), "1");
    assert_eq!(c.create_structural_unit("c-1", 2, "Next").await.unwrap(), "2");
}

#[tokio::test]
async fn test_attach_posts_unit_content() {
    let (url, stub) = spawn_stub().await;
    client(&url).attach_content("c-1", "u-1", &content()).await.unwrap();
    let attached = stub.attached.lock().unwrap();
    assert_eq!(attached.len(), 1);
    assert_eq!(attached[0]["items"][0]["title"], "Ownership");
}

// ─── Status classification ───

#[tokio::test]
async fn test_auth_statuses() {
    let (url, _stub) = spawn_stub().await;
    let c = client(&url);
    assert!(matches!(c.create_course("auth", "").await, Err(CollaboratorError::Auth(_))));
    assert!(matches!(
        c.create_course("forbidden", "").await,
        Err(CollaboratorError::Auth(_))
    ));
}

#[tokio::test]
async fn test_validation_status_keeps_message() {
    let (url, _stub) = spawn_stub().await;
    match client(&url).create_course("invalid", "").await {
        Err(CollaboratorError::Validation(msg)) => assert!(msg.contains("name too short"), "{}", msg),
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test]
async fn test_rate_limit_reads_retry_after() {
    let (url, _stub) = spawn_stub().await;
    let err = client(&url).create_course("limited", "").await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let (url, _stub) = spawn_stub().await;
    let err = client(&url).create_course("down", "").await.unwrap_err();
    assert!(matches!(err, CollaboratorError::Transient(_)));
}

#[tokio::test]
async fn test_payload_too_large_reports_request_size() {
    let (url, _stub) = spawn_stub().await;
    match client(&url).attach_content("c-1", "big", &content()).await {
        Err(CollaboratorError::PayloadTooLarge { size, .. }) => assert!(size > 0),
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_id_is_transient() {
    let (url, _stub) = spawn_stub().await;
    let err = client(&url)
        .create_structural_unit("missing-id", 1, "x")
        .await
        .unwrap_err();
    assert!(matches!(err, CollaboratorError::Transient(_)));
}

#[tokio::test]
async fn test_client_timeout_maps_to_timeout() {
    let (url, _stub) = spawn_stub().await;
    let c = HttpCollaborator::new(&url, None, Duration::from_millis(200)).unwrap();
    let err = c.create_course("slow", "").await.unwrap_err();
    assert_eq!(err, CollaboratorError::Timeout(Duration::from_millis(200)));
}

#[tokio::test]
async fn test_connection_refused_is_transient() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(&format!("http://{}", addr))
        .create_course("Rust", "")
        .await
        .unwrap_err();
    assert!(matches!(err, CollaboratorError::Transient(_)), "{:?}", err);
}

// ─── Full session ───

#[tokio::test]
async fn test_session_builds_course_on_stub() {
    let (url, stub) = spawn_stub().await;
    let manager = SessionManager::new(SessionEngine::new(
        Arc::new(client(&url)),
        Arc::new(InMemorySessionStore::new()),
        LimitsStore::new(LimitsPolicy::default(), AdaptiveLimits::default()),
        Arc::new(ManualClock::new()),
        EngineConfig::default(),
    ));

    let s = manager
        .start(BuildRequest {
            course_name: "Iterators".into(),
            description: "Adapters and laziness".into(),
            transcript: "# Iterators\nIterators are lazy.\n\n```rust\nlet v: Vec<_> = (1..4).map(|x| x * 2).collect();\n```\n".into(),
        })
        .await
        .unwrap();

    assert_eq!(s.state, SessionState::Completed);
    assert_eq!(s.course_structure.course_id.as_deref(), Some("c-1"));
    assert_eq!(s.course_structure.units[0].unit_id, "1");
    assert_eq!(stub.attached.lock().unwrap().len(), 1);
}
