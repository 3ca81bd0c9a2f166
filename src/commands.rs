//! Command implementations behind the `cforge` subcommands.
//!
//! Every command opens the SQLite store, builds a [`SessionManager`] with
//! the learned limits restored, runs, and prints a human summary to stdout.
//! Progress events (when enabled) go to stderr.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::info;

use course_forge_core::analyzer::analyze;
use course_forge_core::chunk::chunk_items;
use course_forge_core::collaborator::{Collaborator, CollaboratorError};
use course_forge_core::engine::SessionEngine;
use course_forge_core::limits::LimitsStore;
use course_forge_core::manager::{is_paused, BuildRequest, SessionManager};
use course_forge_core::models::UnitContent;
use course_forge_core::parser::{fingerprint, parse_transcript};
use course_forge_core::session::{ProcessingSession, SessionState};
use course_forge_core::store::SessionStore;

use crate::clock::TokioClock;
use crate::collaborator_http::HttpCollaborator;
use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::progress::ProgressMode;
use crate::sqlite_store::SqliteSessionStore;

/// Stand-in backend for commands that never submit content.
struct Unconfigured;

#[async_trait]
impl Collaborator for Unconfigured {
    async fn create_course(&self, _name: &str, _description: &str) -> Result<String, CollaboratorError> {
        Err(not_configured())
    }

    async fn create_structural_unit(
        &self,
        _course_id: &str,
        _position: usize,
        _name: &str,
    ) -> Result<String, CollaboratorError> {
        Err(not_configured())
    }

    async fn attach_content(
        &self,
        _course_id: &str,
        _unit_id: &str,
        _content: &UnitContent,
    ) -> Result<(), CollaboratorError> {
        Err(not_configured())
    }
}

fn not_configured() -> CollaboratorError {
    CollaboratorError::Auth("no [collaborator] section configured".to_string())
}

async fn open_store(config: &Config) -> Result<Arc<SqliteSessionStore>> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    Ok(Arc::new(SqliteSessionStore::new(pool)))
}

async fn open_manager(
    config: &Config,
    store: Arc<SqliteSessionStore>,
    collaborator: Arc<dyn Collaborator>,
    progress: ProgressMode,
) -> Result<SessionManager> {
    let limits = LimitsStore::new(config.limits.policy.clone(), config.limits.initial());
    let mut engine = SessionEngine::new(
        collaborator,
        store,
        limits,
        Arc::new(TokioClock),
        config.engine_config(),
    );
    if let Some(observer) = progress.observer() {
        engine = engine.with_observer(observer);
    }
    let manager = SessionManager::new(engine);
    manager.restore_limits().await?;
    Ok(manager)
}

fn http_collaborator(config: &Config) -> Result<Arc<dyn Collaborator>> {
    let collab = config.collaborator()?;
    if collab.token().is_none() {
        tracing::warn!(env = %collab.token_env, "no API token set; requests are sent unauthenticated");
    }
    Ok(Arc::new(HttpCollaborator::from_config(collab)?))
}

fn read_transcript(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .with_context(|| "Failed to read transcript from stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read transcript: {}", path.display()))
}

/// Print the outcome of a drive and fail the command if the session failed.
fn report(session: &ProcessingSession) -> Result<()> {
    println!("Session:  {}", session.session_id);
    println!("Course:   {}", session.course_name);
    println!("State:    {}", session.state);
    println!("Strategy: {} (score {:.2})", session.strategy, session.complexity_score);
    println!(
        "Progress: {} / {} chunks",
        session.current_chunk_index,
        session.chunks.len()
    );
    if let Some(course_id) = &session.course_structure.course_id {
        println!("Backend course: {}", course_id);
    }

    if is_paused(session) {
        println!();
        println!("Paused after a chunk. Run `cforge continue {}` to proceed.", session.session_id);
    }

    if let Some(failure) = &session.failure {
        bail!("Session {} failed: {}", session.session_id, failure);
    }
    Ok(())
}

/// `cforge build <file>`: create a session and drive it.
pub async fn run_build(
    config: &Config,
    file: &Path,
    name: &str,
    description: &str,
    dry_run: bool,
    progress: ProgressMode,
) -> Result<()> {
    let text = read_transcript(file)?;
    if name.trim().is_empty() {
        bail!("--name must not be empty");
    }

    if dry_run {
        return run_plan(config, &text).await;
    }

    let store = open_store(config).await?;
    let manager = open_manager(config, store, http_collaborator(config)?, progress).await?;
    let session = manager
        .start(BuildRequest {
            course_name: name.to_string(),
            description: description.to_string(),
            transcript: text,
        })
        .await?;
    report(&session)
}

/// Parse, analyze and chunk without contacting the backend.
async fn run_plan(config: &Config, text: &str) -> Result<()> {
    let store = open_store(config).await?;
    let limits = store.load_limits().await?.unwrap_or_else(|| config.limits.initial());
    let prior_failures = store.failure_count(&fingerprint(text)).await?;

    let transcript = parse_transcript(text);
    let report = analyze(&transcript, &limits, prior_failures, &config.analyzer);
    let chunks = chunk_items(&transcript.items, report.strategy, &limits);

    println!("Dry run: no backend calls.");
    println!();
    println!(
        "  Items:      {} ({} code, {} topics)",
        transcript.items.len(),
        transcript.stats.code_items,
        transcript.stats.topic_items
    );
    println!("  Characters: {}", transcript.stats.total_chars);
    for warning in &transcript.warnings {
        println!("  Warning:    {:?}", warning);
    }
    println!(
        "  Score:      {:.2} (size {:.2}, count {:.2}, code {:.2}, prior failures {})",
        report.score, report.size_factor, report.count_factor, report.code_factor, report.prior_failures
    );
    println!("  Strategy:   {}", report.strategy);
    println!(
        "  Limits:     {} chars, {} items per chunk",
        limits.max_chunk_chars, limits.max_items_per_chunk
    );
    println!();
    println!("  Chunks: {}", chunks.len());
    for chunk in &chunks {
        println!(
            "    {:>3}. items {}..{}  ~{} chars{}",
            chunk.index + 1,
            chunk.start,
            chunk.end,
            chunk.estimated_chars,
            if chunk.oversized { "  (oversized)" } else { "" }
        );
    }
    Ok(())
}

/// `cforge continue <id>`: advance a paused session.
pub async fn run_continue(config: &Config, id: &str, progress: ProgressMode) -> Result<()> {
    let store = open_store(config).await?;
    let manager = open_manager(config, store, http_collaborator(config)?, progress).await?;
    let session = manager.continue_session(id).await?;
    report(&session)
}

/// `cforge resume <id>`: re-enter an interrupted session at its stored state.
pub async fn run_resume(config: &Config, id: &str, progress: ProgressMode) -> Result<()> {
    let store = open_store(config).await?;
    let manager = open_manager(config, store, http_collaborator(config)?, progress).await?;
    let session = manager.resume(id).await?;
    report(&session)
}

/// `cforge status [id]`: one session in detail, or a listing.
pub async fn run_status(config: &Config, id: Option<&str>) -> Result<()> {
    let store = open_store(config).await?;
    let manager = open_manager(config, store, Arc::new(Unconfigured), ProgressMode::Off).await?;

    if let Some(id) = id {
        let session = manager.status(id).await?;
        println!("Session:  {}", session.session_id);
        println!("Course:   {}", session.course_name);
        println!("State:    {}", session.state);
        println!("Strategy: {} (score {:.2})", session.strategy, session.complexity_score);
        println!(
            "Progress: {} / {} chunks (retries on current: {}, re-chunks: {})",
            session.current_chunk_index,
            session.chunks.len(),
            session.retry_count_for_current_chunk,
            session.rechunk_count
        );
        println!("Created:  {}", session.created_at.to_rfc3339());
        println!("Updated:  {}", session.updated_at.to_rfc3339());
        if let Some(course_id) = &session.course_structure.course_id {
            println!("Backend course: {}", course_id);
            for unit in &session.course_structure.units {
                println!(
                    "    {:>3}. {} [{}]{}",
                    unit.position,
                    unit.name,
                    unit.unit_id,
                    if unit.attached { "" } else { "  (pending)" }
                );
            }
        }
        if let Some(failure) = &session.failure {
            println!("Failure:  {}", failure);
            if let Some(summary) = &failure.chunk_summary {
                println!("Chunk:    {}", summary);
            }
        }
        return Ok(());
    }

    let sessions = manager.list().await?;
    if sessions.is_empty() {
        println!("No sessions.");
        return Ok(());
    }
    println!(
        "{:<36}  {:<24}  {:<20}  {:>9}  COURSE",
        "ID", "STATE", "STRATEGY", "PROGRESS"
    );
    for s in sessions {
        let state = match s.failure_kind {
            Some(kind) => format!("{} ({})", s.state, kind),
            None => s.state.to_string(),
        };
        println!(
            "{:<36}  {:<24}  {:<20}  {:>4} / {:<2}  {}",
            s.session_id, state, s.strategy.as_str(), s.current_chunk_index, s.total_chunks, s.course_name
        );
    }
    Ok(())
}

/// `cforge cancel <id>`: mark a session failed with a cancellation reason.
pub async fn run_cancel(config: &Config, id: &str, reason: &str) -> Result<()> {
    let store = open_store(config).await?;
    let manager = open_manager(config, store, Arc::new(Unconfigured), ProgressMode::Off).await?;
    let session = manager.cancel(id, reason).await?;
    match &session.failure {
        Some(failure) if session.state == SessionState::Failed => {
            println!("Session {} is {} ({}).", session.session_id, session.state, failure.kind)
        }
        _ => println!("Session {} is {}.", session.session_id, session.state),
    }
    Ok(())
}

/// `cforge limits [--reset]`: show or clear the learned limits.
pub async fn run_limits(config: &Config, reset: bool) -> Result<()> {
    let store = open_store(config).await?;
    if reset {
        let removed = store.reset_limits().await?;
        info!(removed, "adaptive limits reset");
        println!("Adaptive limits reset to configured initial values.");
    }

    let (limits, source) = match store.load_limits().await? {
        Some(l) => (l, "learned"),
        None => (config.limits.initial(), "initial"),
    };
    let policy = &config.limits.policy;
    println!("Adaptive limits ({})", source);
    println!("  max_chunk_chars:     {}", limits.max_chunk_chars);
    println!("  max_items_per_chunk: {}", limits.max_items_per_chunk);
    println!("  success_streak:      {}", limits.success_streak);
    println!("  failure_streak:      {}", limits.failure_streak);
    println!(
        "  bounds:              {}..={} chars, {}..={} items",
        policy.floor_chars, policy.ceiling_chars, policy.min_items, policy.max_items
    );
    Ok(())
}

/// `cforge purge`: delete terminal sessions past the retention window.
pub async fn run_purge(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let manager = open_manager(config, store, Arc::new(Unconfigured), ProgressMode::Off).await?;
    let retention = chrono::Duration::days(i64::from(config.sessions.retention_days));
    let removed = manager.purge_terminal(retention).await?;
    println!(
        "Purged {} terminal session(s) older than {} days.",
        removed, config.sessions.retention_days
    );
    Ok(())
}
