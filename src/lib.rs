//! # Course Forge
//!
//! Turns long chat transcripts into structured courses on a course backend.
//!
//! Course Forge parses a transcript into code and topic items, scores its
//! complexity, picks a processing strategy, and submits the content in
//! chunks through a resumable session state machine. Size limits are
//! learned from backend rejections and persisted across runs.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌─────────────┐
//! │ Transcript │──▶│ Parse+Analyze│──▶│   Session   │
//! │   (file)   │   │    +Chunk    │   │   Engine    │
//! └────────────┘   └──────────────┘   └──────┬──────┘
//!                                            │
//!                      ┌─────────────────────┤
//!                      ▼                     ▼
//!                 ┌──────────┐         ┌──────────┐
//!                 │  SQLite  │         │   HTTP   │
//!                 │ sessions │         │ backend  │
//!                 └──────────┘         └──────────┘
//! ```
//!
//! The pipeline itself lives in the runtime-agnostic `course_forge_core`
//! crate. This crate supplies the SQLite store, the HTTP collaborator,
//! the tokio clock and the `cforge` CLI.
//!
//! ## Quick Start
//!
//! ```bash
//! cforge init                                      # create database
//! cforge build chat.md --name "Rust Async" --dry-run
//! cforge build chat.md --name "Rust Async"         # submit to the backend
//! cforge continue <session-id>                     # next chunk of a paused build
//! cforge status
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite session store |
//! | [`collaborator_http`] | REST course backend client |
//! | [`clock`] | Tokio-backed clock |
//! | [`progress`] | Build progress on stderr |
//! | [`commands`] | CLI command implementations |

pub mod clock;
pub mod collaborator_http;
pub mod commands;
pub mod config;
pub mod db;
pub mod migrate;
pub mod progress;
pub mod sqlite_store;
