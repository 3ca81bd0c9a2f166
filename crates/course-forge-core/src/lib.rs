//! # Course Forge Core
//!
//! The adaptive transcript-to-course pipeline: parsing, complexity
//! analysis, strategy-driven chunking, learned size limits, and the
//! resumable session state machine that submits chunks to a course
//! backend.
//!
//! This crate contains no tokio, sqlx, HTTP client, or filesystem I/O.
//! The backend, the session store and the clock are all traits
//! ([`collaborator::Collaborator`], [`store::SessionStore`],
//! [`retry::Clock`]) supplied by the embedding application.

pub mod analyzer;
pub mod chunk;
pub mod collaborator;
pub mod engine;
pub mod error;
pub mod limits;
pub mod manager;
pub mod models;
pub mod parser;
pub mod retry;
pub mod session;
pub mod store;
