//! # Course Forge CLI (`cforge`)
//!
//! ## Usage
//!
//! ```bash
//! cforge --config ./config/cforge.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cforge init` | Create the SQLite database and run schema migrations |
//! | `cforge build <file>` | Parse a transcript and build a course from it |
//! | `cforge continue <id>` | Advance a session paused between chunks |
//! | `cforge resume <id>` | Re-enter an interrupted session at its stored state |
//! | `cforge status [id]` | Show one session or list all |
//! | `cforge cancel <id>` | Stop a session; created units are left in place |
//! | `cforge limits` | Show (or `--reset`) the learned chunk limits |
//! | `cforge purge` | Delete finished sessions past the retention window |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use course_forge::progress::ProgressMode;
use course_forge::{commands, config, migrate};

/// Course Forge CLI: turns chat transcripts into structured courses.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/cforge.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "cforge",
    about = "Course Forge: adaptive transcript-to-course builder",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cforge.toml")]
    config: PathBuf,

    /// Progress output on stderr: `off`, `text` or `json`.
    /// Defaults to `text` when stderr is a terminal.
    #[arg(long, global = true)]
    progress: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Build a course from a transcript file (`-` reads stdin).
    Build {
        file: PathBuf,

        /// Course name.
        #[arg(long)]
        name: String,

        /// Course description.
        #[arg(long, default_value = "")]
        description: String,

        /// Print the parse, analysis and chunk plan without contacting the backend.
        #[arg(long)]
        dry_run: bool,
    },

    /// Advance a session waiting for continuation.
    Continue { id: String },

    /// Resume an interrupted session from its persisted state.
    Resume { id: String },

    /// Show a session, or list all sessions.
    Status { id: Option<String> },

    /// Cancel a session.
    Cancel {
        id: String,

        #[arg(long, default_value = "cancelled by user")]
        reason: String,
    },

    /// Show the adaptive chunk limits.
    Limits {
        /// Forget learned limits and start again from config.
        #[arg(long)]
        reset: bool,
    },

    /// Delete completed and failed sessions older than `sessions.retention_days`.
    Purge,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let progress = match cli.progress.as_deref() {
        Some(mode) => ProgressMode::parse(mode)
            .ok_or_else(|| anyhow::anyhow!("Unknown progress mode '{}'. Use off, text or json", mode))?,
        None => ProgressMode::default_for_tty(),
    };

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Build {
            file,
            name,
            description,
            dry_run,
        } => {
            commands::run_build(&cfg, &file, &name, &description, dry_run, progress).await?;
        }
        Commands::Continue { id } => {
            commands::run_continue(&cfg, &id, progress).await?;
        }
        Commands::Resume { id } => {
            commands::run_resume(&cfg, &id, progress).await?;
        }
        Commands::Status { id } => {
            commands::run_status(&cfg, id.as_deref()).await?;
        }
        Commands::Cancel { id, reason } => {
            commands::run_cancel(&cfg, &id, &reason).await?;
        }
        Commands::Limits { reset } => {
            commands::run_limits(&cfg, reset).await?;
        }
        Commands::Purge => {
            commands::run_purge(&cfg).await?;
        }
    }

    Ok(())
}
