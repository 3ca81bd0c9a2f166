//! TOML configuration.
//!
//! Every section except `[db]` is optional and falls back to defaults.
//! `[collaborator]` is only required by commands that talk to the backend.
//!
//! ```toml
//! [db]
//! path = "./data/cforge.sqlite"
//!
//! [limits]
//! initial_max_chunk_chars = 8000
//! floor_chars = 500
//! grow_after = 5
//!
//! [retry]
//! max_retries = 3
//! base_delay_ms = 2000
//!
//! [collaborator]
//! base_url = "https://lms.example.com/api"
//! token_env = "CFORGE_API_TOKEN"
//!
//! [sessions]
//! retention_days = 30
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use course_forge_core::analyzer::AnalyzerConfig;
use course_forge_core::engine::EngineConfig;
use course_forge_core::limits::{AdaptiveLimits, LimitsPolicy};
use course_forge_core::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub collaborator: Option<CollaboratorConfig>,
    #[serde(default)]
    pub sessions: SessionsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    /// Starting ceiling when no learned record is persisted yet.
    #[serde(default = "default_initial_max_chunk_chars")]
    pub initial_max_chunk_chars: usize,
    #[serde(default = "default_initial_max_items")]
    pub initial_max_items_per_chunk: usize,
    #[serde(flatten)]
    pub policy: LimitsPolicy,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            initial_max_chunk_chars: default_initial_max_chunk_chars(),
            initial_max_items_per_chunk: default_initial_max_items(),
            policy: LimitsPolicy::default(),
        }
    }
}

impl LimitsConfig {
    pub fn initial(&self) -> AdaptiveLimits {
        AdaptiveLimits {
            max_chunk_chars: self.initial_max_chunk_chars,
            max_items_per_chunk: self.initial_max_items_per_chunk,
            success_streak: 0,
            failure_streak: 0,
        }
    }
}

fn default_initial_max_chunk_chars() -> usize {
    AdaptiveLimits::default().max_chunk_chars
}
fn default_initial_max_items() -> usize {
    AdaptiveLimits::default().max_items_per_chunk
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollaboratorConfig {
    pub base_url: String,
    /// Environment variable holding the bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// Transport-level timeout for each HTTP request.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_token_env() -> String {
    "CFORGE_API_TOKEN".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

impl CollaboratorConfig {
    /// Read the bearer token from the configured environment variable.
    pub fn token(&self) -> Option<String> {
        std::env::var(&self.token_env).ok().filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionsConfig {
    /// Terminal sessions older than this are removed by `cforge purge`.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

fn default_retention_days() -> u32 {
    30
}

impl Config {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            analyzer: self.analyzer.clone(),
            retry: self.retry.clone(),
        }
    }

    /// The `[collaborator]` section, or an error naming what is missing.
    pub fn collaborator(&self) -> Result<&CollaboratorConfig> {
        self.collaborator
            .as_ref()
            .context("No [collaborator] section in config; add base_url to submit courses")
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    config.limits.policy.validate()?;
    config.analyzer.validate()?;

    let policy = &config.limits.policy;
    if !(policy.floor_chars..=policy.ceiling_chars).contains(&config.limits.initial_max_chunk_chars) {
        anyhow::bail!(
            "limits.initial_max_chunk_chars must be within [{}, {}]",
            policy.floor_chars,
            policy.ceiling_chars
        );
    }

    if config.retry.multiplier < 1.0 {
        anyhow::bail!("retry.multiplier must be >= 1.0");
    }
    if config.retry.max_delay_ms < config.retry.base_delay_ms {
        anyhow::bail!("retry.max_delay_ms must be >= retry.base_delay_ms");
    }
    if config.retry.call_timeout_ms == 0 {
        anyhow::bail!("retry.call_timeout_ms must be > 0");
    }

    if let Some(collab) = &config.collaborator {
        if !(collab.base_url.starts_with("http://") || collab.base_url.starts_with("https://")) {
            anyhow::bail!(
                "collaborator.base_url must start with http:// or https://, got '{}'",
                collab.base_url
            );
        }
        if collab.timeout_secs == 0 {
            anyhow::bail!("collaborator.timeout_secs must be > 0");
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let f = write_config("[db]\npath = \"./data/x.sqlite\"\n");
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.limits.initial_max_chunk_chars, 8000);
        assert_eq!(config.limits.policy.grow_after, 5);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.sessions.retention_days, 30);
        assert!(config.collaborator.is_none());
        assert!(config.collaborator().is_err());
    }

    #[test]
    fn test_sections_override_defaults() {
        let f = write_config(
            r#"
[db]
path = "x.sqlite"

[limits]
initial_max_chunk_chars = 2000
floor_chars = 300
shrink_factor = 0.25

[analyzer]
section_ceiling = 10

[retry]
max_retries = 5
base_delay_ms = 100

[collaborator]
base_url = "http://localhost:9000"
"#,
        );
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.limits.initial().max_chunk_chars, 2000);
        assert_eq!(config.limits.policy.floor_chars, 300);
        assert_eq!(config.limits.policy.shrink_factor, 0.25);
        assert_eq!(config.analyzer.section_ceiling, 10);
        assert_eq!(config.retry.max_retries, 5);
        let collab = config.collaborator().unwrap();
        assert_eq!(collab.token_env, "CFORGE_API_TOKEN");
        assert_eq!(collab.timeout_secs, 30);
    }

    #[test]
    fn test_rejects_initial_outside_bounds() {
        let f = write_config("[db]\npath = \"x\"\n[limits]\ninitial_max_chunk_chars = 10\n");
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_rejects_bad_base_url() {
        let f = write_config("[db]\npath = \"x\"\n[collaborator]\nbase_url = \"lms.example.com\"\n");
        let err = load_config(f.path()).unwrap_err();
        assert!(err.to_string().contains("base_url"));
    }
}
