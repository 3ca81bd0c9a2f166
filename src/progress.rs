//! Build progress reporting.
//!
//! Renders engine [`SessionEvent`]s while `cforge build`, `continue` and
//! `resume` run. Progress is emitted on **stderr** so stdout remains
//! parseable for scripts.

use std::io::{IsTerminal, Write};

use course_forge_core::engine::{SessionEvent, SessionObserver};

/// Human-friendly progress on stderr: "build 3f2a…  unit 2 / 5 attached".
pub struct TextProgress;

impl SessionObserver for TextProgress {
    fn on_event(&self, event: &SessionEvent) {
        let line = match event {
            SessionEvent::Transition { session_id, from, to } => {
                format!("build {}  {} -> {}\n", short_id(session_id), from, to)
            }
            SessionEvent::Planned {
                session_id,
                strategy,
                score,
                items,
                chunks,
            } => format!(
                "build {}  planned  {} items in {} chunks ({}, score {:.2})\n",
                short_id(session_id),
                format_number(*items as u64),
                format_number(*chunks as u64),
                strategy,
                score
            ),
            SessionEvent::ChunkSubmitted {
                session_id,
                chunk_index,
                total_chunks,
                ..
            } => format!(
                "build {}  unit {} / {} attached\n",
                short_id(session_id),
                chunk_index + 1,
                total_chunks
            ),
            SessionEvent::RetryScheduled {
                session_id,
                chunk_index,
                retry,
                delay_ms,
                error,
            } => format!(
                "build {}  chunk {} retry {} in {} ms: {}\n",
                short_id(session_id),
                chunk_index + 1,
                retry,
                format_number(*delay_ms),
                error
            ),
            SessionEvent::Rechunked {
                session_id,
                from_chunk,
                total_chunks,
                strategy,
                max_chunk_chars,
            } => format!(
                "build {}  re-chunked from {} into {} chunks ({}, max {} chars)\n",
                short_id(session_id),
                from_chunk + 1,
                total_chunks,
                strategy,
                format_number(*max_chunk_chars as u64)
            ),
            SessionEvent::Failed {
                session_id,
                kind,
                message,
            } => format!("build {}  failed ({}): {}\n", short_id(session_id), kind, message),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SessionObserver for JsonProgress {
    fn on_event(&self, event: &SessionEvent) {
        if let Ok(line) = serde_json::to_string(event) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Text,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if std::io::stderr().is_terminal() {
            ProgressMode::Text
        } else {
            ProgressMode::Off
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(Self::Off),
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    /// Build an observer for this mode, or `None` when progress is off.
    pub fn observer(&self) -> Option<std::sync::Arc<dyn SessionObserver>> {
        match self {
            ProgressMode::Off => None,
            ProgressMode::Text => Some(std::sync::Arc::new(TextProgress)),
            ProgressMode::Json => Some(std::sync::Arc::new(JsonProgress)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn short_id_handles_short_input() {
        assert_eq!(short_id("abc"), "abc");
        assert_eq!(short_id("0123456789"), "01234567");
    }

    #[test]
    fn mode_parse() {
        assert_eq!(ProgressMode::parse("json"), Some(ProgressMode::Json));
        assert_eq!(ProgressMode::parse("text"), Some(ProgressMode::Text));
        assert_eq!(ProgressMode::parse("loud"), None);
        assert!(ProgressMode::Off.observer().is_none());
    }
}
