//! Core data models shared by the pipeline stages.
//!
//! These types flow from the parser through the analyzer and chunker into
//! the session state machine, and are serialized verbatim into the
//! persisted session record. All of them derive `Serialize`/`Deserialize`
//! so a session can be reloaded after a restart.

use serde::{Deserialize, Serialize};

/// Kind of an atomic parsed unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Code,
    Topic,
}

/// An atomic unit of transcript content. Never split across chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub kind: ContentKind,
    pub title: String,
    pub body: String,
    /// Detected or hinted language. `None` for topics.
    pub language: Option<String>,
    pub word_count: usize,
    /// Byte offset of the item's first line in the raw transcript.
    pub origin_offset: usize,
}

/// Fixed per-item allowance for the JSON envelope around each item.
pub const ITEM_ENVELOPE_CHARS: usize = 32;

impl ContentItem {
    pub fn is_code(&self) -> bool {
        self.kind == ContentKind::Code
    }

    /// Estimated serialized size of this item in a collaborator request.
    pub fn serialized_chars(&self) -> usize {
        self.title.len()
            + self.body.len()
            + self.language.as_deref().map_or(0, str::len)
            + ITEM_ENVELOPE_CHARS
    }
}

/// Recoverable oddities seen while parsing. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParseWarning {
    /// A fence opened on `line` was never closed; the block runs to end of text.
    UnterminatedFence { line: usize },
    /// A fenced block on `line` had no content and was dropped.
    EmptyCodeBlock { line: usize },
    /// Fence markers were unusable; the whole text became one topic.
    MalformedFencing,
    /// Non-empty text produced no items; the whole text became one topic.
    NoStructure,
}

/// Transcript-level counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptStats {
    pub total_chars: usize,
    pub code_items: usize,
    pub topic_items: usize,
    /// Paragraphs folded into the preceding topic's body.
    pub merged_paragraphs: usize,
    /// Paragraphs that matched no heuristic and had no topic to join.
    pub skipped_paragraphs: usize,
}

/// Parsed transcript: ordered items plus metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatTranscript {
    pub items: Vec<ContentItem>,
    pub stats: TranscriptStats,
    /// SHA-256 hex digest of the raw text.
    pub fingerprint: String,
    #[serde(default)]
    pub warnings: Vec<ParseWarning>,
}

impl ChatTranscript {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

/// Chunking and submission policy for a session.
///
/// Ordered from least to most conservative. A session's strategy can only
/// move forward through this order (see [`ProcessingStrategy::escalate`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStrategy {
    SinglePass,
    IntelligentChunk,
    ProgressiveBuild,
    AdaptiveRetry,
}

impl ProcessingStrategy {
    /// The next, more conservative strategy. Saturates at `AdaptiveRetry`.
    pub fn escalate(self) -> Self {
        match self {
            Self::SinglePass => Self::IntelligentChunk,
            Self::IntelligentChunk => Self::ProgressiveBuild,
            Self::ProgressiveBuild | Self::AdaptiveRetry => Self::AdaptiveRetry,
        }
    }

    /// Incremental strategies pause for an explicit continue between chunks.
    pub fn is_incremental(self) -> bool {
        matches!(self, Self::ProgressiveBuild | Self::AdaptiveRetry)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SinglePass => "single_pass",
            Self::IntelligentChunk => "intelligent_chunk",
            Self::ProgressiveBuild => "progressive_build",
            Self::AdaptiveRetry => "adaptive_retry",
        }
    }
}

impl std::fmt::Display for ProcessingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A contiguous run of transcript items sized for one collaborator request.
///
/// Items are referenced by their half-open index range `start..end` into
/// [`ChatTranscript::items`], never copied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub start: usize,
    pub end: usize,
    pub estimated_chars: usize,
    /// A single item larger than the active ceiling.
    pub oversized: bool,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn items<'a>(&self, items: &'a [ContentItem]) -> &'a [ContentItem] {
        &items[self.start..self.end]
    }
}

/// A structural unit created on the backend for one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseUnit {
    pub unit_id: String,
    /// 1-based position within the course.
    pub position: usize,
    pub name: String,
    pub start: usize,
    pub end: usize,
    pub content_chars: usize,
    /// Content was attached successfully.
    pub attached: bool,
}

/// The course as built so far. Grows monotonically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseStructure {
    pub course_id: Option<String>,
    pub units: Vec<CourseUnit>,
}

impl CourseStructure {
    pub fn unit_at(&self, position: usize) -> Option<&CourseUnit> {
        self.units.iter().find(|u| u.position == position)
    }

    pub fn unit_at_mut(&mut self, position: usize) -> Option<&mut CourseUnit> {
        self.units.iter_mut().find(|u| u.position == position)
    }

    pub fn attached_units(&self) -> usize {
        self.units.iter().filter(|u| u.attached).count()
    }
}

/// Payload handed to [`Collaborator::attach_content`](crate::collaborator::Collaborator::attach_content).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitContent {
    pub items: Vec<ContentItem>,
    pub estimated_chars: usize,
    pub oversized: bool,
}

impl UnitContent {
    pub fn from_chunk(chunk: &Chunk, items: &[ContentItem]) -> Self {
        Self {
            items: chunk.items(items).to_vec(),
            estimated_chars: chunk.estimated_chars,
            oversized: chunk.oversized,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalate_is_monotonic_and_saturates() {
        let mut s = ProcessingStrategy::SinglePass;
        let mut seen = vec![s];
        for _ in 0..5 {
            let next = s.escalate();
            assert!(next >= s);
            s = next;
            seen.push(s);
        }
        assert_eq!(s, ProcessingStrategy::AdaptiveRetry);
        assert_eq!(seen[3], ProcessingStrategy::AdaptiveRetry);
    }

    #[test]
    fn test_incremental_strategies() {
        assert!(!ProcessingStrategy::SinglePass.is_incremental());
        assert!(!ProcessingStrategy::IntelligentChunk.is_incremental());
        assert!(ProcessingStrategy::ProgressiveBuild.is_incremental());
        assert!(ProcessingStrategy::AdaptiveRetry.is_incremental());
    }

    #[test]
    fn test_strategy_serializes_snake_case() {
        let json = serde_json::to_string(&ProcessingStrategy::IntelligentChunk).unwrap();
        assert_eq!(json, "\"intelligent_chunk\"");
    }
}
