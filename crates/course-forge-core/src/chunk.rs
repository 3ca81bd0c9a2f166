//! Strategy-driven chunker.
//!
//! Partitions a transcript's items into [`Chunk`]s that each fit one
//! collaborator request. Chunks reference items by index range, so the
//! concatenation of all chunk ranges is exactly `0..items.len()`, in order,
//! with no gaps or overlaps. Items are never split.
//!
//! # Strategies
//!
//! | Strategy | Packing |
//! |----------|---------|
//! | `SinglePass` | One chunk if everything fits, else greedy item packing |
//! | `IntelligentChunk` | Greedy packing of whole lesson groups |
//! | `ProgressiveBuild` | One lesson group per chunk |
//! | `AdaptiveRetry` | Greedy item packing against half the ceiling and half the item cap |
//!
//! A *lesson group* is a topic followed by the code items that illustrate
//! it. Groups larger than the budget fall back to item packing.
//!
//! An item larger than the active ceiling still gets a chunk of its own,
//! flagged `oversized`. The ceiling is a target, not a hard cap.
//!
//! # Example
//!
//! ```rust
//! use course_forge_core::chunk::chunk_items;
//! use course_forge_core::limits::AdaptiveLimits;
//! use course_forge_core::models::ProcessingStrategy;
//! use course_forge_core::parser::parse_transcript;
//!
//! let t = parse_transcript("# One\n\nfirst\n\n# Two\n\nsecond");
//! let chunks = chunk_items(&t.items, ProcessingStrategy::ProgressiveBuild, &AdaptiveLimits::default());
//! assert_eq!(chunks.len(), 2);
//! assert_eq!((chunks[1].start, chunks[1].end), (1, 2));
//! ```

use std::ops::Range;

use crate::limits::AdaptiveLimits;
use crate::models::{Chunk, ContentItem, ContentKind, ProcessingStrategy};

/// Packing bounds for one chunking pass.
#[derive(Debug, Clone, Copy)]
struct Budget {
    /// Size a chunk is packed up to.
    target_chars: usize,
    max_items: usize,
    /// Items above this are flagged oversized.
    ceiling_chars: usize,
}

impl Budget {
    fn from_limits(limits: &AdaptiveLimits) -> Self {
        Self {
            target_chars: limits.max_chunk_chars.max(1),
            max_items: limits.max_items_per_chunk.max(1),
            ceiling_chars: limits.max_chunk_chars.max(1),
        }
    }

    fn halved(self) -> Self {
        Self {
            target_chars: (self.target_chars / 2).max(1),
            max_items: (self.max_items / 2).max(1),
            ..self
        }
    }

    fn fits(&self, chars: usize, count: usize) -> bool {
        chars <= self.target_chars && count <= self.max_items
    }
}

/// Chunk every item under `strategy`.
pub fn chunk_items(items: &[ContentItem], strategy: ProcessingStrategy, limits: &AdaptiveLimits) -> Vec<Chunk> {
    chunk_from(items, 0, strategy, limits)
}

/// Chunk `items[start..]`. Chunk indices are numbered from zero.
pub fn chunk_from(
    items: &[ContentItem],
    start: usize,
    strategy: ProcessingStrategy,
    limits: &AdaptiveLimits,
) -> Vec<Chunk> {
    let start = start.min(items.len());
    let budget = Budget::from_limits(limits);
    let mut chunks = match strategy {
        ProcessingStrategy::SinglePass => single_pass(items, start, budget),
        ProcessingStrategy::IntelligentChunk => intelligent_chunk(items, start, budget),
        ProcessingStrategy::ProgressiveBuild => progressive_build(items, start, budget),
        ProcessingStrategy::AdaptiveRetry => adaptive_retry(items, start, budget),
    };
    renumber(&mut chunks, 0);
    chunks
}

/// Replace `chunks[from..]` with a fresh chunking of the items they covered.
///
/// Chunks before `from` (already submitted) are untouched. Returns the
/// number of chunks now following `from`.
pub fn rechunk_remaining(
    chunks: &mut Vec<Chunk>,
    from: usize,
    items: &[ContentItem],
    strategy: ProcessingStrategy,
    limits: &AdaptiveLimits,
) -> usize {
    let from = from.min(chunks.len());
    let first_item = chunks.get(from).map_or(items.len(), |c| c.start);
    chunks.truncate(from);
    let fresh = chunk_from(items, first_item, strategy, limits);
    let added = fresh.len();
    chunks.extend(fresh);
    renumber(chunks, from);
    added
}

/// Sum of serialized item sizes in `range`.
pub fn range_chars(items: &[ContentItem], range: Range<usize>) -> usize {
    items[range].iter().map(ContentItem::serialized_chars).sum()
}

fn single_pass(items: &[ContentItem], start: usize, budget: Budget) -> Vec<Chunk> {
    let all = start..items.len();
    if all.is_empty() {
        return Vec::new();
    }
    let total = range_chars(items, all.clone());
    if budget.fits(total, all.len()) {
        return vec![make_chunk(all, total, budget)];
    }
    pack_items(items, all, budget)
}

fn intelligent_chunk(items: &[ContentItem], start: usize, budget: Budget) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut current: Option<(Range<usize>, usize)> = None;

    for group in lesson_groups(items, start) {
        let group_chars = range_chars(items, group.clone());
        if !budget.fits(group_chars, group.len()) {
            if let Some((range, chars)) = current.take() {
                chunks.push(make_chunk(range, chars, budget));
            }
            chunks.extend(pack_items(items, group, budget));
            continue;
        }
        current = match current.take() {
            Some((range, chars))
                if budget.fits(chars + group_chars, range.len() + group.len()) =>
            {
                Some((range.start..group.end, chars + group_chars))
            }
            Some((range, chars)) => {
                chunks.push(make_chunk(range, chars, budget));
                Some((group, group_chars))
            }
            None => Some((group, group_chars)),
        };
    }
    if let Some((range, chars)) = current {
        chunks.push(make_chunk(range, chars, budget));
    }
    chunks
}

fn progressive_build(items: &[ContentItem], start: usize, budget: Budget) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for group in lesson_groups(items, start) {
        let chars = range_chars(items, group.clone());
        if budget.fits(chars, group.len()) {
            chunks.push(make_chunk(group, chars, budget));
        } else {
            chunks.extend(pack_items(items, group, budget));
        }
    }
    chunks
}

fn adaptive_retry(items: &[ContentItem], start: usize, budget: Budget) -> Vec<Chunk> {
    pack_items(items, start..items.len(), budget.halved())
}

/// Greedy item-level packing of `range`.
fn pack_items(items: &[ContentItem], range: Range<usize>, budget: Budget) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut span_start = range.start;
    let mut span_chars = 0;

    for i in range.clone() {
        let size = items[i].serialized_chars();
        let span_len = i - span_start;

        if size > budget.target_chars {
            if span_len > 0 {
                chunks.push(make_chunk(span_start..i, span_chars, budget));
            }
            chunks.push(make_chunk(i..i + 1, size, budget));
            span_start = i + 1;
            span_chars = 0;
            continue;
        }

        if span_len > 0 && !budget.fits(span_chars + size, span_len + 1) {
            chunks.push(make_chunk(span_start..i, span_chars, budget));
            span_start = i;
            span_chars = 0;
        }
        span_chars += size;
    }
    if span_start < range.end {
        chunks.push(make_chunk(span_start..range.end, span_chars, budget));
    }
    chunks
}

/// Split `items[start..]` into topic-led groups. Code before the first
/// topic forms its own group.
fn lesson_groups(items: &[ContentItem], start: usize) -> Vec<Range<usize>> {
    let mut groups = Vec::new();
    let mut group_start = start;
    for i in start..items.len() {
        if items[i].kind == ContentKind::Topic && i > group_start {
            groups.push(group_start..i);
            group_start = i;
        }
    }
    if group_start < items.len() {
        groups.push(group_start..items.len());
    }
    groups
}

fn make_chunk(range: Range<usize>, chars: usize, budget: Budget) -> Chunk {
    Chunk {
        index: 0,
        start: range.start,
        end: range.end,
        estimated_chars: chars,
        oversized: range.len() == 1 && chars > budget.ceiling_chars,
    }
}

fn renumber(chunks: &mut [Chunk], from: usize) {
    for (i, c) in chunks.iter_mut().enumerate().skip(from) {
        c.index = i;
    }
}
