//! Complexity analysis and strategy selection.
//!
//! The score is a weighted sum of three factors, each clamped to `0.0..=1.0`:
//!
//! | Factor | Definition |
//! |--------|-----------|
//! | size   | `total_chars / (max_chunk_chars × size_saturation)` |
//! | count  | `items / section_ceiling` |
//! | code   | `code_items / (code_items + topic_items)` |
//!
//! The strategy follows from the score via [`AnalyzerConfig`] thresholds. Any
//! prior failure recorded for the same transcript forces
//! [`ProcessingStrategy::AdaptiveRetry`]. Everything here is a pure function
//! of its inputs.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::limits::AdaptiveLimits;
use crate::models::{ChatTranscript, ProcessingStrategy};

/// Weights and thresholds for [`analyze`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub size_weight: f64,
    pub count_weight: f64,
    pub code_weight: f64,
    /// Multiple of `max_chunk_chars` at which the size factor saturates.
    pub size_saturation: f64,
    /// Item count at which the count factor saturates.
    pub section_ceiling: usize,
    pub single_pass_below: f64,
    pub intelligent_below: f64,
    /// Scores up to and including this value select `ProgressiveBuild`.
    pub progressive_up_to: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            size_weight: 0.5,
            count_weight: 0.3,
            code_weight: 0.2,
            size_saturation: 4.0,
            section_ceiling: 20,
            single_pass_below: 0.3,
            intelligent_below: 0.6,
            progressive_up_to: 0.8,
        }
    }
}

impl AnalyzerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.size_weight < 0.0 || self.count_weight < 0.0 || self.code_weight < 0.0 {
            bail!("analyzer weights must be non-negative");
        }
        if self.size_weight + self.count_weight + self.code_weight <= 0.0 {
            bail!("analyzer weights must not all be zero");
        }
        if self.size_saturation <= 0.0 {
            bail!("analyzer.size_saturation must be > 0");
        }
        if self.section_ceiling == 0 {
            bail!("analyzer.section_ceiling must be > 0");
        }
        let t = [self.single_pass_below, self.intelligent_below, self.progressive_up_to];
        if !(0.0 < t[0] && t[0] < t[1] && t[1] < t[2] && t[2] <= 1.0) {
            bail!(
                "analyzer thresholds must strictly increase within (0, 1], got {:?}",
                t
            );
        }
        Ok(())
    }

    /// Map a score to a strategy. Ignores failure history.
    pub fn strategy_for(&self, score: f64) -> ProcessingStrategy {
        if score < self.single_pass_below {
            ProcessingStrategy::SinglePass
        } else if score < self.intelligent_below {
            ProcessingStrategy::IntelligentChunk
        } else if score <= self.progressive_up_to {
            ProcessingStrategy::ProgressiveBuild
        } else {
            ProcessingStrategy::AdaptiveRetry
        }
    }
}

/// Result of [`analyze`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityReport {
    pub score: f64,
    pub strategy: ProcessingStrategy,
    pub size_factor: f64,
    pub count_factor: f64,
    pub code_factor: f64,
    pub prior_failures: u64,
}

/// Score a transcript against a limits snapshot and pick a strategy.
pub fn analyze(
    transcript: &ChatTranscript,
    limits: &AdaptiveLimits,
    prior_failures: u64,
    config: &AnalyzerConfig,
) -> ComplexityReport {
    let stats = &transcript.stats;
    let capacity = limits.max_chunk_chars.max(1) as f64 * config.size_saturation;
    let size_factor = clamp_unit(stats.total_chars as f64 / capacity);
    let count_factor =
        clamp_unit(transcript.items.len() as f64 / config.section_ceiling.max(1) as f64);
    let typed = stats.code_items + stats.topic_items;
    let code_factor = if typed == 0 {
        0.0
    } else {
        stats.code_items as f64 / typed as f64
    };

    let weight_sum = config.size_weight + config.count_weight + config.code_weight;
    let raw = config.size_weight * size_factor
        + config.count_weight * count_factor
        + config.code_weight * code_factor;
    let score = clamp_unit(raw / weight_sum.max(1.0));

    let strategy = if prior_failures > 0 {
        ProcessingStrategy::AdaptiveRetry
    } else {
        config.strategy_for(score)
    };

    ComplexityReport {
        score,
        strategy,
        size_factor,
        count_factor,
        code_factor,
        prior_failures,
    }
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}
