//! Adaptive limits: learned chunk-size ceilings.
//!
//! [`AdaptiveLimits`] is the process-wide record the analyzer and chunker
//! read at session start and on every re-chunk. It is only mutated through
//! a [`LimitsStore`] handle, which serializes writers and clamps every
//! update into the [`LimitsPolicy`] bounds.
//!
//! # Update rules
//!
//! - **Size failure**: `max_chunk_chars = min(current, rejected) × shrink_factor`,
//!   never below `floor_chars`. Once the char floor is reached, further size
//!   failures halve `max_items_per_chunk` instead.
//! - **Other transient failure**: only the streak counters move.
//! - **Success**: after `grow_after` consecutive successes the char ceiling
//!   grows by `grow_factor` (capped at `ceiling_chars`) and the streak resets.

use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Learned limits, persisted as a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptiveLimits {
    pub max_chunk_chars: usize,
    pub max_items_per_chunk: usize,
    pub success_streak: u32,
    pub failure_streak: u32,
}

impl Default for AdaptiveLimits {
    fn default() -> Self {
        Self {
            max_chunk_chars: 8_000,
            max_items_per_chunk: 40,
            success_streak: 0,
            failure_streak: 0,
        }
    }
}

/// Bounds and step sizes for limit updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsPolicy {
    pub floor_chars: usize,
    pub ceiling_chars: usize,
    pub min_items: usize,
    pub max_items: usize,
    pub shrink_factor: f64,
    pub grow_factor: f64,
    /// Consecutive successes required before growing.
    pub grow_after: u32,
}

impl Default for LimitsPolicy {
    fn default() -> Self {
        Self {
            floor_chars: 500,
            ceiling_chars: 100_000,
            min_items: 1,
            max_items: 200,
            shrink_factor: 0.5,
            grow_factor: 1.25,
            grow_after: 5,
        }
    }
}

impl LimitsPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.floor_chars == 0 || self.floor_chars > self.ceiling_chars {
            bail!(
                "limits: floor_chars ({}) must be > 0 and <= ceiling_chars ({})",
                self.floor_chars,
                self.ceiling_chars
            );
        }
        if self.min_items == 0 || self.min_items > self.max_items {
            bail!(
                "limits: min_items ({}) must be > 0 and <= max_items ({})",
                self.min_items,
                self.max_items
            );
        }
        if !(self.shrink_factor > 0.0 && self.shrink_factor < 1.0) {
            bail!("limits.shrink_factor must be in (0, 1), got {}", self.shrink_factor);
        }
        if self.grow_factor <= 1.0 {
            bail!("limits.grow_factor must be > 1, got {}", self.grow_factor);
        }
        if self.grow_after == 0 {
            bail!("limits.grow_after must be > 0");
        }
        Ok(())
    }

    pub fn clamp(&self, limits: AdaptiveLimits) -> AdaptiveLimits {
        AdaptiveLimits {
            max_chunk_chars: limits
                .max_chunk_chars
                .clamp(self.floor_chars, self.ceiling_chars),
            max_items_per_chunk: limits
                .max_items_per_chunk
                .clamp(self.min_items, self.max_items),
            ..limits
        }
    }

    pub fn after_success(&self, current: AdaptiveLimits) -> AdaptiveLimits {
        let mut next = AdaptiveLimits {
            success_streak: current.success_streak.saturating_add(1),
            failure_streak: 0,
            ..current
        };
        if next.success_streak >= self.grow_after {
            let grown = (next.max_chunk_chars as f64 * self.grow_factor).ceil() as usize;
            next.max_chunk_chars = grown;
            next.success_streak = 0;
        }
        self.clamp(next)
    }

    pub fn after_size_failure(&self, current: AdaptiveLimits, rejected_chars: usize) -> AdaptiveLimits {
        let mut next = AdaptiveLimits {
            success_streak: 0,
            failure_streak: current.failure_streak.saturating_add(1),
            ..current
        };
        if current.max_chunk_chars <= self.floor_chars {
            next.max_items_per_chunk = current.max_items_per_chunk / 2;
        } else {
            let basis = current.max_chunk_chars.min(rejected_chars.max(1));
            next.max_chunk_chars = (basis as f64 * self.shrink_factor).floor() as usize;
        }
        self.clamp(next)
    }

    pub fn after_transient_failure(&self, current: AdaptiveLimits) -> AdaptiveLimits {
        self.clamp(AdaptiveLimits {
            success_streak: 0,
            failure_streak: current.failure_streak.saturating_add(1),
            ..current
        })
    }
}

/// Shared handle to the process-wide limits.
///
/// Cloning is cheap; all clones see the same state. Each update is a
/// read-modify-write under one lock, so concurrent sessions cannot push the
/// limits outside the policy bounds.
#[derive(Debug, Clone)]
pub struct LimitsStore {
    state: Arc<Mutex<AdaptiveLimits>>,
    policy: Arc<LimitsPolicy>,
}

impl LimitsStore {
    pub fn new(policy: LimitsPolicy, initial: AdaptiveLimits) -> Self {
        let initial = policy.clamp(initial);
        Self {
            state: Arc::new(Mutex::new(initial)),
            policy: Arc::new(policy),
        }
    }

    pub fn policy(&self) -> &LimitsPolicy {
        &self.policy
    }

    pub fn snapshot(&self) -> AdaptiveLimits {
        *self.lock()
    }

    pub fn record_success(&self) -> AdaptiveLimits {
        self.update(|policy, current| policy.after_success(current))
    }

    pub fn record_size_failure(&self, rejected_chars: usize) -> AdaptiveLimits {
        self.update(|policy, current| policy.after_size_failure(current, rejected_chars))
    }

    pub fn record_transient_failure(&self) -> AdaptiveLimits {
        self.update(|policy, current| policy.after_transient_failure(current))
    }

    /// Overwrite the limits, e.g. with a persisted record. Still clamped.
    pub fn replace(&self, limits: AdaptiveLimits) -> AdaptiveLimits {
        self.update(|policy, _| policy.clamp(limits))
    }

    fn update(&self, f: impl FnOnce(&LimitsPolicy, AdaptiveLimits) -> AdaptiveLimits) -> AdaptiveLimits {
        let mut guard = self.lock();
        let next = f(&self.policy, *guard);
        *guard = next;
        tracing::debug!(
            max_chunk_chars = next.max_chunk_chars,
            max_items_per_chunk = next.max_items_per_chunk,
            success_streak = next.success_streak,
            failure_streak = next.failure_streak,
            "adaptive limits updated"
        );
        next
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AdaptiveLimits> {
        // Updates are a single assignment, so a poisoned value is still whole.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
