//! Retry policy and clock abstraction for the submission path.
//!
//! # Retry Strategy
//!
//! - At most `max_retries` submissions per chunk (default 3)
//! - Exponential backoff: 2s -> 4s -> 8s, capped at 60s
//! - A server-suggested `Retry-After` wins when it is longer than the backoff
//!
//! All waiting goes through a [`Clock`], so the session engine can be driven
//! by [`ManualClock`] in tests without real sleeps.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Either, FutureExt};
use serde::{Deserialize, Serialize};

use crate::collaborator::CollaboratorError;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Failed submissions tolerated per chunk before giving up (default: 3)
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds (default: 2000)
    pub base_delay_ms: u64,
    /// Backoff multiplier (default: 2.0)
    pub multiplier: f64,
    /// Maximum delay in milliseconds (default: 60000)
    pub max_delay_ms: u64,
    /// Upper bound for a single collaborator call in milliseconds (default: 30000)
    pub call_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 2_000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
            call_timeout_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    ///
    /// `retry_after` from a rate-limit response is honoured when it is
    /// longer than the computed backoff. The result never exceeds
    /// `max_delay_ms`.
    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = retry.saturating_sub(1).min(30) as i32;
        let backoff_ms = self.base_delay_ms as f64 * self.multiplier.powi(exponent);
        let backoff = Duration::from_millis(backoff_ms.min(self.max_delay_ms as f64) as u64);
        let wait = match retry_after {
            Some(hint) => backoff.max(hint),
            None => backoff,
        };
        wait.min(Duration::from_millis(self.max_delay_ms))
    }

    /// Whether a chunk that has failed `retry_count` times may be retried.
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Source of time for the session engine.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);

    /// A future that completes after `duration`. Raced against collaborator calls.
    fn timer(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Run `call`, failing with [`CollaboratorError::Timeout`] if `clock`'s timer
/// fires first.
pub async fn with_timeout<T, F>(clock: &dyn Clock, limit: Duration, call: F) -> Result<T, CollaboratorError>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    let call = std::pin::pin!(call);
    match futures::future::select(call, clock.timer(limit)).await {
        Either::Left((result, _)) => result,
        Either::Right(((), _)) => Err(CollaboratorError::Timeout(limit)),
    }
}

/// Deterministic clock for tests.
///
/// `sleep` returns immediately and advances `now()` by the requested amount.
/// Timers never fire unless built with [`ManualClock::expiring_timers`].
#[derive(Debug)]
pub struct ManualClock {
    start: DateTime<Utc>,
    sleeps: Mutex<Vec<Duration>>,
    timers_fire: bool,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default(),
            sleeps: Mutex::new(Vec::new()),
            timers_fire: false,
        }
    }

    /// Every timer completes immediately, so any call that is not already
    /// ready times out.
    pub fn expiring_timers() -> Self {
        Self {
            timers_fire: true,
            ..Self::new()
        }
    }

    /// Durations passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let slept: Duration = self.sleeps().iter().sum();
        self.start + chrono::Duration::from_std(slept).unwrap_or_default()
    }

    async fn sleep(&self, duration: Duration) {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
    }

    fn timer(&self, _duration: Duration) -> BoxFuture<'static, ()> {
        if self.timers_fire {
            futures::future::ready(()).boxed()
        } else {
            futures::future::pending().boxed()
        }
    }
}
