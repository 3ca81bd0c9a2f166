//! Wall-clock [`Clock`] backed by tokio timers.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;

use course_forge_core::retry::Clock;

pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn timer(&self, duration: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(duration).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use course_forge_core::collaborator::CollaboratorError;
    use course_forge_core::retry::with_timeout;

    #[tokio::test]
    async fn test_timer_beats_slow_call() {
        let clock = TokioClock;
        let slow = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, CollaboratorError>(1)
        };
        let result = with_timeout(&clock, Duration::from_millis(20), slow).await;
        assert_eq!(result, Err(CollaboratorError::Timeout(Duration::from_millis(20))));
    }

    #[tokio::test]
    async fn test_ready_call_wins() {
        let clock = TokioClock;
        let result = with_timeout(&clock, Duration::from_secs(5), async { Ok::<_, CollaboratorError>(7) }).await;
        assert_eq!(result, Ok(7));
    }
}
