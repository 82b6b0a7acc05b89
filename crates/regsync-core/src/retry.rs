//! Retry policy and cancellation-aware backoff driver.
//!
//! Backoff behavior is a value (initial delay, multiplier, ceiling, reset
//! threshold) rather than logic baked into each loop, so the pending syncer
//! and any future retrying caller share one implementation.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Exponential backoff parameters.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// First delay after a failure.
    pub initial: Duration,
    /// Delay multiplier per consecutive failure.
    pub multiplier: u32,
    /// Delay never exceeds this.
    pub ceiling: Duration,
    /// A success streak longer than this resets the delay to `initial`.
    pub reset_after: Duration,
}

impl Default for RetryPolicy {
    /// The subscription policy: 5s doubling to a 1-minute ceiling, reset
    /// after a minute of health.
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(5),
            multiplier: 2,
            ceiling: Duration::from_secs(60),
            reset_after: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: *self,
            current: self.initial,
        }
    }
}

/// Mutable backoff state for one retrying loop.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    current: Duration,
}

impl Backoff {
    /// The delay to wait before the next attempt; doubles (capped) for the
    /// attempt after that.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * self.policy.multiplier).min(self.policy.ceiling);
        delay
    }

    /// Record that an attempt succeeded at `started` and ran until now.
    /// A streak longer than the reset threshold restores the initial delay.
    pub fn on_success(&mut self, started: Instant) {
        if started.elapsed() > self.policy.reset_after {
            self.current = self.policy.initial;
        }
    }

    /// Sleep for the next backoff delay, or return `false` immediately if
    /// `cancel` fires first.
    pub async fn wait(&mut self, cancel: &CancellationToken) -> bool {
        let delay = self.next_delay();
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

/// Drive `op` until it succeeds or `cancel` fires, backing off between
/// failures per `policy`. Returns `None` on cancellation.
pub async fn retry_until<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Option<T>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut backoff = policy.backoff();
    loop {
        if cancel.is_cancelled() {
            return None;
        }
        match op().await {
            Ok(value) => return Some(value),
            Err(err) => {
                tracing::warn!(error = %err, "operation failed, backing off");
                if !backoff.wait(cancel).await {
                    return None;
                }
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            initial: Duration::from_millis(1),
            multiplier: 2,
            ceiling: Duration::from_millis(8),
            reset_after: Duration::from_millis(50),
        }
    }

    #[test]
    fn backoff_doubles_to_ceiling() {
        let mut b = fast_policy().backoff();
        assert_eq!(b.next_delay(), Duration::from_millis(1));
        assert_eq!(b.next_delay(), Duration::from_millis(2));
        assert_eq!(b.next_delay(), Duration::from_millis(4));
        assert_eq!(b.next_delay(), Duration::from_millis(8));
        assert_eq!(b.next_delay(), Duration::from_millis(8)); // capped
    }

    #[tokio::test(start_paused = true)]
    async fn success_streak_resets_delay() {
        let mut b = fast_policy().backoff();
        b.next_delay();
        b.next_delay();
        assert_eq!(b.next_delay(), Duration::from_millis(4));

        // Short streak — no reset.
        let started = Instant::now();
        tokio::time::advance(Duration::from_millis(10)).await;
        b.on_success(started);
        assert_eq!(b.next_delay(), Duration::from_millis(8));

        // Long streak — reset to initial.
        let started = Instant::now();
        tokio::time::advance(Duration::from_millis(60)).await;
        b.on_success(started);
        assert_eq!(b.next_delay(), Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_until_succeeds_after_failures() {
        let attempts = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result = retry_until(&fast_policy(), &cancel, || {
            let n = attempts.fetch_add(1, Ordering::Relaxed);
            async move {
                if n < 3 {
                    Err("transient")
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result, Some(3));
        assert_eq!(attempts.load(Ordering::Relaxed), 4);
    }

    #[tokio::test]
    async fn retry_until_observes_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Option<u32> =
            retry_until(&fast_policy(), &cancel, || async { Err::<u32, _>("nope") }).await;
        assert!(result.is_none());
    }
}
