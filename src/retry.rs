//! Bounded polling with a fixed or growing pause between attempts.

use std::future::Future;
use std::time::Duration;

use log::debug;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    /// Doubles the interval after every miss, capped at `max`.
    Exponential { max: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(attempts: u32, interval: Duration) -> Self {
        Self {
            attempts,
            interval,
            backoff: Backoff::Fixed,
        }
    }

    pub fn exponential(attempts: u32, interval: Duration, max: Duration) -> Self {
        Self {
            attempts,
            interval,
            backoff: Backoff::Exponential { max },
        }
    }

    /// Pause taken after the given zero-based attempt failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.interval,
            Backoff::Exponential { max } => {
                let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
                self.interval.saturating_mul(factor).min(max)
            }
        }
    }

    /// Calls `f` until it yields `Some` or the attempt budget is spent.
    /// Sleeps only between attempts, never after the last one.
    pub async fn poll<T, F, Fut>(&self, mut f: F) -> Option<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        for attempt in 0..self.attempts {
            if let Some(v) = f(attempt).await {
                return Some(v);
            }
            if attempt + 1 < self.attempts {
                let delay = self.delay_after(attempt);
                debug!(
                    "Attempt {}/{} missed, retrying in {:?}",
                    attempt + 1,
                    self.attempts,
                    delay
                );
                sleep(delay).await;
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn stops_at_first_hit() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(20, Duration::from_millis(500));
        let start = Instant::now();
        let got = policy
            .poll(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { (attempt == 3).then_some(attempt) }
            })
            .await;
        assert_eq!(got, Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(start.elapsed(), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_budget_without_trailing_sleep() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(5, Duration::from_millis(100));
        let start = Instant::now();
        let got: Option<()> = policy
            .poll(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { None }
            })
            .await;
        assert!(got.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(start.elapsed(), Duration::from_millis(400));
    }

    #[test]
    fn exponential_delay_is_capped() {
        let policy =
            RetryPolicy::exponential(10, Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(policy.delay_after(0), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(400));
        assert_eq!(policy.delay_after(8), Duration::from_secs(1));
        assert_eq!(policy.delay_after(40), Duration::from_secs(1));
    }
}
