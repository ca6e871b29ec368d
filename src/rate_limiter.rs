// rate_limiter.rs - Sliding-window request pacing
// Purpose: Keep all workers under a requests-per-minute budget, shared by every
//          run against the same target
//
// The window holds the timestamps of recent requests. When it grows past the
// budget the caller is held for 60 / rpm seconds. This is a fixed per-call
// delay, not a token bucket: bursts up to the budget pass immediately and
// every request beyond it is paced one interval apart.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tracing::debug;

const WINDOW: Duration = Duration::from_secs(60);

pub struct RateLimiter {
    requests_per_minute: u32,
    window: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// `requests_per_minute = 0` disables limiting
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            requests_per_minute,
            window: Mutex::new(VecDeque::new()),
        }
    }

    pub fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute
    }

    pub fn is_unbounded(&self) -> bool {
        self.requests_per_minute == 0
    }

    /// Delay applied to a request that exceeds the budget
    pub fn pacing_delay(&self) -> Duration {
        if self.is_unbounded() {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(60.0 / f64::from(self.requests_per_minute))
        }
    }

    /// Wait until one more request fits the budget. The lock is held across the
    /// delay so excess callers are released one interval apart.
    pub async fn acquire(&self) {
        if self.is_unbounded() {
            return;
        }

        let mut window = self.window.lock().await;
        let now = Instant::now();
        window.push_back(now);

        while let Some(&oldest) = window.front() {
            if now.duration_since(oldest) > WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() > self.requests_per_minute as usize {
            let delay = self.pacing_delay();
            debug!(
                in_window = window.len(),
                limit = self.requests_per_minute,
                delay_ms = delay.as_millis() as u64,
                "Rate limit reached, pacing request"
            );
            sleep(delay).await;
        }
    }

    /// Requests currently counted in the trailing window
    pub async fn in_window(&self) -> usize {
        let window = self.window.lock().await;
        let now = Instant::now();
        window
            .iter()
            .filter(|&&t| now.duration_since(t) <= WINDOW)
            .count()
    }
}

/// Limiters by (target origin, rpm). Lives as long as its owner, so
/// concurrent and later runs against one target draw on the same window.
#[derive(Default)]
pub struct RateLimiterPool {
    limiters: Mutex<HashMap<(String, u32), Arc<RateLimiter>>>,
}

impl RateLimiterPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn limiter_for(&self, origin: &str, requests_per_minute: u32) -> Arc<RateLimiter> {
        let mut limiters = self.limiters.lock().await;
        let limiter = limiters
            .entry((origin.to_string(), requests_per_minute))
            .or_insert_with(|| {
                debug!(origin, rpm = requests_per_minute, "New rate limiter");
                Arc::new(RateLimiter::new(requests_per_minute))
            });
        Arc::clone(limiter)
    }

    pub async fn len(&self) -> usize {
        self.limiters.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_never_delays() {
        let limiter = RateLimiter::new(0);
        let start = Instant::now();

        for _ in 0..500 {
            limiter.acquire().await;
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.in_window().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_within_budget_pass_immediately() {
        let limiter = RateLimiter::new(5);
        let start = Instant::now();

        for _ in 0..5 {
            limiter.acquire().await;
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.in_window().await, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_over_budget_is_delayed() {
        let limiter = RateLimiter::new(2);
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expires_after_a_minute() {
        let limiter = RateLimiter::new(1);

        limiter.acquire().await;
        tokio::time::advance(Duration::from_secs(61)).await;

        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_are_paced_sequentially() {
        let limiter = Arc::new(RateLimiter::new(60));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..63 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move { limiter.acquire().await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // 60 fit the budget, the remaining 3 wait one second each
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert_eq!(limiter.pacing_delay(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_pool_shares_limiter_per_origin_and_rate() {
        let pool = RateLimiterPool::new();

        let a = pool.limiter_for("https://app.example.com", 10).await;
        let b = pool.limiter_for("https://app.example.com", 10).await;
        let other_rate = pool.limiter_for("https://app.example.com", 20).await;
        let other_origin = pool.limiter_for("https://sso.example.com", 10).await;

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &other_rate));
        assert!(!Arc::ptr_eq(&a, &other_origin));
        assert_eq!(pool.len().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pooled_limiter_paces_across_holders() {
        let pool = RateLimiterPool::new();
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..2 {
            let limiter = pool.limiter_for("https://app.example.com", 1).await;
            handles.push(tokio::spawn(async move { limiter.acquire().await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(start.elapsed() >= Duration::from_secs(60));
    }
}
