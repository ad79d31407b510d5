//! Token bucket guarding a single origin.
//!
//! Tokens accrue continuously at `rate` per second up to `burst`. Every
//! acquisition reserves one token inside the bucket's lock, so the balance can
//! go negative: a negative balance is a queue of reservations that mature in
//! arrival order. Callers sleep outside the lock until their reservation is due.

use super::RateConfig;
use crate::error::FetchError;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl BucketState {
    fn refill(&mut self, now: Instant, rate: f64, burst: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(burst);
        self.last_refill = now;
    }
}

#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Creates a full bucket. `config` is expected to be validated already.
    pub fn new(config: RateConfig) -> Self {
        let burst = f64::from(config.burst);
        Self {
            rate: config.requests_per_second,
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn burst(&self) -> u32 {
        self.burst as u32
    }

    /// Tokens currently available, after accrual. Negative while reservations
    /// are outstanding.
    pub fn available(&self) -> f64 {
        let mut state = self.lock();
        state.refill(Instant::now(), self.rate, self.burst);
        state.tokens
    }

    /// Takes a token only if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.lock();
        state.refill(Instant::now(), self.rate, self.burst);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Waits for a permit, or returns `FetchError::Cancelled` if `cancel` fires
    /// first. A cancelled waiter hands its reservation back.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let ready_at = self.reserve();
        if ready_at <= Instant::now() {
            return Ok(());
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                self.release();
                Err(FetchError::Cancelled)
            }
            _ = sleep_until(ready_at) => Ok(()),
        }
    }

    /// Time until a fresh reservation would be granted.
    pub fn time_until_available(&self) -> Duration {
        let tokens = self.available();
        if tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - tokens) / self.rate)
        }
    }

    fn reserve(&self) -> Instant {
        let mut state = self.lock();
        let now = Instant::now();
        state.refill(now, self.rate, self.burst);
        state.tokens -= 1.0;
        if state.tokens >= 0.0 {
            now
        } else {
            now + Duration::from_secs_f64(-state.tokens / self.rate)
        }
    }

    fn release(&self) {
        let mut state = self.lock();
        state.refill(Instant::now(), self.rate, self.burst);
        state.tokens = (state.tokens + 1.0).min(self.burst);
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        // State is two plain numbers, a panic mid-update cannot leave it torn.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn bucket(rate: f64, burst: u32) -> TokenBucket {
        TokenBucket::new(RateConfig::new(rate, burst))
    }

    #[tokio::test]
    async fn test_burst_is_granted_immediately() {
        let bucket = bucket(1.0, 5);
        let cancel = CancellationToken::new();
        let start = std::time::Instant::now();

        for _ in 0..5 {
            bucket.acquire(&cancel).await.unwrap();
        }

        assert!(start.elapsed() < Duration::from_millis(100));
        assert!(!bucket.try_acquire());
    }

    #[tokio::test]
    async fn test_waits_after_burst_exhausted() {
        let bucket = bucket(10.0, 2);
        let cancel = CancellationToken::new();
        let start = std::time::Instant::now();

        for _ in 0..6 {
            bucket.acquire(&cancel).await.unwrap();
        }

        // (6 - 2) / 10 = 400ms lower bound
        assert!(start.elapsed() >= Duration::from_millis(390));
    }

    #[tokio::test]
    async fn test_concurrent_acquirers_do_not_overdraw() {
        let bucket = Arc::new(bucket(20.0, 5));
        let cancel = CancellationToken::new();
        let start = std::time::Instant::now();

        let mut handles = Vec::new();
        for _ in 0..15 {
            let bucket = bucket.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                bucket.acquire(&cancel).await.unwrap();
                start.elapsed()
            }));
        }

        let mut grants = Vec::new();
        for handle in handles {
            grants.push(handle.await.unwrap());
        }
        grants.sort();

        let early = grants
            .iter()
            .filter(|t| **t < Duration::from_millis(40))
            .count();
        assert!(early <= 5, "{} permits granted before refill", early);
        // (15 - 5) / 20 = 500ms
        assert!(grants[14] >= Duration::from_millis(490));
    }

    #[tokio::test]
    async fn test_cancel_unblocks_waiter() {
        let bucket = Arc::new(bucket(0.1, 1));
        let cancel = CancellationToken::new();
        bucket.acquire(&cancel).await.unwrap();

        let waiter = {
            let bucket = bucket.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { bucket.acquire(&cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should return promptly")
            .unwrap();
        assert_eq!(result, Err(FetchError::Cancelled));
    }

    #[tokio::test]
    async fn test_cancelled_token_fails_fast() {
        let bucket = bucket(1.0, 1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(bucket.acquire(&cancel).await, Err(FetchError::Cancelled));
        // nothing was reserved
        assert!(bucket.try_acquire());
    }

    #[test]
    fn test_tokens_never_exceed_burst() {
        let bucket = bucket(1000.0, 3);
        std::thread::sleep(Duration::from_millis(20));
        assert!(bucket.available() <= 3.0);
        assert_eq!(bucket.time_until_available(), Duration::ZERO);
    }

    #[test]
    fn test_time_until_available_after_drain() {
        let bucket = bucket(2.0, 1);
        assert!(bucket.try_acquire());
        let wait = bucket.time_until_available();
        assert!(wait > Duration::from_millis(400));
        assert!(wait <= Duration::from_millis(500));
    }
}
