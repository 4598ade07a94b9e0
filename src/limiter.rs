use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

/// Token bucket refilled continuously at the configured ceiling.
#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(per_second: u32) -> Self {
        let ceiling = per_second.max(1) as f64;
        Self {
            capacity: ceiling,
            // Start drained; a fresh run must not burst past the first window.
            tokens: 0.0,
            refill_per_sec: ceiling,
            last_refill: Instant::now(),
        }
    }

    fn try_take(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        let refill = elapsed * self.refill_per_sec;
        self.tokens = (self.tokens + refill).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Time until one full token has accrued, assuming no contention.
    fn next_token_in(&self) -> Duration {
        let deficit = (1.0 - self.tokens).max(0.0);
        Duration::from_secs_f64(deficit / self.refill_per_sec + 0.001)
    }

    fn snapshot(&self) -> RateLimiterStats {
        let age = Instant::now().duration_since(self.last_refill).as_millis() as u64;
        RateLimiterStats {
            capacity: self.capacity,
            tokens: self.tokens,
            refill_per_sec: self.refill_per_sec,
            last_refill_age_ms: age,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimiterStats {
    pub capacity: f64,
    pub tokens: f64,
    pub refill_per_sec: f64,
    pub last_refill_age_ms: u64,
}

/// Caps completed sends at the configured ceiling per rolling second.
///
/// Shared by all workers of one run; every send goes through [`acquire`],
/// never around it.
///
/// [`acquire`]: RateLimiter::acquire
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<TokenBucket>,
}

impl RateLimiter {
    pub fn new(per_second: u32) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket::new(per_second)),
        }
    }

    /// Suspends the caller until a send slot is available. Never fails.
    ///
    /// Only the caller's task is suspended; the underlying thread keeps
    /// driving other workers.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                if bucket.try_take() {
                    return;
                }
                bucket.next_token_in()
            };
            sleep(wait).await;
        }
    }

    pub async fn stats(&self) -> RateLimiterStats {
        self.bucket.lock().await.snapshot()
    }
}
