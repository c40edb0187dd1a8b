use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{sleep_until, Instant};

/// Token-bucket gate for outbound geocoder calls: `rate_per_sec` tokens
/// accumulate continuously up to a cap of `burst`, and every permitted call
/// consumes one. The bucket starts full, so short bursts up to `burst` pass
/// immediately.
///
/// `wait` is cancel-safe: a token is only consumed at the moment the future
/// returns, so dropping it (losing a `select!` against a shutdown signal)
/// never leaks one.
pub struct RateLimiter {
    state: AsyncMutex<Bucket>,
    rate_per_sec: f64,
    burst: u32,
}

struct Bucket {
    tokens: f64,
    refreshed: Instant,
}

impl Bucket {
    fn refill(&mut self, rate_per_sec: f64, burst: u32) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.refreshed).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate_per_sec).min(f64::from(burst));
        self.refreshed = now;
    }
}

impl RateLimiter {
    pub fn new(rate_per_sec: f64, burst: u32) -> Self {
        let burst = burst.max(1);
        Self {
            state: AsyncMutex::new(Bucket {
                tokens: f64::from(burst),
                refreshed: Instant::now(),
            }),
            // Floor keeps the computed sleep representable as a Duration.
            rate_per_sec: rate_per_sec.max(0.001),
            burst,
        }
    }

    /// Blocks until a token is available, then consumes it.
    pub async fn wait(&self) {
        loop {
            let wakeup = {
                let mut bucket = self.state.lock().await;
                bucket.refill(self.rate_per_sec, self.burst);
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                let deficit = 1.0 - bucket.tokens;
                Instant::now() + Duration::from_secs_f64(deficit / self.rate_per_sec)
            };
            sleep_until(wakeup).await;
        }
    }
}
