use std::time::Duration;
use tokio::{sync::Mutex, time::Instant};

#[derive(Debug)]
struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

/// Token bucket: `rate` requests per second with a burst of `rate`.
///
/// One limiter guards one RPC endpoint; callers await [`acquire`] before every
/// request.
///
/// [`acquire`]: RateLimiter::acquire
#[derive(Debug)]
pub struct RateLimiter {
    capacity: u32,
    interval: Duration,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn per_second(rate: u32) -> Self {
        let rate = rate.max(1);
        Self {
            capacity: rate,
            interval: Duration::from_secs(1) / rate,
            bucket: Mutex::new(Bucket {
                tokens: rate,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        let earned = (elapsed.as_nanos() / self.interval.as_nanos().max(1)) as u32;
        if earned == 0 {
            return;
        }
        if bucket.tokens.saturating_add(earned) >= self.capacity {
            bucket.tokens = self.capacity;
            bucket.last_refill = now;
        } else {
            bucket.tokens += earned;
            bucket.last_refill += self.interval * earned;
        }
    }

    /// Take a token if one is available right now
    pub async fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket, Instant::now());
        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Wait until a token is available and take it
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                self.refill(&mut bucket, now);
                if bucket.tokens > 0 {
                    bucket.tokens -= 1;
                    return;
                }
                (bucket.last_refill + self.interval).saturating_duration_since(now)
            };
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_burst_is_bounded_by_rate() {
        let limiter = RateLimiter::per_second(5);
        for _ in 0..5 {
            assert!(limiter.try_acquire().await);
        }
        assert!(!limiter.try_acquire().await);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_refill() {
        let started = std::time::Instant::now();
        let limiter = RateLimiter::per_second(20);
        for _ in 0..21 {
            limiter.acquire().await;
        }
        // the 21st token is earned 50ms after creation
        assert!(started.elapsed() >= Duration::from_millis(50));
    }
}
