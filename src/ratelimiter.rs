/*
* File: src/ratelimiter.rs
*
* The default rate limiter shared by both work queues: per-key
* exponential backoff (base 5ms, cap ~1s) combined with a per-second
* token bucket that caps total retry throughput across all keys. This
* mirrors client-go's `DefaultControllerRateLimiter`, which composes an
* `ItemExponentialFailureRateLimiter` with a `BucketRateLimiter` and
* takes the max of the two delays — see
* `original_source/gitops/internal/controller/controller.go`'s use of
* `workqueue.DefaultControllerRateLimiter()`.
*
* SPDX-License-Identifier: Apache-2.0
*/

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Duration;

pub trait RateLimiter<K> {
    /// How long to wait before the key becomes eligible again.
    fn when(&self, key: &K) -> Duration;
    /// Clear the key's failure history (called after a successful pass).
    fn forget(&self, key: &K);
}

/// Doubles the delay on every requeue of the same key, capped at
/// `max_delay`.
pub struct ExponentialFailureRateLimiter {
    base_delay: Duration,
    max_delay: Duration,
    failures: Mutex<HashMap<String, u32>>,
}

impl ExponentialFailureRateLimiter {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            failures: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: ToString> RateLimiter<K> for ExponentialFailureRateLimiter {
    fn when(&self, key: &K) -> Duration {
        let k = key.to_string();
        let mut failures = self.failures.lock().unwrap();
        let count = failures.entry(k).or_insert(0);
        let exp = *count;
        *count += 1;

        let backoff = self
            .base_delay
            .checked_mul(1u32.checked_shl(exp).unwrap_or(u32::MAX))
            .unwrap_or(self.max_delay);
        backoff.min(self.max_delay)
    }

    fn forget(&self, key: &K) {
        self.failures.lock().unwrap().remove(&key.to_string());
    }
}

/// A simple per-second token bucket: `qps` tokens refill per second, up
/// to `burst` tokens banked. Each `when` call draws one token; if none
/// are available it reports how long the caller must wait for the next
/// one instead of blocking.
pub struct BucketRateLimiter {
    qps: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: std::time::Instant,
}

impl BucketRateLimiter {
    pub fn new(qps: f64, burst: u32) -> Self {
        Self {
            qps,
            burst: burst as f64,
            state: Mutex::new(BucketState {
                tokens: burst as f64,
                last_refill: std::time::Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = std::time::Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.qps).min(self.burst);
        state.last_refill = now;
    }
}

impl<K> RateLimiter<K> for BucketRateLimiter {
    fn when(&self, _key: &K) -> Duration {
        let mut state = self.state.lock().unwrap();
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Duration::ZERO
        } else {
            let deficit = 1.0 - state.tokens;
            state.tokens = 0.0;
            Duration::from_secs_f64(deficit / self.qps)
        }
    }

    fn forget(&self, _key: &K) {}
}

/// Takes the max delay of its two component limiters — the controller's
/// default policy.
pub struct DefaultControllerRateLimiter {
    exponential: ExponentialFailureRateLimiter,
    bucket: BucketRateLimiter,
}

impl DefaultControllerRateLimiter {
    pub fn new() -> Self {
        Self {
            exponential: ExponentialFailureRateLimiter::new(
                Duration::from_millis(5),
                Duration::from_secs(1),
            ),
            bucket: BucketRateLimiter::new(1000.0, 1000),
        }
    }
}

impl Default for DefaultControllerRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: ToString + Eq + Hash> RateLimiter<K> for DefaultControllerRateLimiter {
    fn when(&self, key: &K) -> Duration {
        let a = RateLimiter::<K>::when(&self.exponential, key);
        let b = RateLimiter::<K>::when(&self.bucket, key);
        a.max(b)
    }

    fn forget(&self, key: &K) {
        RateLimiter::<K>::forget(&self.exponential, key);
        RateLimiter::<K>::forget(&self.bucket, key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let rl = ExponentialFailureRateLimiter::new(Duration::from_millis(5), Duration::from_secs(1));
        let key = "default/app-one".to_string();
        assert_eq!(RateLimiter::when(&rl, &key), Duration::from_millis(5));
        assert_eq!(RateLimiter::when(&rl, &key), Duration::from_millis(10));
        assert_eq!(RateLimiter::when(&rl, &key), Duration::from_millis(20));
        for _ in 0..20 {
            RateLimiter::when(&rl, &key);
        }
        assert_eq!(RateLimiter::when(&rl, &key), Duration::from_secs(1));
    }

    #[test]
    fn forget_resets_backoff() {
        let rl = ExponentialFailureRateLimiter::new(Duration::from_millis(5), Duration::from_secs(1));
        let key = "default/app-one".to_string();
        RateLimiter::when(&rl, &key);
        RateLimiter::when(&rl, &key);
        RateLimiter::forget(&rl, &key);
        assert_eq!(RateLimiter::when(&rl, &key), Duration::from_millis(5));
    }

    #[test]
    fn bucket_allows_burst_then_throttles() {
        let rl = BucketRateLimiter::new(1.0, 2);
        let key = "k".to_string();
        assert_eq!(RateLimiter::when(&rl, &key), Duration::ZERO);
        assert_eq!(RateLimiter::when(&rl, &key), Duration::ZERO);
        assert!(RateLimiter::when(&rl, &key) > Duration::ZERO);
    }
}
