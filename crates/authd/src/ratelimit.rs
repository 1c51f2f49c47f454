//! Per-peer token bucket.
//!
//! Each peer uid gets a bucket of `burst` tokens refilled over `window`;
//! an authentication attempt costs one token. Overruns answer
//! `rate_limited` without touching PAM.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default burst size.
pub const DEFAULT_BURST: u32 = 5;

/// Default refill window for a full burst.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(30);

struct Bucket {
    tokens: f64,
    refreshed: Instant,
}

/// Token-bucket limiter keyed by peer uid.
pub struct RateLimiter {
    buckets: Mutex<HashMap<u32, Bucket>>,
    burst: f64,
    refill_per_sec: f64,
}

impl RateLimiter {
    /// Builds a limiter with the given burst and refill window.
    #[must_use]
    pub fn new(burst: u32, window: Duration) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            burst: f64::from(burst),
            refill_per_sec: f64::from(burst) / window.as_secs_f64(),
        }
    }

    /// Builds the production limiter (5 auths per 30 s burst).
    #[must_use]
    pub fn default_policy() -> Self {
        Self::new(DEFAULT_BURST, DEFAULT_WINDOW)
    }

    /// Takes one token for `uid`, reporting whether the attempt may proceed.
    pub fn allow(&self, uid: u32) -> bool {
        self.allow_at(uid, Instant::now())
    }

    fn allow_at(&self, uid: u32, now: Instant) -> bool {
        let mut buckets = self.buckets.lock().unwrap_or_else(|poison| poison.into_inner());
        let bucket = buckets.entry(uid).or_insert(Bucket {
            tokens: self.burst,
            refreshed: now,
        });

        let elapsed = now.saturating_duration_since(bucket.refreshed).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.burst);
        bucket.refreshed = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
