//! Token-bucket rate limiting for named keys.
//!
//! Each key owns a bucket holding up to `rate` tokens (burst equals the
//! rate) that refills continuously at `rate` per window. Time comes from
//! the injected clock so refill arithmetic is testable.

use conductor_core::Clock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

/// A rate limit expressed as `N/unit`, e.g. `10/minute`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Requests admitted per window (also the burst size).
    pub rate: u32,
    /// Window length in seconds.
    pub window_seconds: u32,
}

impl RateLimit {
    /// Creates a limit of `rate` per `window_seconds`.
    #[must_use]
    pub fn new(rate: u32, window_seconds: u32) -> Self {
        Self {
            rate,
            window_seconds,
        }
    }

    fn tokens_per_second(&self) -> f64 {
        f64::from(self.rate) / f64::from(self.window_seconds)
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.window_seconds {
            1 => "second",
            60 => "minute",
            3600 => "hour",
            other => return write!(f, "{}/{}s", self.rate, other),
        };
        write!(f, "{}/{}", self.rate, unit)
    }
}

impl FromStr for RateLimit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (rate_text, unit) = s
            .split_once('/')
            .ok_or_else(|| format!("rate limit must be N/unit: '{s}'"))?;
        let rate: u32 = rate_text
            .parse()
            .map_err(|_| format!("invalid rate '{rate_text}'"))?;
        if rate == 0 {
            return Err("rate must be at least 1".to_string());
        }
        let window_seconds = match unit {
            "second" => 1,
            "minute" => 60,
            "hour" => 3600,
            other => return Err(format!("unknown rate unit '{other}'")),
        };
        Ok(Self {
            rate,
            window_seconds,
        })
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq)]
pub enum RateLimitDecision {
    /// Request is admitted.
    Allowed {
        /// Whole tokens left in the bucket.
        remaining: u32,
    },
    /// Bucket is empty.
    Limited {
        /// Seconds until a token is available, rounded up.
        retry_after_secs: u64,
    },
}

impl RateLimitDecision {
    /// Returns true if the request was admitted.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: chrono::DateTime<chrono::Utc>,
}

/// A token-bucket rate limiter keyed by name.
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    /// Creates a limiter using the given clock.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Attempts to take one token from `key`'s bucket under `limit`.
    pub fn try_acquire(&self, key: &str, limit: RateLimit) -> RateLimitDecision {
        let now = self.clock.now();
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: f64::from(limit.rate),
            last_refill: now,
        });

        let elapsed = (now - bucket.last_refill)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        bucket.tokens =
            (bucket.tokens + elapsed * limit.tokens_per_second()).min(f64::from(limit.rate));
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            RateLimitDecision::Allowed {
                remaining: bucket.tokens.floor() as u32,
            }
        } else {
            let deficit = 1.0 - bucket.tokens;
            let wait = deficit / limit.tokens_per_second();
            RateLimitDecision::Limited {
                retry_after_secs: wait.ceil() as u64,
            }
        }
    }

    /// Drops the bucket for a key.
    pub fn reset(&self, key: &str) {
        self.buckets.lock().unwrap().remove(key);
    }
}
