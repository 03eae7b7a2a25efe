//! Token-bucket rate limiting
//!
//! Sits in front of the account service: handlers consult the limiter
//! before calling in, and copy the resulting status into
//! `X-RateLimit-*` response headers.

use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use chrono::{DateTime, Utc};
use dashmap::DashMap;

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

/// Which operation a request counts against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateScope {
    Register,
    Challenge,
    Verify,
    Profile,
    Delete,
}

/// `capacity` requests per `window`, refilled continuously
#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub capacity: u32,
    pub window: Duration,
}

impl RateLimit {
    pub const fn new(capacity: u32, window: Duration) -> Self {
        Self { capacity, window }
    }

    fn refill_per_sec(&self) -> f64 {
        self.capacity as f64 / self.window.as_secs_f64().max(1.0)
    }
}

/// Per-scope limits
#[derive(Debug, Clone)]
pub struct RateLimits {
    pub register: RateLimit,
    pub challenge: RateLimit,
    pub verify: RateLimit,
    pub profile: RateLimit,
    pub delete: RateLimit,
}

impl RateLimits {
    pub fn for_scope(&self, scope: RateScope) -> RateLimit {
        match scope {
            RateScope::Register => self.register,
            RateScope::Challenge => self.challenge,
            RateScope::Verify => self.verify,
            RateScope::Profile => self.profile,
            RateScope::Delete => self.delete,
        }
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        const HOUR: Duration = Duration::from_secs(3600);
        Self {
            register: RateLimit::new(5, HOUR),
            challenge: RateLimit::new(20, HOUR),
            verify: RateLimit::new(20, HOUR),
            profile: RateLimit::new(100, Duration::from_secs(60)),
            delete: RateLimit::new(1, Duration::from_secs(86400)),
        }
    }
}

/// Outcome of a limiter check, rendered into response headers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub limit: u32,
    pub remaining: u32,
    /// Unix time at which the bucket is full again
    pub reset_at: i64,
    pub retry_after_secs: u64,
}

impl RateLimitStatus {
    pub fn write_headers(&self, headers: &mut HeaderMap) {
        let pairs = [
            (X_RATELIMIT_LIMIT, self.limit.to_string()),
            (X_RATELIMIT_REMAINING, self.remaining.to_string()),
            (X_RATELIMIT_RESET, self.reset_at.to_string()),
        ];
        for (name, value) in pairs {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(HeaderName::from_static(name), value);
            }
        }
    }

    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        self.write_headers(&mut headers);
        headers
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    updated: DateTime<Utc>,
}

/// Token buckets keyed by scope and caller (address or client IP)
pub struct RateLimiter {
    limits: RateLimits,
    buckets: DashMap<(RateScope, String), Bucket>,
}

impl RateLimiter {
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            buckets: DashMap::new(),
        }
    }

    /// Take one token. `Err` carries the status to report with the 429.
    pub fn check(&self, scope: RateScope, key: &str) -> Result<RateLimitStatus, RateLimitStatus> {
        self.check_at(scope, key, Utc::now())
    }

    pub fn check_at(
        &self,
        scope: RateScope,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<RateLimitStatus, RateLimitStatus> {
        let limit = self.limits.for_scope(scope);
        let capacity = limit.capacity as f64;
        let rate = limit.refill_per_sec();

        let mut bucket = self
            .buckets
            .entry((scope, key.to_string()))
            .or_insert_with(|| Bucket {
                tokens: capacity,
                updated: now,
            });

        let elapsed = (now - bucket.updated).num_milliseconds().max(0) as f64 / 1000.0;
        bucket.tokens = (bucket.tokens + elapsed * rate).min(capacity);
        bucket.updated = now;

        let allowed = bucket.tokens >= 1.0;
        if allowed {
            bucket.tokens -= 1.0;
        }

        let until_full = ((capacity - bucket.tokens) / rate).ceil() as i64;
        let retry_after_secs = if allowed {
            0
        } else {
            ((1.0 - bucket.tokens) / rate).ceil().max(1.0) as u64
        };

        let status = RateLimitStatus {
            limit: limit.capacity,
            remaining: bucket.tokens.floor().max(0.0) as u32,
            reset_at: now.timestamp() + until_full,
            retry_after_secs,
        };

        if allowed {
            Ok(status)
        } else {
            Err(status)
        }
    }

    /// Drop buckets that have refilled completely; they are
    /// indistinguishable from fresh ones.
    pub fn purge_idle(&self, now: DateTime<Utc>) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|(scope, _), bucket| {
            let limit = self.limits.for_scope(*scope);
            let elapsed = (now - bucket.updated).num_seconds().max(0) as f64;
            bucket.tokens + elapsed * limit.refill_per_sec() < limit.capacity as f64
        });
        before - self.buckets.len()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
