// pixelguard/src/engine/throttle.rs
//
// Analysis throttling. Ingestion is never throttled; only the expensive
// analysis pass is skipped, and the caller falls back to the cached result.
//
// Two gates, checked in this order:
//   per-actor:  minimum gap between analyses of one actor, shrinking as the
//               actor's current score climbs (suspects get re-checked faster)
//   global:     token bucket of max_analyses_per_second, refilled
//               continuously (fractional) and capped at the bucket size

use parking_lot::Mutex;

use crate::config::{LimitsConfig, ScoringConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    Analyze,
    /// Per-actor interval not yet elapsed.
    Throttled,
    /// Global bucket empty.
    RateLimited,
}

impl ThrottleDecision {
    pub fn flag(self) -> Option<&'static str> {
        match self {
            ThrottleDecision::Analyze     => None,
            ThrottleDecision::Throttled   => Some("THROTTLED"),
            ThrottleDecision::RateLimited => Some("RATE_LIMITED"),
        }
    }
}

/// Per-actor re-analysis interval for the given current score.
pub fn adaptive_interval(current_score: f64, limits: &LimitsConfig, scoring: &ScoringConfig) -> i64 {
    let base = limits.analysis_throttle_ms.max(0);
    if current_score >= scoring.high_threshold {
        base / 4
    } else if current_score >= scoring.medium_threshold {
        base / 2
    } else {
        base
    }
}

#[derive(Debug)]
struct Bucket {
    tokens:      f64,
    capacity:    f64,
    last_refill: Option<i64>,
}

#[derive(Debug)]
pub struct TokenBucket {
    inner: Mutex<Bucket>,
}

impl TokenBucket {
    pub fn new(per_second: f64) -> Self {
        let capacity = per_second.max(0.0);
        Self { inner: Mutex::new(Bucket { tokens: capacity, capacity, last_refill: None }) }
    }

    /// Take one token if available. A capacity change (config update) takes
    /// effect here; the current balance is clamped to the new size.
    pub fn try_acquire(&self, per_second: f64, now_ms: i64) -> bool {
        let mut b = self.inner.lock();
        let capacity = per_second.max(0.0);
        if capacity != b.capacity {
            b.capacity = capacity;
            b.tokens = b.tokens.min(capacity);
        }
        if let Some(last) = b.last_refill {
            let elapsed = (now_ms - last).max(0) as f64 / 1_000.0;
            b.tokens = (b.tokens + elapsed * capacity).min(capacity);
        }
        b.last_refill = Some(now_ms);

        if b.tokens >= 1.0 {
            b.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub fn available(&self) -> f64 {
        self.inner.lock().tokens
    }
}

/// Decide whether an actor gets a fresh analysis at `now_ms`.
/// A granted analysis consumes one bucket token; a throttled one does not.
pub fn check(
    bucket:           &TokenBucket,
    last_analysis_at: Option<i64>,
    current_score:    f64,
    now_ms:           i64,
    limits:           &LimitsConfig,
    scoring:          &ScoringConfig,
) -> ThrottleDecision {
    if let Some(last) = last_analysis_at {
        if now_ms - last < adaptive_interval(current_score, limits, scoring) {
            return ThrottleDecision::Throttled;
        }
    }
    if !bucket.try_acquire(limits.max_analyses_per_second, now_ms) {
        return ThrottleDecision::RateLimited;
    }
    ThrottleDecision::Analyze
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_shrinks_with_score() {
        let limits = LimitsConfig::default();
        let scoring = ScoringConfig::default();
        assert_eq!(adaptive_interval(10.0, &limits, &scoring), 1_000);
        assert_eq!(adaptive_interval(55.0, &limits, &scoring), 500);
        assert_eq!(adaptive_interval(90.0, &limits, &scoring), 250);
    }

    #[test]
    fn bucket_drains_and_refills_fractionally() {
        let bucket = TokenBucket::new(2.0);
        assert!(bucket.try_acquire(2.0, 0));
        assert!(bucket.try_acquire(2.0, 0));
        assert!(!bucket.try_acquire(2.0, 0));
        // 250 ms at 2/s refills half a token: still not enough
        assert!(!bucket.try_acquire(2.0, 250));
        assert!(bucket.try_acquire(2.0, 500));
    }

    #[test]
    fn refill_is_capped() {
        let bucket = TokenBucket::new(3.0);
        assert!(bucket.try_acquire(3.0, 0));
        assert!(bucket.try_acquire(3.0, 60_000));
        assert!(bucket.available() <= 2.0 + f64::EPSILON);
    }

    #[test]
    fn throttle_precedes_rate_limit() {
        let limits = LimitsConfig { max_analyses_per_second: 1.0, ..LimitsConfig::default() };
        let scoring = ScoringConfig::default();
        let bucket = TokenBucket::new(1.0);

        assert_eq!(check(&bucket, None, 0.0, 0, &limits, &scoring), ThrottleDecision::Analyze);
        assert_eq!(check(&bucket, Some(0), 0.0, 100, &limits, &scoring), ThrottleDecision::Throttled);
        // another actor, bucket still empty
        assert_eq!(check(&bucket, None, 0.0, 100, &limits, &scoring), ThrottleDecision::RateLimited);
        assert_eq!(check(&bucket, Some(0), 0.0, 1_200, &limits, &scoring), ThrottleDecision::Analyze);
    }
}
