use crate::shared::config::{RateLimitConfig, RateLimitRule};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// Expired buckets are swept once every this many admissions.
const EVICTION_STRIDE: u64 = 64;
/// Request rate above this is flagged for throttling, in requests per second.
const SUSPICIOUS_RATE_PER_SEC: f64 = 10.0;
/// Auth endpoints tolerate at most this many requests per window before a block flag.
const AUTH_BURST_LIMIT: u32 = 3;
/// Read-heavy endpoints exempt from the throttle heuristic.
const READ_HEAVY_PREFIXES: &[&str] = &["dashboard", "calendar"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub retry_after_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbuseAction {
    None,
    Throttle,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub suspicious: bool,
    pub action: AbuseAction,
}

struct Bucket {
    count: u32,
    window_start: DateTime<Utc>,
    window_ms: u64,
    max_requests: u32,
}

impl Bucket {
    fn fresh(now: DateTime<Utc>, rule: &RateLimitRule) -> Self {
        Self {
            count: 0,
            window_start: now,
            window_ms: rule.window_ms,
            max_requests: rule.max_requests,
        }
    }

    fn reset_at(&self) -> DateTime<Utc> {
        self.window_start + Duration::milliseconds(self.window_ms as i64)
    }

    fn expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.reset_at()
    }
}

/// Fixed-window admission control keyed by (endpoint pattern, identity).
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<(String, String), Bucket>>,
    admissions: AtomicU64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
            admissions: AtomicU64::new(0),
        }
    }

    pub async fn admit(&self, endpoint: &str, identity: &str) -> Admission {
        self.admit_at(endpoint, identity, Utc::now()).await
    }

    pub async fn classify(&self, endpoint: &str, identity: &str) -> Classification {
        self.classify_at(endpoint, identity, Utc::now()).await
    }

    /// Exact match first, then longest matching prefix, then the default rule.
    fn rule_for(&self, endpoint: &str) -> &RateLimitRule {
        if let Some(rule) = self
            .config
            .rules
            .iter()
            .find(|rule| rule.pattern == endpoint)
        {
            return rule;
        }
        self.config
            .rules
            .iter()
            .filter(|rule| !rule.pattern.is_empty() && endpoint.starts_with(rule.pattern.as_str()))
            .max_by_key(|rule| rule.pattern.len())
            .unwrap_or(&self.config.default_rule)
    }

    async fn admit_at(&self, endpoint: &str, identity: &str, now: DateTime<Utc>) -> Admission {
        let rule = self.rule_for(endpoint);
        let key = (rule.pattern.clone(), identity.to_string());

        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(key)
            .or_insert_with(|| Bucket::fresh(now, rule));

        if bucket.expired(now) {
            bucket.count = 0;
            bucket.window_start = now;
            bucket.window_ms = rule.window_ms;
            bucket.max_requests = rule.max_requests;
        }

        let allowed = bucket.count < bucket.max_requests;
        if allowed {
            bucket.count += 1;
        }

        let reset_at = bucket.reset_at();
        let admission = Admission {
            allowed,
            limit: bucket.max_requests,
            remaining: bucket.max_requests.saturating_sub(bucket.count),
            reset_at,
            retry_after_secs: if allowed {
                None
            } else {
                Some((reset_at - now).num_seconds().max(1) as u64)
            },
        };

        let seen = self.admissions.fetch_add(1, Ordering::Relaxed) + 1;
        if seen % EVICTION_STRIDE == 0 {
            buckets.retain(|_, bucket| !bucket.expired(now));
        }

        admission
    }

    async fn classify_at(
        &self,
        endpoint: &str,
        identity: &str,
        now: DateTime<Utc>,
    ) -> Classification {
        let rule = self.rule_for(endpoint);
        let key = (rule.pattern.clone(), identity.to_string());

        let buckets = self.buckets.lock().await;
        let bucket = match buckets.get(&key) {
            Some(bucket) if !bucket.expired(now) => bucket,
            _ => {
                return Classification {
                    suspicious: false,
                    action: AbuseAction::None,
                };
            }
        };

        if endpoint.starts_with("auth/") && bucket.count > AUTH_BURST_LIMIT {
            tracing::warn!(
                endpoint,
                identity,
                count = bucket.count,
                "auth endpoint burst flagged for blocking"
            );
            return Classification {
                suspicious: true,
                action: AbuseAction::Block,
            };
        }

        let read_heavy = READ_HEAVY_PREFIXES
            .iter()
            .any(|prefix| endpoint.starts_with(prefix));
        let elapsed_secs = ((now - bucket.window_start).num_milliseconds() as f64 / 1000.0).max(1.0);
        let rate = bucket.count as f64 / elapsed_secs;
        if !read_heavy && rate > SUSPICIOUS_RATE_PER_SEC {
            tracing::warn!(
                endpoint,
                identity,
                rate,
                "request rate flagged for throttling"
            );
            return Classification {
                suspicious: true,
                action: AbuseAction::Throttle,
            };
        }

        Classification {
            suspicious: false,
            action: AbuseAction::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter_with_rule(pattern: &str, window_ms: u64, max_requests: u32) -> RateLimiter {
        let mut config = RateLimitConfig::default();
        config.rules = vec![RateLimitRule::new(pattern, window_ms, max_requests)];
        RateLimiter::new(config)
    }

    #[tokio::test]
    async fn test_window_admits_up_to_max_then_denies() {
        let limiter = limiter_with_rule("trucks/write", 60_000, 5);
        let now = Utc::now();

        for i in 0..5 {
            let admission = limiter.admit_at("trucks/write", "owner-1", now).await;
            assert!(admission.allowed, "admission {} should pass", i + 1);
        }

        let denied = limiter.admit_at("trucks/write", "owner-1", now).await;
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        let retry_after = denied.retry_after_secs.expect("retry_after on denial");
        assert!(retry_after >= 1 && retry_after <= 60);
    }

    #[tokio::test]
    async fn test_window_resets_after_elapse() {
        let limiter = limiter_with_rule("trucks/write", 60_000, 1);
        let now = Utc::now();

        assert!(limiter.admit_at("trucks/write", "owner-1", now).await.allowed);
        assert!(!limiter.admit_at("trucks/write", "owner-1", now).await.allowed);

        let later = now + Duration::milliseconds(60_001);
        assert!(
            limiter
                .admit_at("trucks/write", "owner-1", later)
                .await
                .allowed
        );
    }

    #[tokio::test]
    async fn test_identities_have_separate_buckets() {
        let limiter = limiter_with_rule("trucks/write", 60_000, 1);
        let now = Utc::now();

        assert!(limiter.admit_at("trucks/write", "owner-1", now).await.allowed);
        assert!(limiter.admit_at("trucks/write", "owner-2", now).await.allowed);
        assert!(!limiter.admit_at("trucks/write", "owner-1", now).await.allowed);
    }

    #[tokio::test]
    async fn test_longest_prefix_match_wins() {
        let mut config = RateLimitConfig::default();
        config.rules = vec![
            RateLimitRule::new("auth", 60_000, 50),
            RateLimitRule::new("auth/login", 60_000, 1),
        ];
        let limiter = RateLimiter::new(config);
        let now = Utc::now();

        assert!(
            limiter
                .admit_at("auth/login/verify", "id-1", now)
                .await
                .allowed
        );
        let denied = limiter.admit_at("auth/login/verify", "id-1", now).await;
        assert!(!denied.allowed);
        assert_eq!(denied.limit, 1);
    }

    #[tokio::test]
    async fn test_unmatched_endpoint_falls_back_to_default() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let now = Utc::now();

        let admission = limiter.admit_at("reports/weekly", "id-1", now).await;
        assert!(admission.allowed);
        assert_eq!(admission.limit, 100);
    }

    #[tokio::test]
    async fn test_login_burst_denied_with_retry_within_window() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let now = Utc::now();

        for _ in 0..5 {
            assert!(limiter.admit_at("auth/login", "driver-7", now).await.allowed);
        }
        let sixth = limiter.admit_at("auth/login", "driver-7", now).await;
        assert!(!sixth.allowed);
        assert!(sixth.retry_after_secs.expect("retry_after") <= 900);
    }

    #[tokio::test]
    async fn test_classify_flags_auth_burst_for_block() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let now = Utc::now();

        for _ in 0..4 {
            limiter.admit_at("auth/login", "driver-7", now).await;
        }
        let verdict = limiter.classify_at("auth/login", "driver-7", now).await;
        assert!(verdict.suspicious);
        assert_eq!(verdict.action, AbuseAction::Block);
    }

    #[tokio::test]
    async fn test_classify_flags_high_rate_for_throttle() {
        let limiter = limiter_with_rule("parts/write", 60_000, 100);
        let now = Utc::now();

        for _ in 0..12 {
            limiter.admit_at("parts/write", "owner-1", now).await;
        }
        let verdict = limiter
            .classify_at("parts/write", "owner-1", now + Duration::milliseconds(500))
            .await;
        assert!(verdict.suspicious);
        assert_eq!(verdict.action, AbuseAction::Throttle);
    }

    #[tokio::test]
    async fn test_classify_ignores_dashboard_reads() {
        let limiter = limiter_with_rule("dashboard", 60_000, 100);
        let now = Utc::now();

        for _ in 0..20 {
            limiter.admit_at("dashboard/summary", "owner-1", now).await;
        }
        let verdict = limiter
            .classify_at("dashboard/summary", "owner-1", now + Duration::milliseconds(500))
            .await;
        assert!(!verdict.suspicious);
        assert_eq!(verdict.action, AbuseAction::None);
    }

    #[tokio::test]
    async fn test_expired_buckets_are_evicted_on_stride() {
        let limiter = limiter_with_rule("trucks/write", 1_000, 5);
        let now = Utc::now();

        limiter.admit_at("trucks/write", "stale-owner", now).await;
        assert_eq!(limiter.buckets.lock().await.len(), 1);

        // Drive enough admissions past the stale window to trigger a sweep.
        let later = now + Duration::milliseconds(2_000);
        for i in 0..EVICTION_STRIDE {
            limiter
                .admit_at("trucks/write", &format!("owner-{i}"), later)
                .await;
        }

        let buckets = limiter.buckets.lock().await;
        assert!(!buckets.contains_key(&("trucks/write".to_string(), "stale-owner".to_string())));
    }
}
