//! Fixed-window rate limiting
//!
//! Tracks a request count per logical key with lazy window reset. A key that
//! exceeds its quota is blocked for a configurable duration independent of
//! the counting window; once the block expires the window starts fresh.
//! Entry state lives in a concurrent map so checks for the same key are
//! linearizable without a limiter-wide lock.

use crate::config::{OperationClass, RateLimitQuota, RateLimitTable};
use common::constants::rate_limiting;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

/// Rate limiter errors
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("Invalid rate limit configuration: {message}")]
    InvalidConfiguration { message: String },
}

#[derive(Debug, Clone)]
struct RateLimitEntry {
    count: u32,
    limit: u32,
    window: Duration,
    window_start: Instant,
    blocked: bool,
    block_expiry: Option<Instant>,
}

impl RateLimitEntry {
    fn new(limit: u32, window: Duration, now: Instant) -> Self {
        Self {
            count: 0,
            limit,
            window,
            window_start: now,
            blocked: false,
            block_expiry: None,
        }
    }

    fn window_expired(&self, now: Instant) -> bool {
        now.duration_since(self.window_start) >= self.window
    }

    fn reset(&mut self, now: Instant) {
        self.count = 0;
        self.window_start = now;
    }

    /// Count one request against the window; returns whether it is allowed.
    fn admit(&mut self, now: Instant, block_duration: Duration) -> bool {
        if let Some(expiry) = self.block_expiry {
            if now < expiry {
                return false;
            }
            self.blocked = false;
            self.block_expiry = None;
            self.reset(now);
        }

        if self.window_expired(now) {
            self.reset(now);
        }

        self.count += 1;
        if self.count > self.limit {
            self.blocked = true;
            self.block_expiry = Some(now + block_duration);
            return false;
        }
        true
    }

    fn expired(&self, now: Instant) -> bool {
        let block_done = self.block_expiry.map(|e| now >= e).unwrap_or(true);
        self.window_expired(now) && block_done
    }
}

/// Queryable state for a rate-limited key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub key: String,
    pub limit: u32,
    pub current_count: u32,
    pub remaining: u32,
    /// Milliseconds until the current window resets
    pub reset_in_ms: u64,
    pub blocked: bool,
    /// Milliseconds until a blocked key is admitted again
    pub retry_after_ms: Option<u64>,
}

impl RateLimitInfo {
    /// Header pairs for callers gating HTTP requests with this limiter.
    /// `Retry-After` is present only while the key is blocked (HTTP 429).
    pub fn as_headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            ("X-RateLimit-Limit".to_string(), self.limit.to_string()),
            ("X-RateLimit-Remaining".to_string(), self.remaining.to_string()),
            (
                "X-RateLimit-Reset".to_string(),
                self.reset_in_ms.div_ceil(1000).to_string(),
            ),
        ];
        if let Some(retry_ms) = self.retry_after_ms {
            headers.push(("Retry-After".to_string(), retry_ms.div_ceil(1000).to_string()));
        }
        headers
    }
}

/// Aggregate limiter statistics
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RateLimiterStats {
    pub tracked_keys: usize,
    pub total_requests: u64,
    pub blocked_keys: usize,
}

/// Fixed-window rate limiter with per-operation-class quotas
pub struct RateLimiter {
    entries: DashMap<String, RateLimitEntry>,
    table: RwLock<RateLimitTable>,
    default_block: Duration,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_table(RateLimitTable::default())
    }

    pub fn with_table(table: RateLimitTable) -> Self {
        Self {
            entries: DashMap::new(),
            table: RwLock::new(table),
            default_block: Duration::from_millis(rate_limiting::DEFAULT_BLOCK_DURATION_MS),
        }
    }

    /// Check whether a request for `key` is allowed under an ad-hoc quota
    pub fn check_limit(
        &self,
        key: &str,
        max_requests: u32,
        window_ms: u64,
    ) -> Result<bool, RateLimitError> {
        self.check_limit_with_block(key, max_requests, window_ms, self.default_block)
    }

    pub fn check_limit_with_block(
        &self,
        key: &str,
        max_requests: u32,
        window_ms: u64,
        block_duration: Duration,
    ) -> Result<bool, RateLimitError> {
        if max_requests == 0 || window_ms == 0 {
            return Err(RateLimitError::InvalidConfiguration {
                message: "max_requests and window_ms must be non-zero".to_string(),
            });
        }

        let now = Instant::now();
        let window = Duration::from_millis(window_ms);
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| RateLimitEntry::new(max_requests, window, now));

        // Callers own the quota; pick up changes on every check.
        entry.limit = max_requests;
        entry.window = window;

        Ok(entry.admit(now, block_duration))
    }

    /// Check a request against the configured quota for its operation class.
    /// Keys are namespaced per class so the same principal can exhaust one
    /// class without touching another.
    pub async fn check_operation(
        &self,
        class: OperationClass,
        key: &str,
    ) -> Result<bool, RateLimitError> {
        let quota = self.table.read().await.quota(class);
        self.check_limit_with_block(
            &Self::operation_key(class, key),
            quota.max_requests,
            quota.window_ms,
            Duration::from_millis(quota.block_duration_ms),
        )
    }

    pub async fn operation_quota(&self, class: OperationClass) -> RateLimitQuota {
        self.table.read().await.quota(class)
    }

    fn operation_key(class: OperationClass, key: &str) -> String {
        format!("{}:{}", class.as_str(), key)
    }

    /// Current state for a key, if it is being tracked
    pub fn get_info(&self, key: &str) -> Option<RateLimitInfo> {
        let entry = self.entries.get(key)?;
        let now = Instant::now();

        let retry_after_ms = entry
            .block_expiry
            .filter(|expiry| now < *expiry)
            .map(|expiry| expiry.duration_since(now).as_millis() as u64);
        let blocked = retry_after_ms.is_some();

        let (current_count, reset_in_ms) = if entry.window_expired(now) {
            (0, entry.window.as_millis() as u64)
        } else {
            (
                entry.count,
                (entry.window - now.duration_since(entry.window_start)).as_millis() as u64,
            )
        };

        Some(RateLimitInfo {
            key: key.to_string(),
            limit: entry.limit,
            current_count,
            remaining: entry.limit.saturating_sub(current_count),
            reset_in_ms,
            blocked,
            retry_after_ms,
        })
    }

    pub fn operation_info(&self, class: OperationClass, key: &str) -> Option<RateLimitInfo> {
        self.get_info(&Self::operation_key(class, key))
    }

    /// Forget a key, lifting any block
    pub fn reset_key(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop entries whose window and block have both expired. Safe to call at
    /// any cadence; repeated calls with no traffic are no-ops.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.expired(now));
        before - self.entries.len()
    }

    pub fn stats(&self) -> RateLimiterStats {
        let now = Instant::now();
        let mut stats = RateLimiterStats {
            tracked_keys: self.entries.len(),
            ..Default::default()
        };
        for entry in self.entries.iter() {
            stats.total_requests += u64::from(entry.count);
            if entry.block_expiry.map(|e| now < e).unwrap_or(false) {
                stats.blocked_keys += 1;
            }
        }
        stats
    }

    pub async fn set_table(&self, table: RateLimitTable) {
        *self.table.write().await = table;
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[test]
    fn sixth_request_in_window_is_denied() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            assert!(limiter.check_limit("login:alice", 5, 1000).unwrap());
        }
        assert!(!limiter.check_limit("login:alice", 5, 1000).unwrap());
    }

    #[tokio::test]
    async fn window_and_block_expiry_admit_fresh_requests() {
        let limiter = RateLimiter::new();
        let block = Duration::from_millis(50);

        assert!(limiter
            .check_limit_with_block("k", 1, 50, block)
            .unwrap());
        assert!(!limiter.check_limit_with_block("k", 1, 50, block).unwrap());

        sleep(Duration::from_millis(120)).await;

        assert!(limiter.check_limit_with_block("k", 1, 50, block).unwrap());
        let info = limiter.get_info("k").unwrap();
        assert_eq!(info.current_count, 1);
    }

    #[tokio::test]
    async fn block_outlasts_the_counting_window() {
        let limiter = RateLimiter::new();
        let block = Duration::from_millis(300);

        assert!(limiter.check_limit_with_block("k", 1, 40, block).unwrap());
        assert!(!limiter.check_limit_with_block("k", 1, 40, block).unwrap());

        // Window has expired but the block has not.
        sleep(Duration::from_millis(80)).await;
        assert!(!limiter.check_limit_with_block("k", 1, 40, block).unwrap());

        sleep(Duration::from_millis(300)).await;
        assert!(limiter.check_limit_with_block("k", 1, 40, block).unwrap());
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new();
        assert!(limiter.check_limit("a", 1, 1000).unwrap());
        assert!(limiter.check_limit("b", 1, 1000).unwrap());
        assert!(!limiter.check_limit("a", 1, 1000).unwrap());
        assert!(!limiter.check_limit("b", 1, 1000).unwrap());
    }

    #[test]
    fn info_reports_remaining_quota_and_headers() {
        let limiter = RateLimiter::new();
        for _ in 0..3 {
            limiter.check_limit("api:bob", 10, 60_000).unwrap();
        }

        let info = limiter.get_info("api:bob").unwrap();
        assert_eq!(info.limit, 10);
        assert_eq!(info.current_count, 3);
        assert_eq!(info.remaining, 7);
        assert!(!info.blocked);

        let headers = info.as_headers();
        assert!(headers
            .iter()
            .any(|(name, value)| name == "X-RateLimit-Remaining" && value == "7"));
        assert!(!headers.iter().any(|(name, _)| name == "Retry-After"));
    }

    #[test]
    fn blocked_key_reports_retry_after() {
        let limiter = RateLimiter::new();
        limiter
            .check_limit_with_block("k", 1, 1000, Duration::from_secs(30))
            .unwrap();
        limiter
            .check_limit_with_block("k", 1, 1000, Duration::from_secs(30))
            .unwrap();

        let info = limiter.get_info("k").unwrap();
        assert!(info.blocked);
        assert!(info.retry_after_ms.is_some());
        assert!(info
            .as_headers()
            .iter()
            .any(|(name, _)| name == "Retry-After"));
    }

    #[tokio::test]
    async fn sweep_drops_expired_entries_only() {
        let limiter = RateLimiter::new();
        let block = Duration::from_millis(40);
        limiter.check_limit_with_block("old", 5, 40, block).unwrap();
        limiter
            .check_limit_with_block("fresh", 5, 60_000, block)
            .unwrap();

        sleep(Duration::from_millis(100)).await;

        assert_eq!(limiter.sweep(), 1);
        assert!(limiter.get_info("old").is_none());
        assert!(limiter.get_info("fresh").is_some());
        // Idempotent with no new traffic.
        assert_eq!(limiter.sweep(), 0);
    }

    #[test]
    fn zero_quota_is_invalid() {
        let limiter = RateLimiter::new();
        assert!(matches!(
            limiter.check_limit("k", 0, 1000),
            Err(RateLimitError::InvalidConfiguration { .. })
        ));
    }

    #[tokio::test]
    async fn operation_classes_use_their_own_quotas() {
        let mut table = RateLimitTable::default();
        table.recovery.max_requests = 1;
        table.recovery.window_ms = 60_000;
        let limiter = RateLimiter::with_table(table);

        assert!(limiter
            .check_operation(OperationClass::Recovery, "alice")
            .await
            .unwrap());
        assert!(!limiter
            .check_operation(OperationClass::Recovery, "alice")
            .await
            .unwrap());
        // Same principal, different class: unaffected.
        assert!(limiter
            .check_operation(OperationClass::Api, "alice")
            .await
            .unwrap());
    }
}
