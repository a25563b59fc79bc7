//! Login rate limiting
//!
//! Two sliding windows guard the login endpoint:
//! - failed attempts per email: 5 per 15 minutes
//! - requests per client IP: 10 per minute
//!
//! State lives in process memory behind an async `RwLock`; `cleanup` is run
//! periodically from `main` to drop stale entries.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::hash::Hash;
use std::net::IpAddr;
use tokio::sync::RwLock;

const EMAIL_LIMIT: usize = 5;
const IP_LIMIT: usize = 10;

/// Timestamps of recent events per key
struct SlidingWindow<K> {
    limit: usize,
    window: Duration,
    events: RwLock<HashMap<K, Vec<DateTime<Utc>>>>,
}

impl<K: Eq + Hash + Clone> SlidingWindow<K> {
    fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            events: RwLock::new(HashMap::new()),
        }
    }

    async fn is_limited(&self, key: &K) -> bool {
        let cutoff = Utc::now() - self.window;
        let events = self.events.read().await;
        events
            .get(key)
            .map(|times| times.iter().filter(|t| **t > cutoff).count() >= self.limit)
            .unwrap_or(false)
    }

    async fn record(&self, key: K) {
        let now = Utc::now();
        let cutoff = now - self.window;
        let mut events = self.events.write().await;
        let times = events.entry(key).or_default();
        times.retain(|t| *t > cutoff);
        times.push(now);
    }

    async fn reset(&self, key: &K) {
        self.events.write().await.remove(key);
    }

    async fn cleanup(&self) {
        let cutoff = Utc::now() - self.window;
        self.events.write().await.retain(|_, times| {
            times.retain(|t| *t > cutoff);
            !times.is_empty()
        });
    }

    async fn len(&self) -> usize {
        self.events.read().await.len()
    }
}

/// Login rate limiter
pub struct LoginRateLimiter {
    emails: SlidingWindow<String>,
    ips: SlidingWindow<IpAddr>,
}

impl LoginRateLimiter {
    pub fn new() -> Self {
        Self {
            emails: SlidingWindow::new(EMAIL_LIMIT, Duration::minutes(15)),
            ips: SlidingWindow::new(IP_LIMIT, Duration::minutes(1)),
        }
    }

    /// Too many failed attempts for this email
    pub async fn is_email_limited(&self, email: &str) -> bool {
        self.emails.is_limited(&email.trim().to_lowercase()).await
    }

    pub async fn record_failed_attempt(&self, email: &str) {
        self.emails.record(email.trim().to_lowercase()).await;
    }

    /// Forget failures after a successful login
    pub async fn clear_email_attempts(&self, email: &str) {
        self.emails.reset(&email.trim().to_lowercase()).await;
    }

    /// Too many login requests from this address
    pub async fn is_ip_limited(&self, ip: IpAddr) -> bool {
        self.ips.is_limited(&ip).await
    }

    pub async fn record_ip_request(&self, ip: IpAddr) {
        self.ips.record(ip).await;
    }

    /// Drop expired entries
    pub async fn cleanup(&self) {
        self.emails.cleanup().await;
        self.ips.cleanup().await;
    }

    /// Number of tracked keys, emails plus addresses
    pub async fn tracked(&self) -> usize {
        self.emails.len().await + self.ips.len().await
    }
}

impl Default for LoginRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[tokio::test]
    async fn test_email_limit() {
        let limiter = LoginRateLimiter::new();
        for _ in 0..4 {
            limiter.record_failed_attempt("user@example.com").await;
            assert!(!limiter.is_email_limited("user@example.com").await);
        }
        limiter.record_failed_attempt("user@example.com").await;
        assert!(limiter.is_email_limited("user@example.com").await);

        limiter.clear_email_attempts("user@example.com").await;
        assert!(!limiter.is_email_limited("user@example.com").await);
    }

    #[tokio::test]
    async fn test_email_is_case_insensitive() {
        let limiter = LoginRateLimiter::new();
        for email in ["A@b.com", "a@B.com", " a@b.com ", "A@B.COM", "a@b.com"] {
            limiter.record_failed_attempt(email).await;
        }
        assert!(limiter.is_email_limited("a@b.com").await);
    }

    #[tokio::test]
    async fn test_ip_limit() {
        let limiter = LoginRateLimiter::new();
        let ip = IpAddr::from_str("127.0.0.1").unwrap();
        for _ in 0..9 {
            limiter.record_ip_request(ip).await;
        }
        assert!(!limiter.is_ip_limited(ip).await);
        limiter.record_ip_request(ip).await;
        assert!(limiter.is_ip_limited(ip).await);

        let other = IpAddr::from_str("10.0.0.1").unwrap();
        assert!(!limiter.is_ip_limited(other).await);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_recent_entries() {
        let limiter = LoginRateLimiter::new();
        limiter.record_failed_attempt("a@b.com").await;
        limiter
            .record_ip_request(IpAddr::from_str("127.0.0.1").unwrap())
            .await;
        limiter.cleanup().await;
        assert_eq!(limiter.tracked().await, 2);
    }
}
