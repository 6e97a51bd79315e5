use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Fixed-window-per-minute counter, one bucket per (category, client key).
/// Not a distributed rate limiter: sufficient for a single-process ingress
/// guard, not cross-instance fairness.
pub struct RateLimiter {
    buckets: DashMap<String, (u32, Instant)>,
    window: Duration,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
            window: Duration::from_secs(60),
        }
    }

    /// Returns `true` if the request is allowed under `limit_per_minute`
    /// for this `key`, incrementing the bucket as a side effect.
    pub fn check(&self, key: &str, limit_per_minute: u32) -> bool {
        let now = Instant::now();
        let mut entry = self
            .buckets
            .entry(key.to_string())
            .or_insert((0, now));
        if now.duration_since(entry.1) >= self.window {
            entry.0 = 0;
            entry.1 = now;
        }
        if entry.0 >= limit_per_minute {
            return false;
        }
        entry.0 += 1;
        true
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Client identity for rate limiting: an API key header wins, then the
/// left-most `X-Forwarded-For` hop, then the socket's remote host.
pub fn client_key(api_key: Option<&str>, forwarded_for: Option<&str>, remote_host: &str) -> String {
    if let Some(key) = api_key.filter(|k| !k.is_empty()) {
        return format!("key:{key}");
    }
    if let Some(xff) = forwarded_for {
        if let Some(first) = xff.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return format!("ip:{trimmed}");
            }
        }
    }
    format!("ip:{remote_host}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_limit_then_blocks() {
        let limiter = RateLimiter::new();
        for _ in 0..3 {
            assert!(limiter.check("a", 3));
        }
        assert!(!limiter.check("a", 3));
    }

    #[test]
    fn buckets_are_independent_per_key() {
        let limiter = RateLimiter::new();
        assert!(limiter.check("a", 1));
        assert!(limiter.check("b", 1));
    }

    #[test]
    fn api_key_wins_over_forwarded_for() {
        let key = client_key(Some("abc"), Some("1.1.1.1, 2.2.2.2"), "3.3.3.3");
        assert_eq!(key, "key:abc");
    }

    #[test]
    fn forwarded_for_uses_left_most_hop() {
        let key = client_key(None, Some("1.1.1.1, 2.2.2.2"), "3.3.3.3");
        assert_eq!(key, "ip:1.1.1.1");
    }

    #[test]
    fn falls_back_to_remote_host() {
        let key = client_key(None, None, "3.3.3.3");
        assert_eq!(key, "ip:3.3.3.3");
    }
}
