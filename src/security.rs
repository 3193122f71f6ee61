/// Brute-force protection for the credential endpoints
///
/// A token bucket per client IP. Each bucket holds `requests_per_minute`
/// tokens and refills continuously at the same rate.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use crate::configuration::RateLimitSettings;
use crate::error::AppError;

/// Above this many tracked clients, full buckets are dropped on the next check.
const MAX_TRACKED_CLIENTS: usize = 10_000;

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
        }
    }

    fn refill(&mut self, capacity: f64, refill_rate: f64, now: Instant) {
        let elapsed_secs = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed_secs * refill_rate).min(capacity);
        self.last_refill = now;
    }

    fn try_take_token(&mut self) -> bool {
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Rate limiter manager - tracks budgets per IP address
pub struct RateLimiterManager {
    requests_per_minute: u32,
    limiters: Mutex<HashMap<String, TokenBucket>>,
}

impl RateLimiterManager {
    pub fn new(settings: &RateLimitSettings) -> Self {
        Self {
            requests_per_minute: settings.requests_per_minute,
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// Spends one token for `ip`, failing with `RateLimited` when none is left.
    pub fn check_rate_limit(&self, ip: &str) -> Result<(), AppError> {
        self.check_at(ip, Instant::now())
    }

    fn check_at(&self, ip: &str, now: Instant) -> Result<(), AppError> {
        let capacity = f64::from(self.requests_per_minute);
        let refill_rate = capacity / 60.0;
        let mut limiters = self
            .limiters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if limiters.len() > MAX_TRACKED_CLIENTS {
            limiters.retain(|_, bucket| {
                bucket.refill(capacity, refill_rate, now);
                bucket.tokens < capacity
            });
        }

        let bucket = limiters
            .entry(ip.to_string())
            .or_insert_with(|| TokenBucket::full(capacity, now));
        bucket.refill(capacity, refill_rate, now);

        if bucket.try_take_token() {
            Ok(())
        } else {
            Err(AppError::RateLimited(format!(
                "max {} requests per minute",
                self.requests_per_minute
            )))
        }
    }

    #[cfg(test)]
    fn tracked_clients(&self) -> usize {
        self.limiters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn manager(requests_per_minute: u32) -> RateLimiterManager {
        RateLimiterManager::new(&RateLimitSettings {
            requests_per_minute,
        })
    }

    #[test]
    fn test_rate_limiter_allows_initial_burst() {
        let manager = manager(3);
        let now = Instant::now();

        for _ in 0..3 {
            assert!(manager.check_at("127.0.0.1", now).is_ok());
        }
        assert!(matches!(
            manager.check_at("127.0.0.1", now),
            Err(AppError::RateLimited(_))
        ));
    }

    #[test]
    fn test_budgets_are_per_ip() {
        let manager = manager(1);
        let now = Instant::now();

        assert!(manager.check_at("10.0.0.1", now).is_ok());
        assert!(manager.check_at("10.0.0.1", now).is_err());
        assert!(manager.check_at("10.0.0.2", now).is_ok());
    }

    #[test]
    fn test_bucket_refills_over_time() {
        let manager = manager(60);
        let start = Instant::now();

        for _ in 0..60 {
            assert!(manager.check_at("127.0.0.1", start).is_ok());
        }
        assert!(manager.check_at("127.0.0.1", start).is_err());

        // one token per second at 60 rpm
        let later = start + Duration::from_secs(1);
        assert!(manager.check_at("127.0.0.1", later).is_ok());
        assert!(manager.check_at("127.0.0.1", later).is_err());
    }

    #[test]
    fn test_idle_clients_are_dropped_when_table_is_large() {
        let manager = manager(1);
        let start = Instant::now();

        for i in 0..=MAX_TRACKED_CLIENTS {
            manager.check_at(&format!("ip-{}", i), start).unwrap();
        }
        assert_eq!(manager.tracked_clients(), MAX_TRACKED_CLIENTS + 1);

        let later = start + Duration::from_secs(120);
        manager.check_at("fresh", later).unwrap();
        assert_eq!(manager.tracked_clients(), 1);
    }
}
