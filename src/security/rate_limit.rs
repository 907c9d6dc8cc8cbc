use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use moka::sync::Cache;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::config::ApiConfig;

/// Ceiling for one route, e.g. `5/minute`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub requests: u32,
    pub period: Duration,
}

impl RateLimit {
    pub const fn per_minute(requests: u32) -> Self {
        Self {
            requests,
            period: Duration::from_secs(60),
        }
    }
}

impl FromStr for RateLimit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (count, unit) = s
            .split_once('/')
            .ok_or_else(|| format!("rate limit '{}' must look like N/unit", s))?;

        let requests: u32 = count
            .trim()
            .parse()
            .map_err(|_| format!("invalid request count in '{}'", s))?;
        if requests == 0 {
            return Err(format!("rate limit '{}' must allow at least one request", s));
        }

        let seconds = match unit.trim() {
            "second" | "seconds" => 1,
            "minute" | "minutes" => 60,
            "hour" | "hours" => 3_600,
            "day" | "days" => 86_400,
            other => return Err(format!("unknown rate limit period '{}'", other)),
        };

        Ok(Self {
            requests,
            period: Duration::from_secs(seconds),
        })
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.period.as_secs() {
            1 => "second",
            60 => "minute",
            3_600 => "hour",
            86_400 => "day",
            other => return write!(f, "{}/{}s", self.requests, other),
        };
        write!(f, "{}/{}", self.requests, unit)
    }
}

impl Serialize for RateLimit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RateLimit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Rate limit exceeded: {limit} (retry after {retry_after}s)")]
pub struct RateLimitExceeded {
    pub limit: RateLimit,
    pub retry_after: u64,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    period: Duration,
    count: u32,
}

impl Window {
    fn open(now: Instant, period: Duration) -> Self {
        Self {
            started: now,
            period,
            count: 0,
        }
    }

    fn ends(&self) -> Instant {
        self.started + self.period
    }
}

/// Fixed-window counters keyed by (client address, route).
///
/// A window opens on the key's first request. Entries live in a bounded
/// moka cache and expire `ttl` after insertion, so `ttl` must be at least
/// the longest configured period.
pub struct RateLimiter {
    windows: Cache<(String, String), Arc<Mutex<Window>>>,
    max_keys: u64,
}

impl RateLimiter {
    pub const DEFAULT_MAX_KEYS: u64 = 100_000;

    pub fn new(max_keys: u64, ttl: Duration) -> Self {
        let windows = Cache::builder().max_capacity(max_keys).time_to_live(ttl).build();
        Self { windows, max_keys }
    }

    /// Sized for the configured ceilings: entries outlive the longest period.
    pub fn from_config(api: &ApiConfig) -> Self {
        let longest = api
            .route_limits
            .values()
            .chain(std::iter::once(&api.default_rate_limit))
            .map(|limit| limit.period)
            .max()
            .unwrap_or(Duration::from_secs(60));
        Self::new(api.rate_limit_max_keys, longest)
    }

    pub fn check(&self, client: &str, route: &str, limit: RateLimit) -> Result<(), RateLimitExceeded> {
        self.check_at(client, route, limit, Instant::now())
    }

    /// Count one request at `now` against the key's current window.
    pub fn check_at(
        &self,
        client: &str,
        route: &str,
        limit: RateLimit,
        now: Instant,
    ) -> Result<(), RateLimitExceeded> {
        let key = (client.to_string(), route.to_string());
        let entry = self
            .windows
            .get_with(key, || Arc::new(Mutex::new(Window::open(now, limit.period))));
        let mut window = entry.lock().unwrap_or_else(|e| e.into_inner());

        if now >= window.ends() {
            *window = Window::open(now, limit.period);
        }

        if window.count >= limit.requests {
            let remaining = window.ends().saturating_duration_since(now);
            // round up so clients never retry inside the same window
            let retry_after = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
            tracing::warn!(client, route, limit = %limit, retry_after, "Rate limit exceeded");
            return Err(RateLimitExceeded {
                limit,
                retry_after: retry_after.max(1),
            });
        }

        window.count += 1;
        Ok(())
    }

    /// Number of live windows, after pending evictions are applied
    pub fn tracked_keys(&self) -> u64 {
        self.windows.run_pending_tasks();
        self.windows.entry_count()
    }

    pub fn max_keys(&self) -> u64 {
        self.max_keys
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_KEYS, Duration::from_secs(3_600))
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("entries", &self.windows.entry_count())
            .field("max_keys", &self.max_keys)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_limit_strings() {
        assert_eq!("5/minute".parse::<RateLimit>().unwrap(), RateLimit::per_minute(5));
        assert_eq!(
            "100/hour".parse::<RateLimit>().unwrap().period,
            Duration::from_secs(3_600)
        );
        assert_eq!("2/second".parse::<RateLimit>().unwrap().to_string(), "2/second");
        assert!("5".parse::<RateLimit>().is_err());
        assert!("0/minute".parse::<RateLimit>().is_err());
        assert!("5/fortnight".parse::<RateLimit>().is_err());
        assert!("10/5minutes".parse::<RateLimit>().is_err());
    }

    #[test]
    fn rejects_the_request_after_the_ceiling() {
        let limiter = RateLimiter::default();
        let limit = RateLimit::per_minute(3);
        let t0 = Instant::now();

        for i in 0..3 {
            assert!(limiter
                .check_at("10.0.0.1", "nodes.create", limit, t0 + Duration::from_secs(i))
                .is_ok());
        }

        let err = limiter
            .check_at("10.0.0.1", "nodes.create", limit, t0 + Duration::from_secs(10))
            .unwrap_err();
        assert_eq!(err.retry_after, 50);
    }

    #[test]
    fn window_resets_at_boundary() {
        let limiter = RateLimiter::default();
        let limit = RateLimit::per_minute(2);
        let t0 = Instant::now();

        assert!(limiter.check_at("a", "r", limit, t0).is_ok());
        assert!(limiter.check_at("a", "r", limit, t0 + Duration::from_secs(30)).is_ok());
        assert!(limiter.check_at("a", "r", limit, t0 + Duration::from_secs(59)).is_err());
        assert!(limiter.check_at("a", "r", limit, t0 + Duration::from_secs(60)).is_ok());
    }

    #[test]
    fn spread_across_windows_is_never_rejected() {
        let limiter = RateLimiter::default();
        let limit = RateLimit::per_minute(2);
        let t0 = Instant::now();

        for i in 0..10u64 {
            let at = t0 + Duration::from_secs(i * 31);
            assert!(limiter.check_at("a", "r", limit, at).is_ok(), "request {} rejected", i);
        }
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::default();
        let limit = RateLimit::per_minute(1);
        let t0 = Instant::now();

        assert!(limiter.check_at("a", "r1", limit, t0).is_ok());
        assert!(limiter.check_at("a", "r2", limit, t0).is_ok());
        assert!(limiter.check_at("b", "r1", limit, t0).is_ok());
        assert!(limiter.check_at("a", "r1", limit, t0).is_err());
    }

    #[test]
    fn expired_windows_are_evicted() {
        let limiter = RateLimiter::new(16, Duration::from_millis(50));
        let limit = RateLimit::per_minute(1);

        limiter.check("a", "r", limit).unwrap();
        limiter.check("b", "r", limit).unwrap();
        assert_eq!(limiter.tracked_keys(), 2);

        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn rotating_clients_cannot_grow_past_capacity() {
        let limiter = RateLimiter::new(32, Duration::from_secs(60));
        let limit = RateLimit::per_minute(5);

        for i in 0..2_000 {
            let client = format!("198.51.100.{}:{}", i % 250, i);
            let _ = limiter.check(&client, "nodes.create", limit);
        }
        assert!(limiter.tracked_keys() <= 32, "{:?}", limiter);
    }

    #[test]
    fn ttl_covers_the_longest_configured_period() {
        let mut api = crate::config::AppConfig::for_environment(crate::config::Environment::Development).api;
        api.route_limits.insert("search.query".into(), "10/hour".parse().unwrap());
        api.rate_limit_max_keys = 8;

        let limiter = RateLimiter::from_config(&api);
        assert_eq!(limiter.max_keys(), 8);
        assert_eq!(
            limiter.windows.policy().time_to_live(),
            Some(Duration::from_secs(3_600))
        );
    }
}
