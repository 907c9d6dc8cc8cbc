use std::time::Instant;

use serde::Serialize;

use crate::cli::utils::output;
use crate::cli::OutputFormat;
use crate::security::rate_limit::{RateLimit, RateLimiter};

#[derive(Debug, Serialize)]
pub struct Burst {
    pub limit: RateLimit,
    pub sent: u32,
    pub allowed: u32,
    pub rejected: u32,
    /// Seconds a rejected client is told to wait
    pub retry_after: Option<u64>,
}

/// Fire `requests` at one key in the same instant.
pub fn burst(limit: RateLimit, requests: u32) -> Burst {
    let limiter = RateLimiter::new(1, limit.period);
    let now = Instant::now();
    let mut result = Burst {
        limit,
        sent: requests,
        allowed: 0,
        rejected: 0,
        retry_after: None,
    };

    for _ in 0..requests {
        match limiter.check_at("cli", "simulated", limit, now) {
            Ok(()) => result.allowed += 1,
            Err(e) => {
                result.rejected += 1;
                result.retry_after = Some(e.retry_after);
            }
        }
    }
    result
}

pub fn simulate(spec: &str, requests: u32, output_format: OutputFormat) -> anyhow::Result<()> {
    let limit: RateLimit = spec.parse().map_err(anyhow::Error::msg)?;

    output(output_format, &burst(limit, requests), |b| {
        println!("{}: {} allowed, {} rejected of {}", b.limit, b.allowed, b.rejected, b.sent);
        if let Some(secs) = b.retry_after {
            println!("retry after {}s", secs);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_stops_at_the_ceiling() {
        let result = burst("3/minute".parse().unwrap(), 5);
        assert_eq!(result.allowed, 3);
        assert_eq!(result.rejected, 2);
        assert_eq!(result.retry_after, Some(60));
    }

    #[test]
    fn malformed_spec_is_rejected() {
        assert!(simulate("lots", 1, OutputFormat::Json).is_err());
    }
}
