pub mod headers;
pub mod rate_limit;
pub mod sanitizer;

pub use headers::security_headers_middleware;
pub use rate_limit::{RateLimit, RateLimitExceeded, RateLimiter};
pub use sanitizer::{sanitize, sanitize_json, InjectionReport, RiskLevel};
