//! Request pacing shared across all fetches against a provider.

mod rate_limiter;

pub use rate_limiter::{RateLimitConfig, RateLimiter};
