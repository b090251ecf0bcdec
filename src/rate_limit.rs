//! Rate limits for calling the translation provider.
//!
//! Free translation endpoints don't publish their limits, but they do start
//! answering with HTTP 429 if we hammer them. So every outbound request waits
//! on a shared leaky bucket, whatever `--jobs` is set to.

use std::{fmt, str::FromStr, time::Duration};

use leaky_bucket::RateLimiter;

use crate::prelude::*;

/// The period over which the rate limit is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitPeriod {
    /// Per second.
    Second,
    /// Per minute.
    Minute,
}

impl RateLimitPeriod {
    /// Convert this period to a number of seconds.
    pub fn to_duration(self) -> Duration {
        match self {
            RateLimitPeriod::Second => Duration::from_secs(1),
            RateLimitPeriod::Minute => Duration::from_secs(60),
        }
    }
}

impl fmt::Display for RateLimitPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitPeriod::Second => write!(f, "s"),
            RateLimitPeriod::Minute => write!(f, "m"),
        }
    }
}

impl FromStr for RateLimitPeriod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "s" => Ok(RateLimitPeriod::Second),
            "m" => Ok(RateLimitPeriod::Minute),
            _ => Err(anyhow!("Unsupported rate limit period: {:?}", s)),
        }
    }
}

/// A rate limit for an API, written as `10/s` or `2000/m`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimit {
    /// The maximum number of requests allowed in the period.
    pub max_requests: usize,
    /// The period over which the rate limit is applied.
    pub per_period: RateLimitPeriod,
}

impl RateLimit {
    /// Create a new [`RateLimit`].
    pub fn new(max_requests: usize, per_period: RateLimitPeriod) -> Self {
        Self {
            max_requests,
            per_period,
        }
    }

    /// Create a [`RateLimiter`] for this rate limit.
    ///
    /// We refill one token at a time, spread evenly over the period, so that
    /// `60/m` behaves like one request per second rather than a burst of 60
    /// requests followed by a minute of silence.
    pub fn to_rate_limiter(&self) -> Result<RateLimiter> {
        if self.max_requests == 0 {
            return Err(anyhow!("rate limit must allow at least one request"));
        }
        let max_requests = u32::try_from(self.max_requests)
            .with_context(|| format!("rate limit too large: {}", self))?;
        let interval = self.per_period.to_duration() / max_requests;
        Ok(RateLimiter::builder()
            .initial(1)
            .refill(1)
            .max(self.max_requests)
            .interval(interval)
            .build())
    }
}

impl Default for RateLimit {
    /// One request per second, which keeps free endpoints happy.
    fn default() -> Self {
        Self::new(1, RateLimitPeriod::Second)
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.max_requests, self.per_period)
    }
}

impl FromStr for RateLimit {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parse = |s: &str| -> Result<_> {
            let mut parts = s.splitn(2, '/');
            let max_requests = parts
                .next()
                .ok_or_else(|| anyhow!("Missing max requests"))?
                .parse::<usize>()?;
            let per_period = parts
                .next()
                .ok_or_else(|| anyhow!("Missing period"))?
                .parse::<RateLimitPeriod>()?;
            Ok(Self {
                max_requests,
                per_period,
            })
        };
        parse(s).with_context(|| format!("Failed to parse rate limit: {:?}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let rate_limit = RateLimit::from_str("10/s").unwrap();
        assert_eq!(rate_limit.max_requests, 10);
        assert_eq!(rate_limit.per_period, RateLimitPeriod::Second);

        let rate_limit = RateLimit::from_str("5/m").unwrap();
        assert_eq!(rate_limit.max_requests, 5);
        assert_eq!(rate_limit.per_period, RateLimitPeriod::Minute);
    }

    #[test]
    fn test_failed_parse() {
        assert!(RateLimit::from_str("10/invalid").is_err());
        assert!(RateLimit::from_str("invalid").is_err());
    }

    #[test]
    fn test_default() {
        assert_eq!(RateLimit::default().to_string(), "1/s");
    }

    #[test]
    fn test_zero_is_rejected() {
        let rate_limit = RateLimit::from_str("0/s").unwrap();
        assert!(rate_limit.to_rate_limiter().is_err());
    }

    #[tokio::test]
    async fn test_limiter_allows_first_request_immediately() {
        let limiter = RateLimit::from_str("1000/s")
            .unwrap()
            .to_rate_limiter()
            .unwrap();
        limiter.acquire_one().await;
    }

    #[test]
    fn test_display() {
        let rate_limit = RateLimit::from_str("10/s").unwrap();
        assert_eq!(rate_limit.to_string(), "10/s");

        let rate_limit = RateLimit::from_str("5/m").unwrap();
        assert_eq!(rate_limit.to_string(), "5/m");
    }
}
