use std::time::Duration;

use crate::error::Error;

/// How many requests a key may make per window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub name: &'static str,
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub const fn new(name: &'static str, max_requests: u32, window: Duration) -> Self {
        Self {
            name,
            max_requests,
            window,
        }
    }

    /// 100 requests per 15 minutes per IP.
    pub const fn general() -> Self {
        Self::new("general", 100, Duration::from_secs(15 * 60))
    }

    /// 5 requests per minute per wallet (or IP).
    pub const fn purchase() -> Self {
        Self::new("purchase", 5, Duration::from_secs(60))
    }

    /// 50 requests per 5 minutes per IP.
    pub const fn admin() -> Self {
        Self::new("admin", 50, Duration::from_secs(5 * 60))
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.max_requests == 0 {
            return Err(Error::InvalidConfig(format!(
                "{}: max_requests must be >= 1",
                self.name
            )));
        }
        if self.window < Duration::from_secs(1) || self.window.subsec_nanos() != 0 {
            return Err(Error::InvalidConfig(format!(
                "{}: window must be a whole number of seconds",
                self.name
            )));
        }
        Ok(())
    }
}
