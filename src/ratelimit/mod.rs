//! Fixed-window request limiting keyed by client IP or wallet.

pub mod limiter;
pub mod policy;

use std::net::IpAddr;
use std::sync::Arc;

use crate::error::Error;
use crate::time::TimeProvider;

pub use limiter::{RateLimitDecision, RateLimiter};
pub use policy::RateLimitPolicy;

/// Identity a request is counted against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    pub fn ip(addr: IpAddr) -> Self {
        Self(format!("ip:{addr}"))
    }

    /// Purchases count against the wallet when one is given.
    pub fn wallet_or_ip(wallet: Option<&str>, addr: IpAddr) -> Self {
        match wallet.map(str::trim).filter(|w| !w.is_empty()) {
            Some(wallet) => Self(format!("wallet:{wallet}")),
            None => Self::ip(addr),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The three limiters the HTTP surface applies.
pub struct RateLimits {
    pub general: RateLimiter,
    pub purchase: RateLimiter,
    pub admin: RateLimiter,
}

impl RateLimits {
    pub fn new(
        general: RateLimitPolicy,
        purchase: RateLimitPolicy,
        admin: RateLimitPolicy,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Result<Self, Error> {
        Ok(Self {
            general: RateLimiter::new(general, time_provider.clone())?,
            purchase: RateLimiter::new(purchase, time_provider.clone())?,
            admin: RateLimiter::new(admin, time_provider)?,
        })
    }

    pub fn with_defaults(time_provider: Arc<dyn TimeProvider>) -> Result<Self, Error> {
        Self::new(
            RateLimitPolicy::general(),
            RateLimitPolicy::purchase(),
            RateLimitPolicy::admin(),
            time_provider,
        )
    }

    /// Remove expired windows from every limiter.
    pub fn cleanup(&self) -> usize {
        self.general.cleanup() + self.purchase.cleanup() + self.admin.cleanup()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;
    use std::net::Ipv4Addr;

    #[test]
    fn wallet_key_preferred_over_ip() {
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(RateLimitKey::wallet_or_ip(Some("abc"), ip).as_str(), "wallet:abc");
        assert_eq!(RateLimitKey::wallet_or_ip(Some("  "), ip).as_str(), "ip:10.0.0.1");
        assert_eq!(RateLimitKey::wallet_or_ip(None, ip), RateLimitKey::ip(ip));
    }

    #[test]
    fn limiters_are_independent() {
        let clock = Arc::new(ManualClock::new(0));
        let limits = RateLimits::with_defaults(clock).unwrap();
        let key = RateLimitKey::ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
        for _ in 0..5 {
            assert!(limits.purchase.check(&key).allowed);
        }
        assert!(!limits.purchase.check(&key).allowed);
        assert!(limits.general.check(&key).allowed);
        assert!(limits.admin.check(&key).allowed);
    }
}
