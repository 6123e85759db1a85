use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::error::Error;

/// Configuration used by the timestamp validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardConfig {
    pub max_age: Duration,
    pub future_tolerance: Duration,
    pub max_capacity: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(300),
            future_tolerance: Duration::from_secs(60),
            max_capacity: 100_000,
        }
    }
}

impl GuardConfig {
    pub fn validate(&self) -> Result<(), Error> {
        // Require integral seconds to avoid silent truncation.
        if self.max_age < Duration::from_secs(1) {
            return Err(Error::InvalidConfig(
                "max_age must be at least 1 second".into(),
            ));
        }
        if self.max_age.subsec_nanos() != 0 || self.future_tolerance.subsec_nanos() != 0 {
            return Err(Error::InvalidConfig(
                "replay windows must be whole numbers of seconds".into(),
            ));
        }
        if self.max_capacity == 0 {
            return Err(Error::InvalidConfig("max_capacity must be >= 1".into()));
        }
        Ok(())
    }
}

/// Fixed-size digest of a `(wallet, timestamp, amount)` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UsedKey(pub [u8; 32]);

impl UsedKey {
    pub fn new(wallet: &str, timestamp: u64, amount: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"fairbox:used:v1|");
        hasher.update((wallet.len() as u64).to_le_bytes());
        hasher.update(wallet.as_bytes());
        hasher.update(timestamp.to_le_bytes());
        hasher.update(amount.to_le_bytes());
        Self(hasher.finalize().into())
    }
}
