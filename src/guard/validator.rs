use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::Error;
use crate::guard::cache::{UsedTimestampStore, UsedTimestampStoreError};
use crate::guard::types::{GuardConfig, UsedKey};
use crate::time::TimeProvider;

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("timestamp too old")]
    TooOld,
    #[error("timestamp is in the future")]
    TooFuture,
    #[error("replay detected")]
    ReplayDetected,
    #[error("replay store error: {0}")]
    Store(#[from] UsedTimestampStoreError),
}

/// Rejects stale, future-dated and already-consumed purchase timestamps.
pub struct TimestampValidator {
    config: RwLock<GuardConfig>,
    store: Arc<dyn UsedTimestampStore>,
    time_provider: Arc<dyn TimeProvider>,
}

impl TimestampValidator {
    pub fn new(
        config: GuardConfig,
        store: Arc<dyn UsedTimestampStore>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            config: RwLock::new(config),
            store,
            time_provider,
        })
    }

    pub fn config(&self) -> GuardConfig {
        self.config.read().clone()
    }

    /// Update validator configuration at runtime.
    pub fn set_config(&self, new_config: GuardConfig) -> Result<(), Error> {
        new_config.validate()?;
        *self.config.write() = new_config;
        Ok(())
    }

    /// Validate `timestamp` (unix seconds) for the given wallet and amount.
    ///
    /// On success the triple is consumed unless `allow_reuse` is set.
    pub fn validate(
        &self,
        timestamp: u64,
        wallet: &str,
        amount: u64,
        allow_reuse: bool,
    ) -> Result<(), ReplayError> {
        let cfg = self.config();
        let now = self.time_provider.now_seconds();
        let max_age = cfg.max_age.as_secs();

        if timestamp < now.saturating_sub(max_age) {
            warn!(wallet, timestamp, now, "rejecting stale timestamp");
            return Err(ReplayError::TooOld);
        }
        if timestamp > now.saturating_add(cfg.future_tolerance.as_secs()) {
            warn!(wallet, timestamp, now, "rejecting future timestamp");
            return Err(ReplayError::TooFuture);
        }

        if allow_reuse {
            return Ok(());
        }

        let key = UsedKey::new(wallet, timestamp, amount);

        // Past this point the timestamp itself is stale, so the key can go.
        let expires_at = timestamp.saturating_add(max_age).saturating_add(1);
        if !self.store.insert_if_absent(key, expires_at, now)? {
            warn!(wallet, timestamp, amount, "replayed purchase authorization");
            return Err(ReplayError::ReplayDetected);
        }
        Ok(())
    }

    /// Whether the triple has already been consumed.
    pub fn is_consumed(&self, timestamp: u64, wallet: &str, amount: u64) -> Result<bool, ReplayError> {
        let now = self.time_provider.now_seconds();
        Ok(self.store.contains(&UsedKey::new(wallet, timestamp, amount), now)?)
    }

    /// Give back a triple consumed by `validate` when the purchase it guarded
    /// was not recorded. Returns whether a key was removed.
    pub fn release(&self, timestamp: u64, wallet: &str, amount: u64) -> Result<bool, ReplayError> {
        let released = self.store.remove(&UsedKey::new(wallet, timestamp, amount))?;
        if released {
            debug!(wallet, timestamp, amount, "released purchase authorization");
        }
        Ok(released)
    }

    /// Drop consumed keys whose window has passed.
    pub fn sweep(&self) -> Result<usize, ReplayError> {
        let removed = self.store.purge_expired(self.time_provider.now_seconds())?;
        debug!(removed, remaining = self.store.len(), "swept used timestamps");
        Ok(removed)
    }

    pub fn tracked(&self) -> usize {
        self.store.len()
    }
}
