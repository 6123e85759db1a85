//! Background maintenance for the in-memory guards.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error};

use crate::guard::TimestampValidator;
use crate::ratelimit::RateLimits;

/// Purge expired replay keys every `every`.
pub fn spawn_replay_sweeper(validator: Arc<TimestampValidator>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match validator.sweep() {
                Ok(removed) => debug!(removed, "replay sweep"),
                Err(e) => error!(error = %e, "replay sweep failed"),
            }
        }
    })
}

/// Drop ended rate-limit windows every `every`.
pub fn spawn_rate_limit_sweeper(limits: Arc<RateLimits>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = limits.cleanup();
            debug!(removed, "rate limit sweep");
        }
    })
}
