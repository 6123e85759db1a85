use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::error::Error;
use crate::ratelimit::policy::RateLimitPolicy;
use crate::ratelimit::RateLimitKey;
use crate::time::TimeProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    count: u32,
    reset_at: u64,
}

/// Outcome of one `check`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Unix seconds at which the current window ends.
    pub reset_at: u64,
}

impl RateLimitDecision {
    /// Whole seconds until the window resets, never less than one.
    pub fn retry_after(&self, now: u64) -> u64 {
        self.reset_at.saturating_sub(now).max(1)
    }
}

/// Fixed-window counter per key.
pub struct RateLimiter {
    policy: RateLimitPolicy,
    windows: DashMap<RateLimitKey, Window>,
    time_provider: Arc<dyn TimeProvider>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy, time_provider: Arc<dyn TimeProvider>) -> Result<Self, Error> {
        policy.validate()?;
        Ok(Self {
            policy,
            windows: DashMap::new(),
            time_provider,
        })
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    pub fn now(&self) -> u64 {
        self.time_provider.now_seconds()
    }

    /// Count one request for `key`.
    pub fn check(&self, key: &RateLimitKey) -> RateLimitDecision {
        let now = self.now();
        let max = self.policy.max_requests;
        let window_secs = self.policy.window.as_secs();

        // The entry guard holds the shard lock for the read-modify-write.
        let decision = match self.windows.entry(key.clone()) {
            Entry::Vacant(slot) => {
                let reset_at = now.saturating_add(window_secs);
                slot.insert(Window { count: 1, reset_at });
                RateLimitDecision {
                    allowed: true,
                    limit: max,
                    remaining: max - 1,
                    reset_at,
                }
            }
            Entry::Occupied(mut slot) => {
                let window = slot.get_mut();
                if now >= window.reset_at {
                    *window = Window {
                        count: 1,
                        reset_at: now.saturating_add(window_secs),
                    };
                    RateLimitDecision {
                        allowed: true,
                        limit: max,
                        remaining: max - 1,
                        reset_at: window.reset_at,
                    }
                } else if window.count >= max {
                    RateLimitDecision {
                        allowed: false,
                        limit: max,
                        remaining: 0,
                        reset_at: window.reset_at,
                    }
                } else {
                    window.count += 1;
                    RateLimitDecision {
                        allowed: true,
                        limit: max,
                        remaining: max - window.count,
                        reset_at: window.reset_at,
                    }
                }
            }
        };

        if !decision.allowed {
            warn!(
                policy = self.policy.name,
                key = key.as_str(),
                reset_at = decision.reset_at,
                "rate limit exceeded"
            );
        }
        decision
    }

    /// Remove windows that have already ended.
    pub fn cleanup(&self) -> usize {
        let now = self.now();
        let before = self.windows.len();
        self.windows.retain(|_, window| window.reset_at > now);
        let removed = before.saturating_sub(self.windows.len());
        debug!(policy = self.policy.name, removed, "rate limit cleanup");
        removed
    }

    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}
