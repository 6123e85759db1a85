use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use moka::sync::Cache;

use crate::guard::types::UsedKey;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsedTimestampStoreError {
    #[error("replay store is full ({capacity} keys)")]
    Full { capacity: u64 },
    #[error("replay store backend failed: {0}")]
    Backend(String),
}

/// Consumed `(wallet, timestamp, amount)` keys with their expiry.
///
/// A key stays consumed until its expiry passes. Implementations must never
/// drop a live key to make room; a full store refuses new keys instead.
pub trait UsedTimestampStore: Send + Sync {
    /// Consume `key` until `expires_at`. `Ok(false)` means it is already consumed.
    fn insert_if_absent(
        &self,
        key: UsedKey,
        expires_at: u64,
        now: u64,
    ) -> Result<bool, UsedTimestampStoreError>;

    fn contains(&self, key: &UsedKey, now: u64) -> Result<bool, UsedTimestampStoreError>;

    /// Hand a consumed key back; `Ok(false)` when it was not stored.
    fn remove(&self, key: &UsedKey) -> Result<bool, UsedTimestampStoreError>;

    /// Drop entries expiring at or before `now`, returning how many went.
    fn purge_expired(&self, now: u64) -> Result<usize, UsedTimestampStoreError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Unbounded `moka` cache of expiry times with a hard key budget.
///
/// The cache itself never evicts. `capacity` is enforced on insert: when the
/// budget is spent, expired keys are purged first and the insert fails with
/// `Full` if that frees nothing.
#[derive(Debug, Clone)]
pub struct MokaUsedTimestamps {
    inner: Cache<UsedKey, u64>,
    capacity: u64,
    stored: Arc<AtomicU64>,
}

impl MokaUsedTimestamps {
    pub fn new(capacity: u64) -> Self {
        Self {
            inner: Cache::builder().build(),
            capacity,
            stored: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    fn at_capacity(&self) -> bool {
        self.stored.load(Ordering::Acquire) >= self.capacity
    }

    fn forget(&self, key: &UsedKey) -> bool {
        let removed = self.inner.remove(key).is_some();
        if removed {
            self.stored.fetch_sub(1, Ordering::AcqRel);
        }
        removed
    }
}

impl UsedTimestampStore for MokaUsedTimestamps {
    fn insert_if_absent(
        &self,
        key: UsedKey,
        expires_at: u64,
        now: u64,
    ) -> Result<bool, UsedTimestampStoreError> {
        if self.at_capacity() {
            self.purge_expired(now)?;
            if self.at_capacity() {
                if self.contains(&key, now)? {
                    return Ok(false);
                }
                return Err(UsedTimestampStoreError::Full {
                    capacity: self.capacity,
                });
            }
        }

        // One fresh insert per key even under concurrent callers.
        let entry = self
            .inner
            .entry(key)
            .or_insert_with_if(|| expires_at, |exp| *exp <= now);
        if entry.is_fresh() && !entry.is_old_value_replaced() {
            self.stored.fetch_add(1, Ordering::AcqRel);
        }
        Ok(entry.is_fresh())
    }

    fn contains(&self, key: &UsedKey, now: u64) -> Result<bool, UsedTimestampStoreError> {
        Ok(self.inner.get(key).is_some_and(|exp| exp > now))
    }

    fn remove(&self, key: &UsedKey) -> Result<bool, UsedTimestampStoreError> {
        Ok(self.forget(key))
    }

    fn purge_expired(&self, now: u64) -> Result<usize, UsedTimestampStoreError> {
        // An expired key is never re-inserted: its timestamp is already stale.
        let expired: Vec<UsedKey> = self
            .inner
            .iter()
            .filter(|(_, exp)| *exp <= now)
            .map(|(key, _)| *key)
            .collect();
        Ok(expired.iter().filter(|key| self.forget(key)).count())
    }

    fn len(&self) -> usize {
        self.stored.load(Ordering::Acquire) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_insert_of_live_key_is_refused() {
        let store = MokaUsedTimestamps::new(16);
        let key = UsedKey::new("w", 1, 1);
        assert!(store.insert_if_absent(key, 100, 10).unwrap());
        assert!(!store.insert_if_absent(key, 100, 20).unwrap());
        assert!(store.contains(&key, 20).unwrap());
    }

    #[test]
    fn expired_key_can_be_inserted_again() {
        let store = MokaUsedTimestamps::new(16);
        let key = UsedKey::new("w", 1, 1);
        assert!(store.insert_if_absent(key, 100, 10).unwrap());
        assert!(!store.contains(&key, 100).unwrap());
        assert!(store.insert_if_absent(key, 400, 100).unwrap());
    }

    #[test]
    fn purge_removes_only_expired_entries() {
        let store = MokaUsedTimestamps::new(16);
        let old = UsedKey::new("w", 1, 1);
        let fresh = UsedKey::new("w", 2, 1);
        store.insert_if_absent(old, 50, 0).unwrap();
        store.insert_if_absent(fresh, 500, 0).unwrap();

        assert_eq!(store.purge_expired(100).unwrap(), 1);
        assert!(!store.contains(&old, 0).unwrap());
        assert!(store.contains(&fresh, 100).unwrap());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn full_store_refuses_new_keys_and_keeps_consumed_ones() {
        let store = MokaUsedTimestamps::new(16);
        let victim = UsedKey::new("victim", 1, 1);
        assert!(store.insert_if_absent(victim, 1_000, 0).unwrap());
        for ts in 0..15 {
            assert!(store.insert_if_absent(UsedKey::new("filler", ts, 1), 1_000, 0).unwrap());
        }
        assert_eq!(store.len(), 16);

        for ts in 100..2_100 {
            assert_eq!(
                store.insert_if_absent(UsedKey::new("flood", ts, 1), 1_000, 0),
                Err(UsedTimestampStoreError::Full { capacity: 16 })
            );
        }
        assert!(store.contains(&victim, 0).unwrap());
        assert!(!store.insert_if_absent(victim, 1_000, 0).unwrap());
        assert_eq!(store.len(), 16);
    }

    #[test]
    fn full_store_makes_room_from_expired_keys() {
        let store = MokaUsedTimestamps::new(2);
        let old = UsedKey::new("w", 1, 1);
        let live = UsedKey::new("w", 2, 1);
        store.insert_if_absent(old, 50, 0).unwrap();
        store.insert_if_absent(live, 500, 0).unwrap();

        assert!(store.insert_if_absent(UsedKey::new("w", 3, 1), 500, 100).unwrap());
        assert!(store.contains(&live, 100).unwrap());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn removed_key_can_be_consumed_again() {
        let store = MokaUsedTimestamps::new(4);
        let key = UsedKey::new("w", 1, 1);
        assert!(store.insert_if_absent(key, 100, 0).unwrap());
        assert!(store.remove(&key).unwrap());
        assert!(!store.remove(&key).unwrap());
        assert!(store.is_empty());
        assert!(store.insert_if_absent(key, 100, 0).unwrap());
    }

    #[test]
    fn replacing_an_expired_key_does_not_grow_the_count() {
        let store = MokaUsedTimestamps::new(4);
        let key = UsedKey::new("w", 1, 1);
        store.insert_if_absent(key, 10, 0).unwrap();
        assert!(store.insert_if_absent(key, 100, 20).unwrap());
        assert_eq!(store.len(), 1);
    }
}
