use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::store::types::{
    LeaderboardEntry, NewPurchase, Purchase, PurchaseFilter, PurchaseStatus, StockRecord,
};
use crate::store::{PurchaseStore, StoreError, DEFAULT_LIST_LIMIT};

#[derive(Debug, Default)]
struct Inner {
    purchases: Vec<Purchase>,
    stock: BTreeMap<String, StockRecord>,
}

/// Process-local store for development and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stock(stock: impl IntoIterator<Item = (String, u32)>) -> Self {
        let store = Self::new();
        {
            let mut inner = store.inner.write();
            for (prize_id, count) in stock {
                inner.stock.insert(
                    prize_id.clone(),
                    StockRecord {
                        prize_id,
                        count,
                        initial_count: count,
                    },
                );
            }
        }
        store
    }

    pub fn purchase_count(&self) -> usize {
        self.inner.read().purchases.len()
    }

    pub fn stock_of(&self, prize_id: &str) -> Option<u32> {
        self.inner.read().stock.get(prize_id).map(|s| s.count)
    }
}

#[async_trait]
impl PurchaseStore for MemoryStore {
    async fn insert_purchase(&self, purchase: NewPurchase) -> Result<Purchase, StoreError> {
        let mut inner = self.inner.write();
        if inner
            .purchases
            .iter()
            .any(|p| p.transaction_signature == purchase.transaction_signature)
        {
            return Err(StoreError::Duplicate(purchase.transaction_signature));
        }
        let row = Purchase::from_new(Uuid::new_v4(), purchase, Utc::now());
        inner.purchases.push(row.clone());
        Ok(row)
    }

    async fn get_purchase(&self, id: Uuid) -> Result<Option<Purchase>, StoreError> {
        Ok(self.inner.read().purchases.iter().find(|p| p.id == id).cloned())
    }

    async fn list_purchases(&self, filter: PurchaseFilter) -> Result<Vec<Purchase>, StoreError> {
        let inner = self.inner.read();
        let limit = filter.limit.unwrap_or(DEFAULT_LIST_LIMIT);
        Ok(inner
            .purchases
            .iter()
            .rev()
            .filter(|p| filter.wallet.as_deref().map_or(true, |w| p.wallet == w))
            .filter(|p| filter.status.map_or(true, |s| p.status == s))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: PurchaseStatus,
        to: PurchaseStatus,
    ) -> Result<Purchase, StoreError> {
        let mut inner = self.inner.write();
        let row = inner
            .purchases
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(StoreError::NotFound)?;
        if row.status != from {
            return Err(StoreError::Conflict(format!(
                "purchase {id} is {}, expected {from}",
                row.status
            )));
        }
        row.status = to;
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn decrement_stock(&self, prize_id: &str) -> Result<u32, StoreError> {
        let mut inner = self.inner.write();
        let record = inner
            .stock
            .get_mut(prize_id)
            .ok_or_else(|| StoreError::OutOfStock(prize_id.to_owned()))?;
        if record.count == 0 {
            return Err(StoreError::OutOfStock(prize_id.to_owned()));
        }
        record.count -= 1;
        Ok(record.count)
    }

    async fn increment_stock(&self, prize_id: &str) -> Result<u32, StoreError> {
        let mut inner = self.inner.write();
        let record = inner.stock.get_mut(prize_id).ok_or(StoreError::NotFound)?;
        record.count = record.count.saturating_add(1);
        Ok(record.count)
    }

    async fn list_stock(&self) -> Result<Vec<StockRecord>, StoreError> {
        Ok(self.inner.read().stock.values().cloned().collect())
    }

    async fn set_stock(&self, prize_id: &str, count: u32) -> Result<StockRecord, StoreError> {
        let record = StockRecord {
            prize_id: prize_id.to_owned(),
            count,
            initial_count: count,
        };
        self.inner
            .write()
            .stock
            .insert(prize_id.to_owned(), record.clone());
        Ok(record)
    }

    async fn leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardEntry>, StoreError> {
        let inner = self.inner.read();
        let mut totals: HashMap<&str, LeaderboardEntry> = HashMap::new();
        for p in inner.purchases.iter().filter(|p| p.status != PurchaseStatus::Failed) {
            let entry = totals.entry(p.wallet.as_str()).or_insert_with(|| LeaderboardEntry {
                wallet: p.wallet.clone(),
                purchases: 0,
                total_tokens: 0,
            });
            entry.purchases += 1;
            entry.total_tokens = entry.total_tokens.saturating_add(p.token_amount);
        }
        let mut board: Vec<LeaderboardEntry> = totals.into_values().collect();
        board.sort_by(|a, b| {
            b.total_tokens
                .cmp(&a.total_tokens)
                .then_with(|| b.purchases.cmp(&a.purchases))
                .then_with(|| a.wallet.cmp(&b.wallet))
        });
        board.truncate(limit);
        Ok(board)
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
