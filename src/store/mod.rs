//! Persistence for purchases, prize stock and the leaderboard.

pub mod memory;
#[cfg(feature = "supabase")]
pub mod supabase;
pub mod types;

use async_trait::async_trait;
use uuid::Uuid;

pub use memory::MemoryStore;
#[cfg(feature = "supabase")]
pub use supabase::SupabaseStore;
pub use types::{
    LeaderboardEntry, NewPurchase, Purchase, PurchaseFilter, PurchaseStatus, StockRecord,
};

pub const DEFAULT_LIST_LIMIT: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Request(String),
    #[error("store returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode store response: {0}")]
    Decode(String),
    #[error("not found")]
    NotFound,
    #[error("prize {0} is out of stock")]
    OutOfStock(String),
    #[error("duplicate record: {0}")]
    Duplicate(String),
    #[error("conflicting update: {0}")]
    Conflict(String),
}

#[async_trait]
pub trait PurchaseStore: Send + Sync {
    async fn insert_purchase(&self, purchase: NewPurchase) -> Result<Purchase, StoreError>;

    async fn get_purchase(&self, id: Uuid) -> Result<Option<Purchase>, StoreError>;

    async fn list_purchases(&self, filter: PurchaseFilter) -> Result<Vec<Purchase>, StoreError>;

    /// Move `id` from `from` to `to`; fails with `Conflict` if the row is no longer in `from`.
    async fn transition_status(
        &self,
        id: Uuid,
        from: PurchaseStatus,
        to: PurchaseStatus,
    ) -> Result<Purchase, StoreError>;

    /// Take one unit of stock; returns the remaining count.
    async fn decrement_stock(&self, prize_id: &str) -> Result<u32, StoreError>;

    /// Return one unit of stock; returns the new count.
    async fn increment_stock(&self, prize_id: &str) -> Result<u32, StoreError>;

    async fn list_stock(&self) -> Result<Vec<StockRecord>, StoreError>;

    async fn set_stock(&self, prize_id: &str, count: u32) -> Result<StockRecord, StoreError>;

    async fn leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardEntry>, StoreError>;

    fn kind(&self) -> &'static str;
}
