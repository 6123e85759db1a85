//! Settlement of a completed on-chain purchase.
//!
//! Order matters: the fairness proof is checked before the replay key is
//! consumed, and physical stock is reserved before the row is written. A
//! settlement that records nothing hands back both the stock unit and the
//! replay key, so the client can retry inside the window.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::fair::FairRoll;
use crate::guard::{ReplayError, TimestampValidator};
use crate::signing::{parse_wallet, SigningError};
use crate::store::{NewPurchase, Purchase, PurchaseStatus, PurchaseStore, StockRecord, StoreError};

/// Accepted gap between a claimed roll and its recomputation.
pub const FAIRNESS_TOLERANCE: f64 = 1e-9;

#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error(transparent)]
    Wallet(#[from] SigningError),
    #[error("random number does not match the provided seeds")]
    FairnessMismatch,
    #[error("token amount {claimed} does not match the authorized {authorized}")]
    AmountMismatch { claimed: u64, authorized: u64 },
    #[error("missing field {0}")]
    MissingField(&'static str),
    #[error(transparent)]
    Replay(#[from] ReplayError),
    #[error("cannot move purchase from {from} to {to}")]
    InvalidTransition {
        from: PurchaseStatus,
        to: PurchaseStatus,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Body of `POST /api/save-purchase`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavePurchase {
    pub wallet: String,
    #[serde(default)]
    pub nft_mint: Option<String>,
    pub transaction_signature: String,
    pub prize_id: String,
    #[serde(default)]
    pub prize_name: Option<String>,
    #[serde(default)]
    pub token_amount: Option<u64>,
    pub random_number: f64,
    pub user_seed: String,
    pub server_seed: String,
    pub nonce: u64,
    pub timestamp: u64,
}

pub struct SettlementService {
    validator: Arc<TimestampValidator>,
    store: Arc<dyn PurchaseStore>,
    physical_prizes: HashSet<String>,
    default_token_amount: u64,
}

impl SettlementService {
    pub fn new(
        validator: Arc<TimestampValidator>,
        store: Arc<dyn PurchaseStore>,
        physical_prizes: HashSet<String>,
        default_token_amount: u64,
    ) -> Self {
        Self {
            validator,
            store,
            physical_prizes,
            default_token_amount,
        }
    }

    pub fn validator(&self) -> &Arc<TimestampValidator> {
        &self.validator
    }

    pub fn store(&self) -> &Arc<dyn PurchaseStore> {
        &self.store
    }

    pub fn is_physical(&self, prize_id: &str) -> bool {
        self.physical_prizes.contains(prize_id)
    }

    pub async fn save_purchase(&self, req: SavePurchase) -> Result<Purchase, SettlementError> {
        let wallet = bs58::encode(parse_wallet(&req.wallet)?).into_string();
        if req.transaction_signature.trim().is_empty() {
            return Err(SettlementError::MissingField("transactionSignature"));
        }
        if req.prize_id.trim().is_empty() {
            return Err(SettlementError::MissingField("prizeId"));
        }

        let token_amount = self.default_token_amount;
        if let Some(claimed) = req.token_amount.filter(|claimed| *claimed != token_amount) {
            warn!(%wallet, claimed, authorized = token_amount, "token amount mismatch");
            return Err(SettlementError::AmountMismatch {
                claimed,
                authorized: token_amount,
            });
        }

        let roll = FairRoll::new(req.user_seed.clone(), req.server_seed.clone(), req.nonce);
        if !roll.matches(req.random_number, FAIRNESS_TOLERANCE) {
            warn!(
                %wallet,
                claimed = req.random_number,
                expected = roll.result(),
                "fairness proof mismatch"
            );
            return Err(SettlementError::FairnessMismatch);
        }

        self.validator
            .validate(req.timestamp, &wallet, token_amount, false)?;

        let physical = self.is_physical(&req.prize_id);
        if physical {
            match self.store.decrement_stock(&req.prize_id).await {
                Ok(remaining) => info!(prize_id = %req.prize_id, remaining, "reserved physical prize"),
                Err(err) => {
                    self.release_authorization(req.timestamp, &wallet, token_amount);
                    return Err(err.into());
                }
            }
        }

        let new = NewPurchase {
            wallet: wallet.clone(),
            nft_mint: req.nft_mint,
            transaction_signature: req.transaction_signature,
            prize_id: req.prize_id.clone(),
            prize_name: req.prize_name,
            token_amount,
            random_result: roll.result(),
            server_seed_hash: roll.server_seed_hash(),
            server_seed: roll.server_seed,
            client_seed: roll.client_seed,
            nonce: roll.nonce,
            authorized_at: req.timestamp,
            status: PurchaseStatus::Completed,
        };

        match self.store.insert_purchase(new).await {
            Ok(row) => {
                info!(id = %row.id, wallet = %row.wallet, prize_id = %row.prize_id, "purchase settled");
                Ok(row)
            }
            Err(err) => {
                if physical {
                    if let Err(release) = self.store.increment_stock(&req.prize_id).await {
                        error!(
                            prize_id = %req.prize_id,
                            error = %release,
                            "failed to release reserved stock"
                        );
                    }
                }
                self.release_authorization(req.timestamp, &wallet, token_amount);
                Err(err.into())
            }
        }
    }

    /// Unburn the authorization of a settlement that recorded nothing.
    fn release_authorization(&self, timestamp: u64, wallet: &str, token_amount: u64) {
        if let Err(err) = self.validator.release(timestamp, wallet, token_amount) {
            error!(wallet, timestamp, error = %err, "failed to release purchase authorization");
        }
    }

    /// Admin status change; only forward transitions are accepted.
    pub async fn update_status(
        &self,
        id: Uuid,
        to: PurchaseStatus,
    ) -> Result<Purchase, SettlementError> {
        let current = self
            .store
            .get_purchase(id)
            .await?
            .ok_or(StoreError::NotFound)?;
        if !current.status.can_transition_to(to) {
            return Err(SettlementError::InvalidTransition {
                from: current.status,
                to,
            });
        }
        let row = self.store.transition_status(id, current.status, to).await?;
        info!(%id, from = %current.status, to = %to, "purchase status updated");
        Ok(row)
    }

    pub async fn restock(&self, prize_id: &str, count: u32) -> Result<StockRecord, SettlementError> {
        let record = self.store.set_stock(prize_id, count).await?;
        info!(prize_id, count, "stock updated");
        Ok(record)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::fair::fair_number;
    use crate::guard::{GuardConfig, MokaUsedTimestamps};
    use crate::store::MemoryStore;
    use crate::time::ManualClock;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) const NOW: u64 = 1_700_000_000;

    pub(crate) fn wallet() -> String {
        bs58::encode([3u8; 32]).into_string()
    }

    pub(crate) fn request(tx: &str, prize: &str) -> SavePurchase {
        SavePurchase {
            wallet: wallet(),
            nft_mint: Some("mint".into()),
            transaction_signature: tx.into(),
            prize_id: prize.into(),
            prize_name: None,
            token_amount: None,
            random_number: fair_number("client", "server", 7),
            user_seed: "client".into(),
            server_seed: "server".into(),
            nonce: 7,
            timestamp: NOW,
        }
    }

    fn service(store: Arc<dyn PurchaseStore>) -> SettlementService {
        let validator = TimestampValidator::new(
            GuardConfig::default(),
            Arc::new(MokaUsedTimestamps::new(128)),
            Arc::new(ManualClock::new(NOW)),
        )
        .unwrap();
        SettlementService::new(
            Arc::new(validator),
            store,
            HashSet::from(["hoodie".to_owned()]),
            10_000_000_000,
        )
    }

    #[tokio::test]
    async fn physical_prize_decrements_stock() {
        let store = Arc::new(MemoryStore::with_stock([("hoodie".to_owned(), 2)]));
        let svc = service(store.clone());
        let row = svc.save_purchase(request("tx1", "hoodie")).await.unwrap();
        assert_eq!(row.status, PurchaseStatus::Completed);
        assert_eq!(row.token_amount, 10_000_000_000);
        assert_eq!(row.server_seed_hash, crate::fair::server_seed_hash("server"));
        assert_eq!(store.stock_of("hoodie"), Some(1));
    }

    #[tokio::test]
    async fn digital_prize_leaves_stock_alone() {
        let store = Arc::new(MemoryStore::with_stock([("hoodie".to_owned(), 2)]));
        let svc = service(store.clone());
        svc.save_purchase(request("tx1", "sticker")).await.unwrap();
        assert_eq!(store.stock_of("hoodie"), Some(2));
        assert_eq!(store.purchase_count(), 1);
    }

    #[tokio::test]
    async fn replayed_settlement_rejected() {
        let store = Arc::new(MemoryStore::new());
        let svc = service(store.clone());
        svc.save_purchase(request("tx1", "sticker")).await.unwrap();
        let err = svc.save_purchase(request("tx2", "sticker")).await.unwrap_err();
        assert!(matches!(err, SettlementError::Replay(ReplayError::ReplayDetected)));
        assert_eq!(store.purchase_count(), 1);
    }

    #[tokio::test]
    async fn wrong_random_number_does_not_burn_the_key() {
        let store = Arc::new(MemoryStore::new());
        let svc = service(store.clone());
        let mut bad = request("tx1", "sticker");
        bad.random_number = 0.123;
        assert!(matches!(
            svc.save_purchase(bad).await,
            Err(SettlementError::FairnessMismatch)
        ));
        svc.save_purchase(request("tx1", "sticker")).await.unwrap();
    }

    #[tokio::test]
    async fn out_of_stock_stops_settlement() {
        let store = Arc::new(MemoryStore::with_stock([("hoodie".to_owned(), 0)]));
        let svc = service(store.clone());
        let err = svc.save_purchase(request("tx1", "hoodie")).await.unwrap_err();
        assert!(matches!(err, SettlementError::Store(StoreError::OutOfStock(_))));
        assert_eq!(store.purchase_count(), 0);
    }

    /// Store whose next `failures` inserts fail before delegating to `inner`.
    pub(crate) struct FailingInsert {
        pub(crate) inner: MemoryStore,
        failures: AtomicUsize,
    }

    impl FailingInsert {
        pub(crate) fn always(inner: MemoryStore) -> Self {
            Self::times(usize::MAX, inner)
        }

        pub(crate) fn times(failures: usize, inner: MemoryStore) -> Self {
            Self {
                inner,
                failures: AtomicUsize::new(failures),
            }
        }
    }

    #[async_trait]
    impl PurchaseStore for FailingInsert {
        async fn insert_purchase(&self, purchase: NewPurchase) -> Result<Purchase, StoreError> {
            let failed = self
                .failures
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1))
                .is_ok();
            if failed {
                return Err(StoreError::Request("connection reset".into()));
            }
            self.inner.insert_purchase(purchase).await
        }
        async fn get_purchase(&self, id: Uuid) -> Result<Option<Purchase>, StoreError> {
            self.inner.get_purchase(id).await
        }
        async fn list_purchases(
            &self,
            filter: crate::store::PurchaseFilter,
        ) -> Result<Vec<Purchase>, StoreError> {
            self.inner.list_purchases(filter).await
        }
        async fn transition_status(
            &self,
            id: Uuid,
            from: PurchaseStatus,
            to: PurchaseStatus,
        ) -> Result<Purchase, StoreError> {
            self.inner.transition_status(id, from, to).await
        }
        async fn decrement_stock(&self, prize_id: &str) -> Result<u32, StoreError> {
            self.inner.decrement_stock(prize_id).await
        }
        async fn increment_stock(&self, prize_id: &str) -> Result<u32, StoreError> {
            self.inner.increment_stock(prize_id).await
        }
        async fn list_stock(&self) -> Result<Vec<StockRecord>, StoreError> {
            self.inner.list_stock().await
        }
        async fn set_stock(&self, prize_id: &str, count: u32) -> Result<StockRecord, StoreError> {
            self.inner.set_stock(prize_id, count).await
        }
        async fn leaderboard(
            &self,
            limit: usize,
        ) -> Result<Vec<crate::store::LeaderboardEntry>, StoreError> {
            self.inner.leaderboard(limit).await
        }
        fn kind(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn failed_insert_releases_reserved_stock() {
        let store = Arc::new(FailingInsert::always(MemoryStore::with_stock([(
            "hoodie".to_owned(),
            1,
        )])));
        let svc = service(store.clone());
        let err = svc.save_purchase(request("tx1", "hoodie")).await.unwrap_err();
        assert!(matches!(err, SettlementError::Store(StoreError::Request(_))));
        assert_eq!(store.inner.stock_of("hoodie"), Some(1));
    }

    #[tokio::test]
    async fn retry_after_transient_insert_failure_settles() {
        let store = Arc::new(FailingInsert::times(
            1,
            MemoryStore::with_stock([("hoodie".to_owned(), 1)]),
        ));
        let svc = service(store.clone());
        let err = svc.save_purchase(request("tx1", "hoodie")).await.unwrap_err();
        assert!(matches!(err, SettlementError::Store(StoreError::Request(_))));
        assert!(!svc.validator().is_consumed(NOW, &wallet(), 10_000_000_000).unwrap());

        svc.save_purchase(request("tx1", "hoodie")).await.unwrap();
        assert_eq!(store.inner.purchase_count(), 1);
        assert_eq!(store.inner.stock_of("hoodie"), Some(0));
        assert!(svc.validator().is_consumed(NOW, &wallet(), 10_000_000_000).unwrap());
    }

    #[tokio::test]
    async fn out_of_stock_leaves_the_authorization_usable() {
        let store = Arc::new(MemoryStore::with_stock([("hoodie".to_owned(), 0)]));
        let svc = service(store.clone());
        svc.save_purchase(request("tx1", "hoodie")).await.unwrap_err();

        svc.restock("hoodie", 1).await.unwrap();
        svc.save_purchase(request("tx1", "hoodie")).await.unwrap();
        assert_eq!(store.stock_of("hoodie"), Some(0));
    }

    #[tokio::test]
    async fn padded_wallet_is_the_same_authorization() {
        let store = Arc::new(MemoryStore::new());
        let svc = service(store.clone());
        let row = svc.save_purchase(request("tx1", "sticker")).await.unwrap();
        assert_eq!(row.wallet, wallet());

        for padded in [format!(" {}", wallet()), format!("{}\n", wallet()), format!("\t{} ", wallet())] {
            let mut replay = request("tx2", "sticker");
            replay.wallet = padded;
            let err = svc.save_purchase(replay).await.unwrap_err();
            assert!(matches!(err, SettlementError::Replay(ReplayError::ReplayDetected)));
        }
        assert_eq!(store.purchase_count(), 1);
    }

    #[tokio::test]
    async fn client_token_amount_must_match_the_authorized_one() {
        let store = Arc::new(MemoryStore::new());
        let svc = service(store.clone());

        for claimed in [u64::MAX, 1, 10_000_000_001] {
            let mut forged = request("tx1", "sticker");
            forged.token_amount = Some(claimed);
            let err = svc.save_purchase(forged).await.unwrap_err();
            assert!(matches!(
                err,
                SettlementError::AmountMismatch { authorized: 10_000_000_000, .. }
            ));
        }
        assert_eq!(store.purchase_count(), 0);
        assert!(!svc.validator().is_consumed(NOW, &wallet(), u64::MAX).unwrap());

        let mut honest = request("tx1", "sticker");
        honest.token_amount = Some(10_000_000_000);
        let row = svc.save_purchase(honest).await.unwrap();
        assert_eq!(row.token_amount, 10_000_000_000);

        let board = store.leaderboard(10).await.unwrap();
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].total_tokens, 10_000_000_000);
    }

    #[tokio::test]
    async fn status_updates_follow_the_lifecycle() {
        let store = Arc::new(MemoryStore::new());
        let svc = service(store.clone());
        let row = svc.save_purchase(request("tx1", "sticker")).await.unwrap();

        let delivered = svc.update_status(row.id, PurchaseStatus::Delivered).await.unwrap();
        assert_eq!(delivered.status, PurchaseStatus::Delivered);

        let err = svc.update_status(row.id, PurchaseStatus::Failed).await.unwrap_err();
        assert!(matches!(
            err,
            SettlementError::InvalidTransition {
                from: PurchaseStatus::Delivered,
                to: PurchaseStatus::Failed
            }
        ));

        let missing = svc.update_status(Uuid::new_v4(), PurchaseStatus::Failed).await;
        assert!(matches!(missing, Err(SettlementError::Store(StoreError::NotFound))));
    }

    #[tokio::test]
    async fn invalid_wallet_rejected_before_anything_else() {
        let store = Arc::new(MemoryStore::new());
        let svc = service(store.clone());
        let mut req = request("tx1", "sticker");
        req.wallet = "nope".into();
        assert!(matches!(
            svc.save_purchase(req).await,
            Err(SettlementError::Wallet(_))
        ));
    }
}
