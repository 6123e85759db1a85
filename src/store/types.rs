use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseStatus {
    Pending,
    Completed,
    Delivered,
    Failed,
}

impl PurchaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseStatus::Pending => "pending",
            PurchaseStatus::Completed => "completed",
            PurchaseStatus::Delivered => "delivered",
            PurchaseStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PurchaseStatus::Delivered | PurchaseStatus::Failed)
    }

    pub fn can_transition_to(&self, next: PurchaseStatus) -> bool {
        use PurchaseStatus::*;
        matches!(
            (self, next),
            (Pending, Completed) | (Pending, Failed) | (Completed, Delivered) | (Completed, Failed)
        )
    }
}

impl Display for PurchaseStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PurchaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(PurchaseStatus::Pending),
            "completed" => Ok(PurchaseStatus::Completed),
            "delivered" => Ok(PurchaseStatus::Delivered),
            "failed" => Ok(PurchaseStatus::Failed),
            other => Err(format!("unknown purchase status {other:?}")),
        }
    }
}

/// Row to insert on settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPurchase {
    pub wallet: String,
    pub nft_mint: Option<String>,
    pub transaction_signature: String,
    pub prize_id: String,
    pub prize_name: Option<String>,
    pub token_amount: u64,
    pub random_result: f64,
    pub server_seed: String,
    pub server_seed_hash: String,
    pub client_seed: String,
    pub nonce: u64,
    pub authorized_at: u64,
    pub status: PurchaseStatus,
}

/// Stored purchase row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Purchase {
    pub id: Uuid,
    pub wallet: String,
    pub nft_mint: Option<String>,
    pub transaction_signature: String,
    pub prize_id: String,
    pub prize_name: Option<String>,
    pub token_amount: u64,
    pub random_result: f64,
    pub server_seed: String,
    pub server_seed_hash: String,
    pub client_seed: String,
    pub nonce: u64,
    pub authorized_at: u64,
    pub status: PurchaseStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Purchase {
    pub fn from_new(id: Uuid, new: NewPurchase, now: DateTime<Utc>) -> Self {
        Self {
            id,
            wallet: new.wallet,
            nft_mint: new.nft_mint,
            transaction_signature: new.transaction_signature,
            prize_id: new.prize_id,
            prize_name: new.prize_name,
            token_amount: new.token_amount,
            random_result: new.random_result,
            server_seed: new.server_seed,
            server_seed_hash: new.server_seed_hash,
            client_seed: new.client_seed,
            nonce: new.nonce,
            authorized_at: new.authorized_at,
            status: new.status,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurchaseFilter {
    pub wallet: Option<String>,
    pub status: Option<PurchaseStatus>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    pub prize_id: String,
    pub count: u32,
    pub initial_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub wallet: String,
    pub purchases: u64,
    pub total_tokens: u64,
}
