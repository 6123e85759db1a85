//! Backend for a provably-fair lootbox shop on Solana.
//!
//! A purchase runs in two steps. `POST /api/purchase` returns an Ed25519
//! authorization over `(wallet, token_amount, timestamp)` that the on-chain
//! program checks. Once the transaction lands, `POST /api/save-purchase`
//! verifies the revealed seeds against the claimed roll, burns the
//! authorization timestamp so it cannot be replayed, reserves physical stock
//! and records the purchase.

pub mod api;
pub mod config;
pub mod error;
pub mod fair;
pub mod guard;
pub mod pricing;
pub mod ratelimit;
pub mod settlement;
pub mod signing;
pub mod store;
pub mod sweeper;
pub mod time;

pub use api::{router, ApiError, AppState};
pub use config::{SecretString, ServiceConfig, ServiceConfigBuilder, SolanaNetwork, SupabaseConfig};
pub use error::Error;
pub use fair::{fair_number, server_seed_hash, FairRoll};
pub use guard::{GuardConfig, MokaUsedTimestamps, ReplayError, TimestampValidator, UsedTimestampStore};
pub use pricing::{BoxType, PriceTable, PricingError};
pub use ratelimit::{RateLimitDecision, RateLimitKey, RateLimitPolicy, RateLimiter, RateLimits};
pub use settlement::{SavePurchase, SettlementError, SettlementService};
pub use signing::{PurchaseAuthorization, PurchaseSigner, SigningError};
pub use store::{MemoryStore, Purchase, PurchaseStatus, PurchaseStore, StoreError};
#[cfg(feature = "supabase")]
pub use store::SupabaseStore;
pub use time::{ManualClock, SystemTimeProvider, TimeProvider};
