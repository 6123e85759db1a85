//! Replay guard for signed purchase authorizations.
//!
//! Each `(wallet, timestamp, amount)` triple may settle once inside the
//! validity window:
//! - Stale and far-future timestamps are rejected outright.
//! - Consumed triples live in a replay store until `timestamp + max_age`.
//! - A periodic sweep drops expired entries to bound memory.
//!
//! State is process-local; separate instances do not share consumed keys.

pub mod cache;
pub mod types;
pub mod validator;

pub use cache::{MokaUsedTimestamps, UsedTimestampStore, UsedTimestampStoreError};
pub use types::{GuardConfig, UsedKey};
pub use validator::{ReplayError, TimestampValidator};
