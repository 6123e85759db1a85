//! Provably-fair roll derivation.
//!
//! A roll combines a client seed, a secret server seed and a nonce:
//! `SHA-256("{client}:{server}:{nonce}")`, first 8 hex characters read as a
//! `u32`, scaled by `0xFFFFFFFF`. The server publishes `server_seed_hash` up
//! front and reveals the seed after settlement so anyone can recompute the roll.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const SCALE: u32 = 0xFFFF_FFFF;

/// Deterministic roll in `[0, 1)` for the given seeds and nonce.
pub fn fair_number(client_seed: &str, server_seed: &str, nonce: u64) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(format!("{client_seed}:{server_seed}:{nonce}").as_bytes());
    let digest = hasher.finalize();

    // First 8 hex characters are the first 4 digest bytes, big-endian.
    let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    // 0xFFFFFFFF would map to exactly 1.0.
    let head = head.min(SCALE - 1);

    head as f64 / SCALE as f64
}

/// Hex SHA-256 commitment of a server seed.
pub fn server_seed_hash(server_seed: &str) -> String {
    hex::encode(Sha256::digest(server_seed.as_bytes()))
}

/// Fresh 32-byte server seed, hex encoded.
pub fn generate_server_seed() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// The public inputs of one roll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FairRoll {
    pub client_seed: String,
    pub server_seed: String,
    pub nonce: u64,
}

impl FairRoll {
    pub fn new(client_seed: impl Into<String>, server_seed: impl Into<String>, nonce: u64) -> Self {
        Self {
            client_seed: client_seed.into(),
            server_seed: server_seed.into(),
            nonce,
        }
    }

    pub fn result(&self) -> f64 {
        fair_number(&self.client_seed, &self.server_seed, self.nonce)
    }

    pub fn server_seed_hash(&self) -> String {
        server_seed_hash(&self.server_seed)
    }

    /// Whether a claimed roll is reproduced by these inputs.
    pub fn matches(&self, claimed: f64, tolerance: f64) -> bool {
        claimed.is_finite() && (self.result() - claimed).abs() <= tolerance
    }
}
