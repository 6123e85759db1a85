//! Backend-signed purchase authorizations.
//!
//! The on-chain program accepts a purchase only when it carries an Ed25519
//! signature by the backend key over `wallet || amount_le || timestamp_le`.

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

pub const AUTHORIZATION_MESSAGE_LEN: usize = 32 + 8 + 8;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SigningError {
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
    #[error("invalid wallet address: {0}")]
    InvalidWallet(String),
}

/// Decode a base58 Solana address into its 32 pubkey bytes.
pub fn parse_wallet(wallet: &str) -> Result<[u8; 32], SigningError> {
    let bytes = bs58::decode(wallet.trim())
        .into_vec()
        .map_err(|e| SigningError::InvalidWallet(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| SigningError::InvalidWallet(format!("expected 32 bytes, got {}", b.len())))
}

pub fn authorization_message(
    wallet: &[u8; 32],
    amount: u64,
    timestamp: u64,
) -> [u8; AUTHORIZATION_MESSAGE_LEN] {
    let mut msg = [0u8; AUTHORIZATION_MESSAGE_LEN];
    msg[..32].copy_from_slice(wallet);
    msg[32..40].copy_from_slice(&amount.to_le_bytes());
    msg[40..].copy_from_slice(&timestamp.to_le_bytes());
    msg
}

/// Payload returned to the client for on-chain submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseAuthorization {
    pub wallet: String,
    pub token_amount: u64,
    pub timestamp: u64,
    pub signature: Vec<u8>,
    pub backend_pubkey: String,
}

pub struct PurchaseSigner {
    key: SigningKey,
}

impl fmt::Debug for PurchaseSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PurchaseSigner")
            .field("pubkey", &self.pubkey_base58())
            .finish_non_exhaustive()
    }
}

impl PurchaseSigner {
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    /// Load a key from `PRIVATE_KEY` text.
    ///
    /// Accepts a base58 64-byte keypair, a base58 32-byte seed, or a JSON
    /// byte array as written by `solana-keygen`.
    pub fn from_encoded(encoded: &str) -> Result<Self, SigningError> {
        let encoded = encoded.trim();
        let bytes = if encoded.starts_with('[') {
            serde_json::from_str::<Vec<u8>>(encoded)
                .map_err(|e| SigningError::InvalidKey(format!("bad keypair json: {e}")))?
        } else {
            bs58::decode(encoded)
                .into_vec()
                .map_err(|e| SigningError::InvalidKey(format!("bad base58: {e}")))?
        };

        let key = match bytes.len() {
            32 => {
                let mut seed = [0u8; 32];
                seed.copy_from_slice(&bytes);
                SigningKey::from_bytes(&seed)
            }
            64 => {
                let mut pair = [0u8; 64];
                pair.copy_from_slice(&bytes);
                SigningKey::from_keypair_bytes(&pair)
                    .map_err(|e| SigningError::InvalidKey(e.to_string()))?
            }
            n => {
                return Err(SigningError::InvalidKey(format!(
                    "expected 32 or 64 key bytes, got {n}"
                )))
            }
        };
        Ok(Self::new(key))
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    pub fn pubkey_base58(&self) -> String {
        bs58::encode(self.verifying_key().as_bytes()).into_string()
    }

    pub fn authorize(
        &self,
        wallet: &str,
        token_amount: u64,
        timestamp: u64,
    ) -> Result<PurchaseAuthorization, SigningError> {
        let wallet_bytes = parse_wallet(wallet)?;
        let msg = authorization_message(&wallet_bytes, token_amount, timestamp);
        let signature = self.key.sign(&msg);
        Ok(PurchaseAuthorization {
            wallet: wallet.trim().to_owned(),
            token_amount,
            timestamp,
            signature: signature.to_bytes().to_vec(),
            backend_pubkey: self.pubkey_base58(),
        })
    }

    /// Check that `auth` was signed by this backend key.
    pub fn verify(&self, auth: &PurchaseAuthorization) -> bool {
        let Ok(wallet) = parse_wallet(&auth.wallet) else {
            return false;
        };
        let Ok(sig_bytes) = <[u8; 64]>::try_from(auth.signature.as_slice()) else {
            return false;
        };
        if auth.backend_pubkey != self.pubkey_base58() {
            return false;
        }
        let msg = authorization_message(&wallet, auth.token_amount, auth.timestamp);
        self.verifying_key()
            .verify(&msg, &Signature::from_bytes(&sig_bytes))
            .is_ok()
    }
}
