//! Ethereum primitives on top of `alloy`: addresses, local signing keys,
//! recoverable signatures and EIP-712 digests.

pub mod eip712;

use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use thiserror::Error;

pub use alloy::primitives::{keccak256, Address, Signature, B256, U256};

/// Local secp256k1 key used for heartbeats, payment authorizations and
/// transaction signing.
pub type Wallet = PrivateKeySigner;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("signing failed: {0}")]
    Signing(String),
}

/// Parse a hex private key, with or without `0x`.
pub fn parse_wallet(key: &str) -> Result<Wallet, CryptoError> {
    key.trim()
        .parse::<PrivateKeySigner>()
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

pub fn sign_digest(wallet: &Wallet, digest: &B256) -> Result<Signature, CryptoError> {
    wallet
        .sign_hash_sync(digest)
        .map_err(|e| CryptoError::Signing(e.to_string()))
}

pub fn recover_signer(digest: &B256, signature: &Signature) -> Result<Address, CryptoError> {
    signature
        .recover_address_from_prehash(digest)
        .map_err(|e| CryptoError::InvalidSignature(e.to_string()))
}

/// Decode hex with or without a `0x` prefix.
pub fn decode_hex(value: &str) -> Result<Vec<u8>, CryptoError> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    hex::decode(digits).map_err(|e| CryptoError::InvalidHex(e.to_string()))
}

/// Parse a 65-byte `r || s || v` signature. `v` may be 0/1 or 27/28.
pub fn parse_signature(value: &str) -> Result<Signature, CryptoError> {
    let bytes = decode_hex(value)?;
    if bytes.len() != 65 {
        return Err(CryptoError::InvalidSignature(format!(
            "expected 65 bytes, got {}",
            bytes.len()
        )));
    }
    Signature::from_raw(&bytes).map_err(|e| CryptoError::InvalidSignature(e.to_string()))
}

/// `0x`-prefixed `r || s || v` with `v` in 27/28.
pub fn signature_to_hex(signature: &Signature) -> String {
    format!("0x{}", hex::encode(signature.as_bytes()))
}

/// Serde adapter that keeps signatures in their 65-byte hex wire form.
pub mod signature_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::Signature;

    pub fn serialize<S: Serializer>(signature: &Signature, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::signature_to_hex(signature))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Signature, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_signature(&raw).map_err(serde::de::Error::custom)
    }
}
