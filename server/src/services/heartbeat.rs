//! Owner-side heartbeat construction.

use rand::RngCore;

use crate::crypto::eip712::HeartbeatDomain;
use crate::crypto::{sign_digest, CryptoError, Wallet};
use crate::models::SignedHeartbeat;

pub struct HeartbeatSigner {
    wallet: Wallet,
}

impl HeartbeatSigner {
    pub fn new(wallet: Wallet) -> Self {
        Self { wallet }
    }

    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    /// Sign a heartbeat for `vault_id` at `timestamp` with a fresh OS-random nonce.
    pub fn sign(
        &self,
        domain: &HeartbeatDomain,
        vault_id: u64,
        timestamp: u64,
    ) -> Result<SignedHeartbeat, CryptoError> {
        let nonce = rand::rngs::OsRng.next_u64();
        self.sign_with_nonce(domain, vault_id, timestamp, nonce)
    }

    pub fn sign_with_nonce(
        &self,
        domain: &HeartbeatDomain,
        vault_id: u64,
        timestamp: u64,
        nonce: u64,
    ) -> Result<SignedHeartbeat, CryptoError> {
        let digest = domain.digest(vault_id, timestamp, nonce);
        Ok(SignedHeartbeat {
            vault_id,
            timestamp,
            nonce,
            signature: sign_digest(&self.wallet, &digest)?,
        })
    }
}
