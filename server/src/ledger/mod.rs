//! The vault ledger: authoritative vault state behind a narrow async trait.
//!
//! `RpcLedger` drives the deployed ReliQ contract; `InMemoryLedger` applies
//! the same acceptance rules locally.

pub mod memory;
pub mod rpc;

use async_trait::async_trait;
use thiserror::Error;

use crate::chain::{ChainError, TxReceipt};
use crate::crypto::eip712::HeartbeatDomain;
use crate::crypto::Address;
use crate::models::{NewVault, SignedHeartbeat, Vault};

pub use memory::InMemoryLedger;
pub use rpc::RpcLedger;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("vault {0} not found")]
    VaultNotFound(u64),

    #[error("vault {0} already executed")]
    VaultExecuted(u64),

    #[error("vault {0} has not expired")]
    NotExpired(u64),

    #[error("vault {0} is not unlocked")]
    NotUnlocked(u64),

    #[error("heartbeat signature does not match vault owner")]
    InvalidSignature,

    #[error("nonce {0} already used")]
    NonceReused(u64),

    #[error("heartbeat timestamp {0} outside the accepted window")]
    StaleTimestamp(u64),

    #[error("timeout must be greater than zero")]
    InvalidTimeout,

    #[error("beneficiary must be a non-zero address")]
    InvalidBeneficiary,

    #[error("ledger has no signing key configured")]
    ReadOnly,

    #[error("transaction reverted: {0}")]
    TransactionFailed(String),

    #[error("unexpected contract response: {0}")]
    UnexpectedValue(String),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

impl LedgerError {
    /// True when the ledger refused the request on its own rules, as opposed
    /// to the ledger being unreachable.
    pub fn is_rejection(&self) -> bool {
        !matches!(
            self,
            LedgerError::Chain(_) | LedgerError::UnexpectedValue(_) | LedgerError::ReadOnly
        )
    }
}

#[async_trait]
pub trait VaultLedger: Send + Sync {
    async fn vault_count(&self) -> Result<u64, LedgerError>;

    async fn get_vault(&self, vault_id: u64) -> Result<Vault, LedgerError>;

    /// EIP-712 parameters owners must sign heartbeats against.
    async fn heartbeat_domain(&self) -> Result<HeartbeatDomain, LedgerError>;

    async fn create_vault(&self, vault: NewVault) -> Result<(u64, TxReceipt), LedgerError>;

    async fn submit_heartbeat(&self, heartbeat: &SignedHeartbeat) -> Result<TxReceipt, LedgerError>;

    async fn can_trigger(&self, vault_id: u64) -> Result<bool, LedgerError>;

    async fn unlock(&self, vault_id: u64) -> Result<TxReceipt, LedgerError>;

    /// Release the escrowed amount to `beneficiary` and mark the vault executed.
    async fn trigger(&self, vault_id: u64, beneficiary: Address) -> Result<TxReceipt, LedgerError>;

    /// Test hook: rewind `lastResponse` so the vault is immediately expired.
    async fn force_expire(&self, vault_id: u64) -> Result<TxReceipt, LedgerError>;
}
