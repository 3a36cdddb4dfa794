use std::sync::Arc;

use tracing::{info, warn};

use crate::chain::TxReceipt;
use crate::clock::Clock;
use crate::crypto::eip712::HeartbeatDomain;
use crate::crypto::{Address, B256};
use crate::ledger::{LedgerError, VaultLedger};
use crate::models::{
    SignedHeartbeat, TriggerVaultResponse, VaultStatusResponse, VerificationResult,
};
use crate::services::liveness;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnlockOutcome {
    /// The oracle did not approve; the ledger was not touched.
    NotVerified,
    AlreadyUnlocked,
    Unlocked(TxReceipt),
}

impl UnlockOutcome {
    pub fn tx_hash(&self) -> Option<B256> {
        match self {
            UnlockOutcome::Unlocked(receipt) => Some(receipt.tx_hash),
            _ => None,
        }
    }
}

/// Vault lifecycle operations on top of a ledger backend.
#[derive(Clone)]
pub struct VaultService {
    ledger: Arc<dyn VaultLedger>,
    clock: Arc<dyn Clock>,
}

impl VaultService {
    pub fn new(ledger: Arc<dyn VaultLedger>, clock: Arc<dyn Clock>) -> Self {
        Self { ledger, clock }
    }

    pub fn ledger(&self) -> &Arc<dyn VaultLedger> {
        &self.ledger
    }

    pub async fn heartbeat_domain(&self) -> Result<HeartbeatDomain, LedgerError> {
        self.ledger.heartbeat_domain().await
    }

    pub async fn status(&self, vault_id: u64) -> Result<VaultStatusResponse, LedgerError> {
        let vault = self.ledger.get_vault(vault_id).await?;
        let now = self.clock.now();
        Ok(VaultStatusResponse {
            vault_id,
            owner: vault.owner,
            last_response: vault.last_response,
            timeout: vault.timeout,
            amount: vault.amount,
            is_unlocked: vault.is_unlocked,
            executed: vault.executed,
            can_trigger: liveness::can_trigger(&vault, now),
            state: liveness::vault_state(&vault, now),
            seconds_until_expiry: liveness::seconds_until_expiry(&vault, now),
        })
    }

    pub async fn relay_heartbeat(&self, heartbeat: &SignedHeartbeat) -> Result<TxReceipt, LedgerError> {
        match self.ledger.submit_heartbeat(heartbeat).await {
            Ok(receipt) => {
                info!(
                    vault_id = heartbeat.vault_id,
                    tx_hash = %receipt.tx_hash,
                    "heartbeat recorded"
                );
                Ok(receipt)
            }
            Err(err) => {
                warn!(vault_id = heartbeat.vault_id, error = %err, "heartbeat rejected");
                Err(err)
            }
        }
    }

    /// Unlock `vault_id` when the oracle approved. Safe to repeat. Unlocking
    /// does not depend on expiry; only triggering does.
    pub async fn unlock_if_verified(
        &self,
        vault_id: u64,
        verdict: &VerificationResult,
    ) -> Result<UnlockOutcome, LedgerError> {
        if !verdict.verified {
            info!(vault_id, "proof not verified; vault stays locked");
            return Ok(UnlockOutcome::NotVerified);
        }

        let vault = self.ledger.get_vault(vault_id).await?;
        if vault.is_unlocked || vault.executed {
            info!(vault_id, "vault already unlocked");
            return Ok(UnlockOutcome::AlreadyUnlocked);
        }

        let receipt = self.ledger.unlock(vault_id).await?;
        info!(vault_id, tx_hash = %receipt.tx_hash, "vault unlocked");
        Ok(UnlockOutcome::Unlocked(receipt))
    }

    /// Release funds to `beneficiary`. Checks the gating conditions first so
    /// callers get a precise rejection instead of a reverted transaction.
    pub async fn trigger(
        &self,
        vault_id: u64,
        beneficiary: Address,
    ) -> Result<TriggerVaultResponse, LedgerError> {
        if beneficiary.is_zero() {
            return Err(LedgerError::InvalidBeneficiary);
        }
        let vault = self.ledger.get_vault(vault_id).await?;
        if vault.executed {
            return Err(LedgerError::VaultExecuted(vault_id));
        }
        if !self.ledger.can_trigger(vault_id).await? {
            return Err(LedgerError::NotExpired(vault_id));
        }
        if !vault.is_unlocked {
            return Err(LedgerError::NotUnlocked(vault_id));
        }

        let receipt = self.ledger.trigger(vault_id, beneficiary).await?;
        info!(vault_id, %beneficiary, tx_hash = %receipt.tx_hash, "vault triggered");
        Ok(TriggerVaultResponse {
            success: true,
            transaction_hash: receipt.tx_hash,
            beneficiary,
            amount: vault.amount,
        })
    }
}
