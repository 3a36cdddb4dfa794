use std::future::IntoFuture;
use std::sync::Arc;

use alloy::contract::Error as ContractError;
use alloy::network::Ethereum;
use alloy::providers::{DynProvider, PendingTransactionBuilder};
use async_trait::async_trait;
use tracing::{info, warn};

use super::{LedgerError, VaultLedger};
use crate::chain::contracts::IReliQVault::{self, IReliQVaultInstance};
use crate::chain::{ChainClient, ChainError, TxReceipt};
use crate::crypto::eip712::HeartbeatDomain;
use crate::crypto::{Address, U256};
use crate::models::{NewVault, SignedHeartbeat, Vault};

/// Ledger backed by the deployed ReliQ vault contract.
pub struct RpcLedger {
    chain: Arc<ChainClient>,
    contract: IReliQVaultInstance<DynProvider>,
}

impl RpcLedger {
    pub fn new(chain: Arc<ChainClient>, contract: Address) -> Self {
        if chain.signer_address().is_none() {
            warn!(%contract, "no agent key configured; vault ledger is read-only");
        }
        let contract = IReliQVault::new(contract, chain.provider().clone());
        Self { chain, contract }
    }

    fn id(vault_id: u64) -> U256 {
        U256::from(vault_id)
    }

    async fn transact<F>(&self, method: &str, send: F) -> Result<TxReceipt, LedgerError>
    where
        F: IntoFuture<Output = Result<PendingTransactionBuilder<Ethereum>, ContractError>>,
    {
        let receipt = match self.chain.submit(method, send).await {
            Ok(receipt) => receipt,
            Err(ChainError::ReadOnly) => return Err(LedgerError::ReadOnly),
            Err(err) => {
                // Contract guards surface at gas estimation, before anything is mined.
                if let Some(message) = err.revert_message() {
                    warn!(method, %message, "vault transaction rejected");
                    return Err(LedgerError::TransactionFailed(message));
                }
                return Err(err.into());
            }
        };
        if !receipt.status {
            warn!(method, tx_hash = %receipt.tx_hash, "vault transaction reverted");
            return Err(LedgerError::TransactionFailed(receipt.tx_hash.to_string()));
        }
        Ok(receipt)
    }
}

/// Narrow a contract word to `u64`.
fn to_u64(field: &str, value: U256) -> Result<u64, LedgerError> {
    u64::try_from(value)
        .map_err(|_| LedgerError::UnexpectedValue(format!("{field} overflows u64: {value}")))
}

/// Map the `vaults(uint256)` tuple onto a [`Vault`]; the condition is read
/// separately.
fn vault_from_record(vault_id: u64, record: IReliQVault::vaultsReturn) -> Result<Vault, LedgerError> {
    Ok(Vault {
        id: vault_id,
        owner: record.owner,
        encrypted_payload: record.encryptedPayload.to_vec(),
        encrypted_condition: Vec::new(),
        last_response: to_u64("lastResponse", record.lastResponse)?,
        timeout: to_u64("timeout", record.timeout)?,
        amount: record.amount,
        // Execution implies unlock even on contracts that reset the flag.
        is_unlocked: record.executed,
        executed: record.executed,
    })
}

#[async_trait]
impl VaultLedger for RpcLedger {
    async fn vault_count(&self) -> Result<u64, LedgerError> {
        let count = self.chain.read(self.contract.vaultCount().call()).await?;
        to_u64("vaultCount", count)
    }

    async fn get_vault(&self, vault_id: u64) -> Result<Vault, LedgerError> {
        let id = Self::id(vault_id);
        let record = self.chain.read(self.contract.vaults(id).call()).await?;
        let decoded = vault_from_record(vault_id, record)?;
        // Unassigned ids read back as an all-zero struct.
        if decoded.owner.is_zero() {
            return Err(LedgerError::VaultNotFound(vault_id));
        }

        let condition = self
            .chain
            .read(self.contract.encryptedCondition(id).call())
            .await?;
        let unlocked = self.chain.read(self.contract.isUnlocked(id).call()).await?;
        Ok(Vault {
            encrypted_condition: condition.to_vec(),
            is_unlocked: decoded.executed || unlocked,
            ..decoded
        })
    }

    async fn heartbeat_domain(&self) -> Result<HeartbeatDomain, LedgerError> {
        let domain_separator = self
            .chain
            .read(self.contract.DOMAIN_SEPARATOR().call())
            .await?;
        let typehash = self
            .chain
            .read(self.contract.HEARTBEAT_TYPEHASH().call())
            .await?;
        Ok(HeartbeatDomain {
            domain_separator,
            typehash,
        })
    }

    async fn create_vault(&self, vault: NewVault) -> Result<(u64, TxReceipt), LedgerError> {
        if vault.timeout == 0 {
            return Err(LedgerError::InvalidTimeout);
        }
        let call = self
            .contract
            .createVault(
                vault.encrypted_payload.into(),
                vault.encrypted_condition.into(),
                U256::from(vault.timeout),
            )
            .value(vault.amount);
        let receipt = self.transact("createVault", call.send()).await?;
        // Ids are sequential; the new vault is the last one.
        let id = self.vault_count().await?.saturating_sub(1);
        info!(vault_id = id, tx_hash = %receipt.tx_hash, "vault created on chain");
        Ok((id, receipt))
    }

    async fn submit_heartbeat(&self, heartbeat: &SignedHeartbeat) -> Result<TxReceipt, LedgerError> {
        let call = self.contract.respondViaAgent(
            Self::id(heartbeat.vault_id),
            U256::from(heartbeat.timestamp),
            U256::from(heartbeat.nonce),
            heartbeat.signature.as_bytes().to_vec().into(),
        );
        self.transact("respondViaAgent", call.send()).await
    }

    async fn can_trigger(&self, vault_id: u64) -> Result<bool, LedgerError> {
        Ok(self
            .chain
            .read(self.contract.canTrigger(Self::id(vault_id)).call())
            .await?)
    }

    async fn unlock(&self, vault_id: u64) -> Result<TxReceipt, LedgerError> {
        let call = self.contract.unlockVault(Self::id(vault_id));
        self.transact("unlockVault", call.send()).await
    }

    async fn trigger(&self, vault_id: u64, beneficiary: Address) -> Result<TxReceipt, LedgerError> {
        if beneficiary.is_zero() {
            return Err(LedgerError::InvalidBeneficiary);
        }
        let call = self.contract.triggerVault(Self::id(vault_id), beneficiary);
        self.transact("triggerVault", call.send()).await
    }

    async fn force_expire(&self, vault_id: u64) -> Result<TxReceipt, LedgerError> {
        let call = self.contract.forceExpireTimeout(Self::id(vault_id));
        self.transact("forceExpireTimeout", call.send()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(owner: Address, last_response: U256) -> IReliQVault::vaultsReturn {
        IReliQVault::vaultsReturn {
            owner,
            encryptedPayload: vec![0xca, 0xfe].into(),
            lastResponse: last_response,
            timeout: U256::from(300u64),
            amount: U256::from(100_000_000_000_000u64),
            executed: false,
        }
    }

    #[test]
    fn maps_vault_record_fields() {
        let owner = Address::repeat_byte(0xab);
        let vault = vault_from_record(3, record(owner, U256::from(1_700_000_000u64))).unwrap();
        assert_eq!(vault.id, 3);
        assert_eq!(vault.owner, owner);
        assert_eq!(vault.encrypted_payload, vec![0xca, 0xfe]);
        assert_eq!(vault.last_response, 1_700_000_000);
        assert_eq!(vault.timeout, 300);
        assert_eq!(vault.amount, U256::from(100_000_000_000_000u64));
        assert!(!vault.executed);
    }

    #[test]
    fn oversized_timestamps_are_an_error() {
        let oversized = record(Address::repeat_byte(1), U256::from(u64::MAX) + U256::from(1u64));
        assert!(matches!(
            vault_from_record(0, oversized),
            Err(LedgerError::UnexpectedValue(_))
        ));
    }

    #[tokio::test]
    async fn writes_without_a_key_are_refused() {
        let chain = Arc::new(
            ChainClient::new(
                "http://127.0.0.1:9",
                None,
                Duration::from_millis(100),
                Duration::from_millis(100),
            )
            .unwrap(),
        );
        let ledger = RpcLedger::new(chain, Address::repeat_byte(1));
        assert!(matches!(ledger.unlock(0).await, Err(LedgerError::ReadOnly)));
    }
}
