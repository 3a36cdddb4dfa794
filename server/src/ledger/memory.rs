use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{LedgerError, VaultLedger};
use crate::chain::TxReceipt;
use crate::clock::Clock;
use crate::crypto::eip712::{Eip712Domain, HeartbeatDomain};
use crate::crypto::{keccak256, recover_signer, Address, U256};
use crate::models::{NewVault, SignedHeartbeat, Vault};
use crate::services::liveness;

/// How far ahead of the ledger clock a heartbeat may be stamped.
pub const MAX_FUTURE_DRIFT_SECONDS: u64 = 60;
/// Oldest heartbeat the ledger still accepts.
pub const MAX_HEARTBEAT_AGE_SECONDS: u64 = 300;

#[derive(Default)]
struct LedgerState {
    vaults: Vec<Vault>,
    used_nonces: HashSet<(Address, u64)>,
    balances: HashMap<Address, U256>,
    block: u64,
}

impl LedgerState {
    fn vault_mut(&mut self, vault_id: u64) -> Result<&mut Vault, LedgerError> {
        usize::try_from(vault_id)
            .ok()
            .and_then(|index| self.vaults.get_mut(index))
            .ok_or(LedgerError::VaultNotFound(vault_id))
    }

    fn mine(&mut self, label: &str) -> TxReceipt {
        self.block += 1;
        TxReceipt {
            tx_hash: keccak256(format!("{label}:{}", self.block)),
            block_number: Some(self.block),
            gas_used: None,
            status: true,
        }
    }
}

/// Local ledger that enforces the contract's rules without a chain.
pub struct InMemoryLedger {
    domain: HeartbeatDomain,
    clock: Arc<dyn Clock>,
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new(domain: &Eip712Domain, clock: Arc<dyn Clock>) -> Self {
        Self {
            domain: HeartbeatDomain::from_domain(domain),
            clock,
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Funds released to `address` by executed vaults.
    pub async fn balance_of(&self, address: &Address) -> U256 {
        let state = self.state.lock().await;
        state.balances.get(address).copied().unwrap_or_default()
    }
}

#[async_trait]
impl VaultLedger for InMemoryLedger {
    async fn vault_count(&self) -> Result<u64, LedgerError> {
        Ok(self.state.lock().await.vaults.len() as u64)
    }

    async fn get_vault(&self, vault_id: u64) -> Result<Vault, LedgerError> {
        let mut state = self.state.lock().await;
        state.vault_mut(vault_id).map(|vault| vault.clone())
    }

    async fn heartbeat_domain(&self) -> Result<HeartbeatDomain, LedgerError> {
        Ok(self.domain)
    }

    async fn create_vault(&self, vault: NewVault) -> Result<(u64, TxReceipt), LedgerError> {
        if vault.timeout == 0 {
            return Err(LedgerError::InvalidTimeout);
        }
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let id = state.vaults.len() as u64;
        state.vaults.push(Vault {
            id,
            owner: vault.owner,
            encrypted_payload: vault.encrypted_payload,
            encrypted_condition: vault.encrypted_condition,
            amount: vault.amount,
            timeout: vault.timeout,
            last_response: now,
            is_unlocked: false,
            executed: false,
        });
        let receipt = state.mine("createVault");
        info!(vault_id = id, owner = %vault.owner, timeout = vault.timeout, "vault created");
        Ok((id, receipt))
    }

    async fn submit_heartbeat(&self, heartbeat: &SignedHeartbeat) -> Result<TxReceipt, LedgerError> {
        let now = self.clock.now();
        if heartbeat.timestamp > now + MAX_FUTURE_DRIFT_SECONDS
            || heartbeat.timestamp < now.saturating_sub(MAX_HEARTBEAT_AGE_SECONDS)
        {
            return Err(LedgerError::StaleTimestamp(heartbeat.timestamp));
        }

        let digest = self
            .domain
            .digest(heartbeat.vault_id, heartbeat.timestamp, heartbeat.nonce);
        let signer =
            recover_signer(&digest, &heartbeat.signature).map_err(|_| LedgerError::InvalidSignature)?;

        let mut state = self.state.lock().await;
        let vault = state.vault_mut(heartbeat.vault_id)?;
        if vault.executed {
            return Err(LedgerError::VaultExecuted(heartbeat.vault_id));
        }
        if signer != vault.owner {
            return Err(LedgerError::InvalidSignature);
        }
        let owner = vault.owner;
        if !state.used_nonces.insert((owner, heartbeat.nonce)) {
            return Err(LedgerError::NonceReused(heartbeat.nonce));
        }

        state.vault_mut(heartbeat.vault_id)?.last_response = now;
        debug!(vault_id = heartbeat.vault_id, nonce = heartbeat.nonce, "heartbeat accepted");
        Ok(state.mine("respondViaAgent"))
    }

    async fn can_trigger(&self, vault_id: u64) -> Result<bool, LedgerError> {
        let vault = self.get_vault(vault_id).await?;
        Ok(liveness::can_trigger(&vault, self.clock.now()))
    }

    async fn unlock(&self, vault_id: u64) -> Result<TxReceipt, LedgerError> {
        let mut state = self.state.lock().await;
        let vault = state.vault_mut(vault_id)?;
        if vault.executed {
            return Err(LedgerError::VaultExecuted(vault_id));
        }
        vault.is_unlocked = true;
        Ok(state.mine("unlockVault"))
    }

    async fn trigger(&self, vault_id: u64, beneficiary: Address) -> Result<TxReceipt, LedgerError> {
        if beneficiary.is_zero() {
            return Err(LedgerError::InvalidBeneficiary);
        }
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let vault = state.vault_mut(vault_id)?;
        if vault.executed {
            return Err(LedgerError::VaultExecuted(vault_id));
        }
        if !liveness::can_trigger(vault, now) {
            return Err(LedgerError::NotExpired(vault_id));
        }
        if !vault.is_unlocked {
            return Err(LedgerError::NotUnlocked(vault_id));
        }

        let amount = vault.amount;
        vault.executed = true;
        *state.balances.entry(beneficiary).or_default() += amount;
        info!(vault_id, %beneficiary, amount = %amount, "vault executed");
        Ok(state.mine("triggerVault"))
    }

    async fn force_expire(&self, vault_id: u64) -> Result<TxReceipt, LedgerError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let vault = state.vault_mut(vault_id)?;
        vault.last_response = now.saturating_sub(vault.timeout);
        Ok(state.mine("forceExpireTimeout"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::crypto::eip712::reliq_domain;
    use crate::crypto::{sign_digest, Wallet};

    const START: u64 = 1_700_000_000;

    fn domain() -> Eip712Domain {
        reliq_domain(103698795, Address::repeat_byte(0x22))
    }

    async fn setup(owner: &Wallet) -> (Arc<ManualClock>, InMemoryLedger, u64) {
        let clock = Arc::new(ManualClock::new(START));
        let ledger = InMemoryLedger::new(&domain(), clock.clone());
        let (id, _) = ledger
            .create_vault(NewVault {
                owner: owner.address(),
                encrypted_payload: vec![1, 2, 3],
                encrypted_condition: vec![4, 5],
                timeout: 300,
                amount: U256::from(100_000_000_000_000u64),
            })
            .await
            .unwrap();
        (clock, ledger, id)
    }

    fn sign(wallet: &Wallet, vault_id: u64, timestamp: u64, nonce: u64) -> SignedHeartbeat {
        let digest = HeartbeatDomain::from_domain(&domain()).digest(vault_id, timestamp, nonce);
        SignedHeartbeat {
            vault_id,
            timestamp,
            nonce,
            signature: sign_digest(wallet, &digest).unwrap(),
        }
    }

    #[tokio::test]
    async fn owner_heartbeat_is_accepted_once() {
        let owner = Wallet::random();
        let (clock, ledger, id) = setup(&owner).await;
        clock.advance(100);

        let heartbeat = sign(&owner, id, clock.now(), 7);
        ledger.submit_heartbeat(&heartbeat).await.unwrap();
        assert_eq!(ledger.get_vault(id).await.unwrap().last_response, START + 100);

        let replay = ledger.submit_heartbeat(&heartbeat).await;
        assert!(matches!(replay, Err(LedgerError::NonceReused(7))));
    }

    #[tokio::test]
    async fn foreign_and_stale_heartbeats_are_rejected() {
        let owner = Wallet::random();
        let (clock, ledger, id) = setup(&owner).await;

        let stranger = Wallet::random();
        let forged = sign(&stranger, id, clock.now(), 1);
        assert!(matches!(
            ledger.submit_heartbeat(&forged).await,
            Err(LedgerError::InvalidSignature)
        ));

        let old = sign(&owner, id, START - MAX_HEARTBEAT_AGE_SECONDS - 1, 2);
        assert!(matches!(
            ledger.submit_heartbeat(&old).await,
            Err(LedgerError::StaleTimestamp(_))
        ));

        // Signed for another vault id: recovers to a different address.
        let wrong_vault = sign(&owner, id + 1, clock.now(), 3);
        let retargeted = SignedHeartbeat {
            vault_id: id,
            ..wrong_vault
        };
        assert!(matches!(
            ledger.submit_heartbeat(&retargeted).await,
            Err(LedgerError::InvalidSignature)
        ));
    }

    #[tokio::test]
    async fn trigger_requires_expiry_and_unlock() {
        let owner = Wallet::random();
        let beneficiary = Address::repeat_byte(0xbe);
        let (_clock, ledger, id) = setup(&owner).await;

        assert!(matches!(
            ledger.trigger(id, beneficiary).await,
            Err(LedgerError::NotExpired(_))
        ));

        ledger.force_expire(id).await.unwrap();
        assert!(ledger.can_trigger(id).await.unwrap());
        assert!(matches!(
            ledger.trigger(id, beneficiary).await,
            Err(LedgerError::NotUnlocked(_))
        ));

        ledger.unlock(id).await.unwrap();
        ledger.unlock(id).await.unwrap();
        ledger.trigger(id, beneficiary).await.unwrap();
        assert_eq!(
            ledger.balance_of(&beneficiary).await,
            U256::from(100_000_000_000_000u64)
        );

        assert!(matches!(
            ledger.trigger(id, beneficiary).await,
            Err(LedgerError::VaultExecuted(_))
        ));
        let late = sign(&owner, id, START, 9);
        assert!(matches!(
            ledger.submit_heartbeat(&late).await,
            Err(LedgerError::VaultExecuted(_))
        ));
    }

    #[tokio::test]
    async fn unknown_vault_and_zero_timeout() {
        let owner = Wallet::random();
        let (_clock, ledger, _) = setup(&owner).await;
        assert!(matches!(
            ledger.get_vault(42).await,
            Err(LedgerError::VaultNotFound(42))
        ));
        let err = ledger
            .create_vault(NewVault {
                owner: owner.address(),
                encrypted_payload: vec![],
                encrypted_condition: vec![],
                timeout: 0,
                amount: U256::from(1u64),
            })
            .await;
        assert!(matches!(err, Err(LedgerError::InvalidTimeout)));
        assert_eq!(ledger.vault_count().await.unwrap(), 1);
    }
}
