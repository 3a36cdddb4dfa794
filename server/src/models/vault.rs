use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::crypto::{Address, B256, U256};

/// Vault record as held by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vault {
    pub id: u64,
    pub owner: Address,
    pub encrypted_payload: Vec<u8>,
    pub encrypted_condition: Vec<u8>,
    pub amount: U256,
    pub timeout: u64,
    pub last_response: u64,
    pub is_unlocked: bool,
    pub executed: bool,
}

/// Lifecycle position derived from the flags and the liveness window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VaultState {
    Active,
    Expired,
    Unlocked,
    Executed,
}

/// Parameters for a new vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVault {
    pub owner: Address,
    pub encrypted_payload: Vec<u8>,
    pub encrypted_condition: Vec<u8>,
    pub timeout: u64,
    pub amount: U256,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultStatusResponse {
    pub vault_id: u64,
    pub owner: Address,
    pub last_response: u64,
    pub timeout: u64,
    #[serde(with = "super::amount_string")]
    pub amount: U256,
    pub is_unlocked: bool,
    pub executed: bool,
    pub can_trigger: bool,
    pub state: VaultState,
    pub seconds_until_expiry: u64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TriggerVaultRequest {
    #[validate(length(equal = 42, message = "beneficiary must be a 0x-prefixed address"))]
    pub beneficiary: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerVaultResponse {
    pub success: bool,
    pub transaction_hash: B256,
    pub beneficiary: Address,
    #[serde(with = "super::amount_string")]
    pub amount: U256,
}
