//! Pure liveness predicates over a vault snapshot.

use crate::models::{Vault, VaultState};

/// `(now - lastResponse) >= timeout && !executed`.
pub fn can_trigger(vault: &Vault, now: u64) -> bool {
    !vault.executed && now.saturating_sub(vault.last_response) >= vault.timeout
}

pub fn is_expired(vault: &Vault, now: u64) -> bool {
    now.saturating_sub(vault.last_response) >= vault.timeout
}

pub fn seconds_until_expiry(vault: &Vault, now: u64) -> u64 {
    vault
        .last_response
        .saturating_add(vault.timeout)
        .saturating_sub(now)
}

pub fn vault_state(vault: &Vault, now: u64) -> VaultState {
    if vault.executed {
        VaultState::Executed
    } else if vault.is_unlocked {
        VaultState::Unlocked
    } else if is_expired(vault, now) {
        VaultState::Expired
    } else {
        VaultState::Active
    }
}
