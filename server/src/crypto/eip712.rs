//! EIP-712 typed data for heartbeats and EIP-3009 transfer authorizations.

use alloy::sol;
use alloy::sol_types::SolValue;

pub use alloy::sol_types::{Eip712Domain, SolStruct};

use crate::crypto::{keccak256, Address, B256, U256};

sol! {
    /// Liveness proof signed by the vault owner.
    #[derive(Debug, PartialEq, Eq)]
    struct Heartbeat {
        uint256 vaultId;
        uint256 timestamp;
        uint256 nonce;
    }

    /// EIP-3009 authorization a payer signs over the token's domain.
    #[derive(Debug, PartialEq, Eq)]
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
}

/// Domain the vault contract verifies heartbeats under.
pub fn reliq_domain(chain_id: u64, verifying_contract: Address) -> Eip712Domain {
    Eip712Domain::new(
        Some("ReliQ".into()),
        Some("1".into()),
        Some(U256::from(chain_id)),
        Some(verifying_contract),
        None,
    )
}

/// `keccak256("\x19\x01" || domainSeparator || structHash)`
pub fn typed_data_digest(domain_separator: &B256, struct_hash: &B256) -> B256 {
    let mut preimage = [0u8; 66];
    preimage[0] = 0x19;
    preimage[1] = 0x01;
    preimage[2..34].copy_from_slice(domain_separator.as_slice());
    preimage[34..].copy_from_slice(struct_hash.as_slice());
    keccak256(preimage)
}

/// Domain parameters a ledger publishes for heartbeat signing. A contract
/// reports these as raw hashes, so they are kept separate from
/// [`Eip712Domain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatDomain {
    pub domain_separator: B256,
    pub typehash: B256,
}

impl HeartbeatDomain {
    pub fn from_domain(domain: &Eip712Domain) -> Self {
        Self {
            domain_separator: domain.separator(),
            typehash: heartbeat_typehash(),
        }
    }

    pub fn digest(&self, vault_id: u64, timestamp: u64, nonce: u64) -> B256 {
        let struct_hash = keccak256(
            (
                self.typehash,
                U256::from(vault_id),
                U256::from(timestamp),
                U256::from(nonce),
            )
                .abi_encode(),
        );
        typed_data_digest(&self.domain_separator, &struct_hash)
    }
}

pub fn heartbeat_typehash() -> B256 {
    keccak256(Heartbeat::eip712_encode_type().as_bytes())
}
