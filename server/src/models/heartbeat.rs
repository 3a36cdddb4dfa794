use serde::{Deserialize, Serialize};

use crate::crypto::{Signature, B256};

/// An owner's signed proof of liveness, ready for the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedHeartbeat {
    pub vault_id: u64,
    pub timestamp: u64,
    pub nonce: u64,
    #[serde(with = "crate::crypto::signature_hex")]
    pub signature: Signature,
}

/// Body of `POST /api/heartbeat/respond`. Fields are optional so a missing
/// one is reported as a 400 rather than a body rejection.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRespondRequest {
    pub vault_id: Option<u64>,
    pub timestamp: Option<u64>,
    pub nonce: Option<u64>,
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRespondResponse {
    pub success: bool,
    pub transaction_hash: Option<B256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
