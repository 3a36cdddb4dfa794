use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::crypto::B256;

/// Oracle verdict on a proof against an unlock condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub verified: bool,
    pub confidence: f64,
    pub reasoning: String,
}

impl VerificationResult {
    pub fn rejected(reasoning: impl Into<String>) -> Self {
        Self {
            verified: false,
            confidence: 0.0,
            reasoning: reasoning.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaidRequest {
    #[serde(default)]
    pub proof: String,
    #[serde(default)]
    pub condition: String,
    #[validate(required(message = "vaultId is required"))]
    pub vault_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaidResponse {
    pub verified: bool,
    pub analysis: String,
    pub confidence: f64,
    pub tx_hash: Option<B256>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FreeTierVerifyResponse {
    pub verified: bool,
    pub confidence: f64,
    pub note: &'static str,
}
