//! x402 (version 2) wire types shared by the facilitator and the payment gate.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::{Address, B256, U256};

pub const X402_VERSION: u32 = 2;

/// What a resource server will accept for one protected route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: String,
    pub network: String,
    /// Atomic token units as a decimal string.
    pub amount: String,
    pub asset: Address,
    pub pay_to: Address,
    pub max_timeout_seconds: u64,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub extra: Value,
}

impl PaymentRequirements {
    pub fn amount_value(&self) -> Option<U256> {
        U256::from_str_radix(self.amount.trim(), 10).ok()
    }
}

/// Signed payer submission carried in the `PAYMENT-SIGNATURE` header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub x402_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceInfo>,
    /// The requirement option the payer chose to satisfy.
    pub accepted: PaymentRequirements,
    pub payload: Value,
}

impl PaymentPayload {
    pub fn scheme(&self) -> &str {
        &self.accepted.scheme
    }

    pub fn network(&self) -> &str {
        &self.accepted.network
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Body of `POST /verify` and `POST /settle`. Both halves are optional so the
/// handlers can answer a missing one with a 400.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilitatorRequest {
    pub payment_payload: Option<PaymentPayload>,
    pub payment_requirements: Option<PaymentRequirements>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<Address>,
}

impl VerifyResponse {
    pub fn valid(payer: Address) -> Self {
        Self {
            success: true,
            invalid_reason: None,
            payer: Some(payer),
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            invalid_reason: Some(reason.into()),
            payer: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    pub network: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<Address>,
}

impl SettleResponse {
    pub fn failed(network: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            tx_hash: None,
            error_reason: Some(reason.into()),
            network: network.into(),
            payer: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedKind {
    pub x402_version: u32,
    pub scheme: String,
    pub network: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedResponse {
    pub kinds: Vec<SupportedKind>,
}

/// Body and `PAYMENT-REQUIRED` header of a 402 response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    pub x402_version: u32,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceInfo>,
    pub accepts: Vec<PaymentRequirements>,
}
