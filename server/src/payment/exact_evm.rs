//! The `exact` scheme on EVM networks: an EIP-3009
//! `TransferWithAuthorization` signed by the payer and submitted by the
//! facilitator.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::network::evm_chain_id;
use super::scheme::{SchemeError, SchemeFacilitator};
use crate::chain::contracts::IERC3009;
use crate::chain::{ChainClient, ChainError, TxReceipt};
use crate::clock::Clock;
use crate::crypto::eip712::{Eip712Domain, SolStruct, TransferWithAuthorization};
use crate::crypto::{
    recover_signer, sign_digest, Address, CryptoError, Signature, Wallet, B256, U256,
};
use crate::models::payment::{
    PaymentPayload, PaymentRequirements, SettleResponse, VerifyResponse, X402_VERSION,
};

pub const SCHEME: &str = "exact";

/// Seconds of headroom required before `validBefore` so settlement can land.
const VALID_BEFORE_MARGIN_SECONDS: u64 = 6;

/// Token access the facilitator needs for this scheme.
#[async_trait]
pub trait EvmSigner: Send + Sync {
    fn address(&self) -> Address;

    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256, ChainError>;

    /// True once `nonce` has been used or cancelled by `authorizer`.
    async fn authorization_state(
        &self,
        token: Address,
        authorizer: Address,
        nonce: B256,
    ) -> Result<bool, ChainError>;

    async fn transfer_with_authorization(
        &self,
        token: Address,
        authorization: &TransferWithAuthorization,
        signature: &Signature,
    ) -> Result<TxReceipt, ChainError>;
}

/// [`EvmSigner`] over a provider that signs with the facilitator key.
pub struct RpcEvmSigner {
    chain: Arc<ChainClient>,
    address: Address,
}

impl RpcEvmSigner {
    pub fn new(chain: Arc<ChainClient>) -> Result<Self, ChainError> {
        let address = chain.signer_address().ok_or(ChainError::ReadOnly)?;
        Ok(Self { chain, address })
    }

    fn token(&self, token: Address) -> IERC3009::IERC3009Instance<alloy::providers::DynProvider> {
        IERC3009::new(token, self.chain.provider().clone())
    }
}

#[async_trait]
impl EvmSigner for RpcEvmSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256, ChainError> {
        let token = self.token(token);
        self.chain.read(token.balanceOf(owner).call()).await
    }

    async fn authorization_state(
        &self,
        token: Address,
        authorizer: Address,
        nonce: B256,
    ) -> Result<bool, ChainError> {
        let token = self.token(token);
        self.chain
            .read(token.authorizationState(authorizer, nonce).call())
            .await
    }

    async fn transfer_with_authorization(
        &self,
        token: Address,
        authorization: &TransferWithAuthorization,
        signature: &Signature,
    ) -> Result<TxReceipt, ChainError> {
        let token = self.token(token);
        let call = token.transferWithAuthorization(
            authorization.from,
            authorization.to,
            authorization.value,
            authorization.validAfter,
            authorization.validBefore,
            authorization.nonce,
            27 + u8::from(signature.v()),
            B256::from(signature.r().to_be_bytes::<32>()),
            B256::from(signature.s().to_be_bytes::<32>()),
        );
        self.chain
            .submit("transferWithAuthorization", call.send())
            .await
    }
}

/// Wire form of the authorization: integers as decimal strings, nonce as hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    pub from: Address,
    pub to: Address,
    pub value: String,
    pub valid_after: String,
    pub valid_before: String,
    pub nonce: B256,
}

/// Scheme-specific contents of `PaymentPayload::payload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExactEvmPayload {
    #[serde(with = "crate::crypto::signature_hex")]
    pub signature: Signature,
    pub authorization: Authorization,
}

impl ExactEvmPayload {
    /// Payer side: authorize `requirements.amount` to `requirements.pay_to`.
    pub fn sign(
        wallet: &Wallet,
        requirements: &PaymentRequirements,
        valid_after: u64,
        valid_before: u64,
        nonce: B256,
    ) -> Result<PaymentPayload, CryptoError> {
        let value = requirements.amount_value().unwrap_or_default();
        let message = TransferWithAuthorization {
            from: wallet.address(),
            to: requirements.pay_to,
            value,
            validAfter: U256::from(valid_after),
            validBefore: U256::from(valid_before),
            nonce,
        };
        let domain = token_domain(requirements).ok_or_else(|| {
            CryptoError::InvalidSignature("requirements lack an EIP-712 token domain".to_string())
        })?;
        let signature = sign_digest(wallet, &message.eip712_signing_hash(&domain))?;

        let payload = ExactEvmPayload {
            signature,
            authorization: Authorization {
                from: message.from,
                to: message.to,
                value: value.to_string(),
                valid_after: valid_after.to_string(),
                valid_before: valid_before.to_string(),
                nonce,
            },
        };
        Ok(PaymentPayload {
            x402_version: X402_VERSION,
            resource: None,
            accepted: requirements.clone(),
            payload: serde_json::to_value(payload)
                .map_err(|e| CryptoError::Signing(e.to_string()))?,
        })
    }

    fn message(&self) -> Result<TransferWithAuthorization, &'static str> {
        let auth = &self.authorization;
        let decimal = |raw: &str, reason: &'static str| {
            U256::from_str_radix(raw.trim(), 10).map_err(|_| reason)
        };
        Ok(TransferWithAuthorization {
            from: auth.from,
            to: auth.to,
            value: decimal(&auth.value, "invalid_exact_evm_payload_value")?,
            validAfter: decimal(&auth.valid_after, "invalid_exact_evm_payload_valid_after")?,
            validBefore: decimal(&auth.valid_before, "invalid_exact_evm_payload_valid_before")?,
            nonce: auth.nonce,
        })
    }
}

/// EIP-712 domain of the payment token, from `extra.name` / `extra.version`.
fn token_domain(requirements: &PaymentRequirements) -> Option<Eip712Domain> {
    let name = requirements.extra.get("name").and_then(Value::as_str)?;
    let version = requirements.extra.get("version").and_then(Value::as_str)?;
    let chain_id = evm_chain_id(&requirements.network)?;
    Some(Eip712Domain::new(
        Some(name.to_string().into()),
        Some(version.to_string().into()),
        Some(U256::from(chain_id)),
        Some(requirements.asset),
        None,
    ))
}

pub struct ExactEvmScheme {
    signer: Arc<dyn EvmSigner>,
    clock: Arc<dyn Clock>,
}

/// A checked payload ready for settlement.
struct Checked {
    payload: ExactEvmPayload,
    message: TransferWithAuthorization,
}

impl ExactEvmScheme {
    pub fn new(signer: Arc<dyn EvmSigner>, clock: Arc<dyn Clock>) -> Self {
        Self { signer, clock }
    }

    async fn check(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<Result<Checked, &'static str>, SchemeError> {
        if payload.scheme() != SCHEME || requirements.scheme != SCHEME {
            return Ok(Err("unsupported_scheme"));
        }
        if payload.network() != requirements.network {
            return Ok(Err("network_mismatch"));
        }
        if payload.accepted.asset != requirements.asset {
            return Ok(Err("asset_mismatch"));
        }
        let Some(domain) = token_domain(requirements) else {
            return Ok(Err("invalid_network_or_token_domain"));
        };
        let Some(required) = requirements.amount_value() else {
            return Ok(Err("invalid_required_amount"));
        };

        let parsed: ExactEvmPayload = match serde_json::from_value(payload.payload.clone()) {
            Ok(parsed) => parsed,
            Err(_) => return Ok(Err("invalid_exact_evm_payload")),
        };
        let message = match parsed.message() {
            Ok(message) => message,
            Err(reason) => return Ok(Err(reason)),
        };

        if message.to != requirements.pay_to {
            return Ok(Err("invalid_exact_evm_payload_recipient_mismatch"));
        }
        if message.value < required {
            return Ok(Err("invalid_exact_evm_payload_authorization_value"));
        }

        let now = U256::from(self.clock.now());
        if message.validAfter > now {
            return Ok(Err("invalid_exact_evm_payload_authorization_valid_after"));
        }
        if message.validBefore < now + U256::from(VALID_BEFORE_MARGIN_SECONDS) {
            return Ok(Err("invalid_exact_evm_payload_authorization_valid_before"));
        }

        let digest = message.eip712_signing_hash(&domain);
        match recover_signer(&digest, &parsed.signature) {
            Ok(signer) if signer == message.from => {}
            _ => return Ok(Err("invalid_exact_evm_payload_signature")),
        }

        // A transferred authorization stays valid-looking forever; the token
        // is the only record that it was spent.
        if self
            .signer
            .authorization_state(requirements.asset, message.from, message.nonce)
            .await?
        {
            return Ok(Err("invalid_exact_evm_payload_authorization_nonce_used"));
        }

        let balance = self
            .signer
            .balance_of(requirements.asset, message.from)
            .await?;
        if balance < message.value {
            return Ok(Err("insufficient_funds"));
        }

        Ok(Ok(Checked {
            payload: parsed,
            message,
        }))
    }
}

#[async_trait]
impl SchemeFacilitator for ExactEvmScheme {
    fn scheme(&self) -> &str {
        SCHEME
    }

    async fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, SchemeError> {
        Ok(match self.check(payload, requirements).await? {
            Ok(checked) => VerifyResponse::valid(checked.message.from),
            Err(reason) => {
                debug!(reason, "exact payload rejected");
                VerifyResponse::invalid(reason)
            }
        })
    }

    async fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, SchemeError> {
        let checked = match self.check(payload, requirements).await? {
            Ok(checked) => checked,
            Err(reason) => return Ok(SettleResponse::failed(&requirements.network, reason)),
        };
        let message = &checked.message;

        let receipt = self
            .signer
            .transfer_with_authorization(requirements.asset, message, &checked.payload.signature)
            .await?;

        if !receipt.status {
            warn!(tx_hash = %receipt.tx_hash, payer = %message.from, "settlement reverted");
            return Ok(SettleResponse {
                tx_hash: Some(receipt.tx_hash),
                payer: Some(message.from),
                ..SettleResponse::failed(&requirements.network, "transaction_failed")
            });
        }

        info!(
            tx_hash = %receipt.tx_hash,
            payer = %message.from,
            value = %message.value,
            "payment settled"
        );
        Ok(SettleResponse {
            success: true,
            tx_hash: Some(receipt.tx_hash),
            error_reason: None,
            network: requirements.network.clone(),
            payer: Some(message.from),
        })
    }
}
