use std::sync::Arc;

use axum::{extract::State, Extension, Json};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use tracing::info;
use validator::Validate;

use super::validation_message;
use crate::error::ApiError;
use crate::models::{FreeTierVerifyResponse, VerifyPaidRequest, VerifyPaidResponse};
use crate::payment::VerifiedPayment;
use crate::services::{ProofVerifier, VaultService};

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "ReliQ-Agent" }))
}

/// Free tier: accepts anything and answers with a fixed mock verdict.
pub async fn verify_free(Json(_body): Json<Value>) -> Json<FreeTierVerifyResponse> {
    Json(FreeTierVerifyResponse {
        verified: true,
        confidence: 0.85,
        note: "Free tier verification (Mock)",
    })
}

/// Paid verification. Runs behind the payment gate with a verified payment;
/// the gate settles it only if this returns a success status.
pub async fn verify_paid(
    State(oracle): State<Arc<dyn ProofVerifier>>,
    State(vaults): State<Arc<VaultService>>,
    payment: Option<Extension<VerifiedPayment>>,
    Json(request): Json<VerifyPaidRequest>,
) -> Result<Json<VerifyPaidResponse>, ApiError> {
    request
        .validate()
        .map_err(|e| ApiError::BadRequest(validation_message(&e)))?;
    let vault_id = request
        .vault_id
        .ok_or_else(|| ApiError::BadRequest("vaultId is required".to_string()))?;

    if let Some(Extension(payment)) = &payment {
        info!(vault_id, payer = ?payment.payer, amount = %payment.requirements.amount, "paid verification");
    }

    let verdict = oracle.verify(&request.condition, &request.proof).await;
    let outcome = vaults.unlock_if_verified(vault_id, &verdict).await?;

    Ok(Json(VerifyPaidResponse {
        verified: verdict.verified,
        analysis: verdict.reasoning,
        confidence: verdict.confidence,
        tx_hash: outcome.tx_hash(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    }))
}
