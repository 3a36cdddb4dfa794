use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Value};
use tracing::{error, info};

use crate::app_state::FacilitatorState;
use crate::error::ApiError;
use crate::models::payment::{
    FacilitatorRequest, PaymentPayload, PaymentRequirements, SettleResponse, SupportedResponse,
    VerifyResponse,
};
use crate::payment::{Facilitator, FacilitatorError};

const MISSING_FIELDS: &str = "Missing paymentPayload or paymentRequirements";

fn unpack(request: FacilitatorRequest) -> Result<(PaymentPayload, PaymentRequirements), ApiError> {
    match (request.payment_payload, request.payment_requirements) {
        (Some(payload), Some(requirements)) => Ok((payload, requirements)),
        _ => Err(ApiError::BadRequest(MISSING_FIELDS.to_string())),
    }
}

pub async fn info(State(state): State<FacilitatorState>) -> Json<Value> {
    Json(json!({
        "name": "ReliQ x402 Facilitator",
        "version": "2.0.0",
        "status": "healthy",
        "wallet": state.wallet,
        "networks": state.facilitator.networks(),
        "endpoints": {
            "verify": "/verify",
            "settle": "/settle",
            "supported": "/supported",
        },
    }))
}

pub async fn verify(
    State(facilitator): State<Arc<Facilitator>>,
    Json(request): Json<FacilitatorRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let (payload, requirements) = unpack(request)?;
    facilitator
        .verify(&payload, &requirements)
        .await
        .map(Json)
        .map_err(ApiError::from)
}

/// A settlement refused by a hook is an answer, not a server fault: it comes
/// back as a 200 failure carrying the hook's reason.
pub async fn settle(
    State(facilitator): State<Arc<Facilitator>>,
    Json(request): Json<FacilitatorRequest>,
) -> Result<Json<SettleResponse>, ApiError> {
    let (payload, requirements) = unpack(request)?;
    match facilitator.settle(&payload, &requirements).await {
        Ok(response) => Ok(Json(response)),
        Err(err) => {
            let message = err.to_string();
            if let Some(reason) = FacilitatorError::abort_reason(&message) {
                info!(%reason, "settlement aborted");
                return Ok(Json(SettleResponse::failed(payload.network(), reason)));
            }
            error!(error = %message, "settlement failed");
            Err(ApiError::from(err))
        }
    }
}

pub async fn supported(State(facilitator): State<Arc<Facilitator>>) -> Json<SupportedResponse> {
    Json(facilitator.supported())
}
