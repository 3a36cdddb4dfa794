use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::warn;

use crate::crypto::parse_signature;
use crate::error::ApiError;
use crate::models::{
    HeartbeatRespondRequest, HeartbeatRespondResponse, SignedHeartbeat, VaultStatusResponse,
};
use crate::services::VaultService;

/// Relay an owner-signed heartbeat to the ledger.
///
/// Replayed nonces, stale timestamps and bad signatures are answered with
/// `422 {success: false, error}`; an unreachable ledger is a 503.
pub async fn respond(
    State(vaults): State<Arc<VaultService>>,
    Json(request): Json<HeartbeatRespondRequest>,
) -> Result<Response, ApiError> {
    let (Some(vault_id), Some(timestamp), Some(nonce), Some(signature)) = (
        request.vault_id,
        request.timestamp,
        request.nonce,
        request.signature.as_deref(),
    ) else {
        return Err(ApiError::BadRequest("Missing required fields".to_string()));
    };

    let signature = parse_signature(signature)
        .map_err(|e| ApiError::BadRequest(format!("Invalid signature: {e}")))?;
    let heartbeat = SignedHeartbeat {
        vault_id,
        timestamp,
        nonce,
        signature,
    };

    match vaults.relay_heartbeat(&heartbeat).await {
        Ok(receipt) => Ok(Json(HeartbeatRespondResponse {
            success: true,
            transaction_hash: Some(receipt.tx_hash),
            error: None,
        })
        .into_response()),
        Err(err) if err.is_rejection() => {
            warn!(vault_id, error = %err, "heartbeat refused by ledger");
            let body = HeartbeatRespondResponse {
                success: false,
                transaction_hash: None,
                error: Some(err.to_string()),
            };
            Ok((StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response())
        }
        Err(err) => Err(err.into()),
    }
}

pub async fn status(
    State(vaults): State<Arc<VaultService>>,
    Path(vault_id): Path<u64>,
) -> Result<Json<VaultStatusResponse>, ApiError> {
    Ok(Json(vaults.status(vault_id).await?))
}
