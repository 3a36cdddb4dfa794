use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use validator::Validate;

use super::validation_message;
use crate::crypto::Address;
use crate::error::ApiError;
use crate::models::{TriggerVaultRequest, TriggerVaultResponse};
use crate::services::VaultService;

pub async fn trigger(
    State(vaults): State<Arc<VaultService>>,
    Path(vault_id): Path<u64>,
    Json(request): Json<TriggerVaultRequest>,
) -> Result<Json<TriggerVaultResponse>, ApiError> {
    request
        .validate()
        .map_err(|e| ApiError::BadRequest(validation_message(&e)))?;
    let beneficiary: Address = request
        .beneficiary
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid beneficiary: {e}")))?;

    Ok(Json(vaults.trigger(vault_id, beneficiary).await?))
}
