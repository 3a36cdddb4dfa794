//! HTTP-facing error type shared by the agent and facilitator handlers.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::error;

use crate::ledger::LedgerError;
use crate::models::ApiResponse;
use crate::payment::{FacilitatorError, SchemeError};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// The ledger refused the request on its own rules.
    #[error("{0}")]
    Rejected(String),

    /// An upstream dependency is down. Details are logged, not returned.
    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Rejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show a client.
    pub fn public_message(&self) -> String {
        match self {
            ApiError::Unavailable(_) => "Upstream service unavailable".to_string(),
            ApiError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(%status, detail = %self, "request failed");
        }
        (status, Json(ApiResponse::<()>::err(self.public_message()))).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::VaultNotFound(_) => ApiError::NotFound(err.to_string()),
            LedgerError::VaultExecuted(_)
            | LedgerError::NotExpired(_)
            | LedgerError::NotUnlocked(_) => ApiError::Conflict(err.to_string()),
            LedgerError::InvalidSignature
            | LedgerError::NonceReused(_)
            | LedgerError::StaleTimestamp(_)
            | LedgerError::TransactionFailed(_) => ApiError::Rejected(err.to_string()),
            LedgerError::InvalidTimeout | LedgerError::InvalidBeneficiary => {
                ApiError::BadRequest(err.to_string())
            }
            LedgerError::ReadOnly | LedgerError::UnexpectedValue(_) | LedgerError::Chain(_) => {
                ApiError::Unavailable(err.to_string())
            }
        }
    }
}

impl From<FacilitatorError> for ApiError {
    fn from(err: FacilitatorError) -> Self {
        match err {
            FacilitatorError::SettlementAborted(_) => ApiError::Rejected(err.to_string()),
            FacilitatorError::Scheme(SchemeError::Chain(_)) => ApiError::Unavailable(err.to_string()),
        }
    }
}
