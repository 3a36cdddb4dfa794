use async_trait::async_trait;
use thiserror::Error;

use crate::chain::ChainError;
use crate::models::payment::{PaymentPayload, PaymentRequirements, SettleResponse, VerifyResponse};

/// Infrastructure failures. Payload problems are reported in-band through
/// `VerifyResponse` / `SettleResponse` instead.
#[derive(Debug, Error)]
pub enum SchemeError {
    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Verify and settle logic for one payment scheme.
#[async_trait]
pub trait SchemeFacilitator: Send + Sync {
    fn scheme(&self) -> &str;

    async fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, SchemeError>;

    async fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, SchemeError>;
}
