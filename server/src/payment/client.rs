//! How a resource server reaches its facilitator: over HTTP, or in-process.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::warn;

use super::facilitator::{Facilitator, FacilitatorError};
use crate::models::payment::{
    FacilitatorRequest, PaymentPayload, PaymentRequirements, SettleResponse, SupportedResponse,
    VerifyResponse,
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("facilitator unavailable: {0}")]
    Unavailable(String),

    #[error("facilitator rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("unreadable facilitator response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait FacilitatorClient: Send + Sync {
    async fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, ClientError>;

    async fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, ClientError>;

    async fn supported(&self) -> Result<SupportedResponse, ClientError>;
}

pub struct HttpFacilitatorClient {
    base_url: String,
    http: Client,
}

impl HttpFacilitatorClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Unavailable(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "facilitator returned server error");
            return Err(ClientError::Unavailable(format!("{status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<T, ClientError> {
        let body = FacilitatorRequest {
            payment_payload: Some(payload.clone()),
            payment_requirements: Some(requirements.clone()),
        };
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| ClientError::Unavailable(e.to_string()))?;
        Self::read(response).await
    }
}

#[async_trait]
impl FacilitatorClient for HttpFacilitatorClient {
    async fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, ClientError> {
        self.post("/verify", payload, requirements).await
    }

    async fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, ClientError> {
        self.post("/settle", payload, requirements).await
    }

    async fn supported(&self) -> Result<SupportedResponse, ClientError> {
        let response = self
            .http
            .get(format!("{}/supported", self.base_url))
            .send()
            .await
            .map_err(|e| ClientError::Unavailable(e.to_string()))?;
        Self::read(response).await
    }
}

/// In-process facilitator, with the same abort conversion as `POST /settle`.
#[async_trait]
impl FacilitatorClient for Facilitator {
    async fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, ClientError> {
        Facilitator::verify(self, payload, requirements)
            .await
            .map_err(|e| ClientError::Unavailable(e.to_string()))
    }

    async fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, ClientError> {
        match Facilitator::settle(self, payload, requirements).await {
            Ok(response) => Ok(response),
            Err(FacilitatorError::SettlementAborted(reason)) => {
                Ok(SettleResponse::failed(payload.network(), reason))
            }
            Err(err) => Err(ClientError::Unavailable(err.to_string())),
        }
    }

    async fn supported(&self) -> Result<SupportedResponse, ClientError> {
        Ok(Facilitator::supported(self))
    }
}
