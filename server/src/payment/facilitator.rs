//! Verifies and settles payment payloads for registered (scheme, network)
//! pairs, running lifecycle hooks around each phase.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use serde_json::json;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::hooks::{
    hook, run_gate, run_observers, FailureContext, HookError, HookRegistry, PaymentContext,
    SettledContext, VerifiedContext,
};
use super::network::NetworkPattern;
use super::scheme::{SchemeError, SchemeFacilitator};
use crate::models::payment::{
    PaymentPayload, PaymentRequirements, SettleResponse, SupportedKind, SupportedResponse,
    VerifyResponse, X402_VERSION,
};

pub const SETTLEMENT_ABORTED_PREFIX: &str = "Settlement aborted: ";

#[derive(Debug, Error)]
pub enum FacilitatorError {
    /// A `before_settle` hook refused the settlement.
    #[error("Settlement aborted: {0}")]
    SettlementAborted(String),

    #[error(transparent)]
    Scheme(#[from] SchemeError),
}

impl FacilitatorError {
    /// Reason carried by a settlement abort, also when the error crossed a
    /// process boundary as a plain message.
    pub fn abort_reason(message: &str) -> Option<&str> {
        message
            .find(SETTLEMENT_ABORTED_PREFIX)
            .map(|index| &message[index + SETTLEMENT_ABORTED_PREFIX.len()..])
    }
}

enum SettleAttempt {
    /// In-band failure; returned to the caller but not cached.
    Declined(SettleResponse),
    Error(FacilitatorError),
}

struct Registration {
    network: NetworkPattern,
    scheme: Arc<dyn SchemeFacilitator>,
}

pub struct Facilitator {
    registrations: Vec<Registration>,
    hooks: HookRegistry,
    settlements: Mutex<HashMap<String, Arc<OnceCell<SettleResponse>>>>,
}

#[derive(Default)]
pub struct FacilitatorBuilder {
    registrations: Vec<Registration>,
    hooks: HookRegistry,
}

impl FacilitatorBuilder {
    pub fn register(mut self, network: NetworkPattern, scheme: Arc<dyn SchemeFacilitator>) -> Self {
        info!(scheme = scheme.scheme(), %network, "registered payment scheme");
        self.registrations.push(Registration { network, scheme });
        self
    }

    pub fn hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn on_before_verify<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(PaymentContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HookError>> + Send + 'static,
    {
        self.hooks.before_verify.push(hook(f));
        self
    }

    pub fn on_after_verify<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(VerifiedContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HookError>> + Send + 'static,
    {
        self.hooks.after_verify.push(hook(f));
        self
    }

    pub fn on_verify_failure<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(FailureContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HookError>> + Send + 'static,
    {
        self.hooks.verify_failure.push(hook(f));
        self
    }

    pub fn on_before_settle<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(PaymentContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HookError>> + Send + 'static,
    {
        self.hooks.before_settle.push(hook(f));
        self
    }

    pub fn on_after_settle<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(SettledContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HookError>> + Send + 'static,
    {
        self.hooks.after_settle.push(hook(f));
        self
    }

    pub fn on_settle_failure<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(FailureContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HookError>> + Send + 'static,
    {
        self.hooks.settle_failure.push(hook(f));
        self
    }

    pub fn build(self) -> Facilitator {
        Facilitator {
            registrations: self.registrations,
            hooks: self.hooks,
            settlements: Mutex::new(HashMap::new()),
        }
    }
}

impl Facilitator {
    pub fn builder() -> FacilitatorBuilder {
        FacilitatorBuilder::default()
    }

    fn scheme_for(&self, requirements: &PaymentRequirements) -> Option<&Arc<dyn SchemeFacilitator>> {
        self.registrations
            .iter()
            .find(|r| r.scheme.scheme() == requirements.scheme && r.network.matches(&requirements.network))
            .map(|r| &r.scheme)
    }

    pub fn networks(&self) -> Vec<String> {
        let mut networks: Vec<String> = self
            .registrations
            .iter()
            .map(|r| r.network.to_string())
            .collect();
        networks.dedup();
        networks
    }

    pub fn supported(&self) -> SupportedResponse {
        SupportedResponse {
            kinds: self
                .registrations
                .iter()
                .map(|r| SupportedKind {
                    x402_version: X402_VERSION,
                    scheme: r.scheme.scheme().to_string(),
                    network: r.network.to_string(),
                })
                .collect(),
        }
    }

    pub async fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, FacilitatorError> {
        let ctx = PaymentContext {
            payload: payload.clone(),
            requirements: requirements.clone(),
        };
        if let Err(err) = run_gate(&self.hooks.before_verify, &ctx).await {
            info!(reason = err.reason(), "verification aborted by hook");
            return Ok(VerifyResponse::invalid(err.reason()));
        }

        let outcome = if payload.x402_version != X402_VERSION {
            Ok(VerifyResponse::invalid("unsupported_x402_version"))
        } else {
            match self.scheme_for(requirements) {
                Some(scheme) => scheme.verify(payload, requirements).await,
                None => Ok(VerifyResponse::invalid("unsupported_scheme")),
            }
        };

        match outcome {
            Ok(result) => {
                let done = VerifiedContext {
                    payload: ctx.payload,
                    requirements: ctx.requirements,
                    result: result.clone(),
                };
                run_observers(&self.hooks.after_verify, &done, "after_verify").await;
                Ok(result)
            }
            Err(err) => {
                let failed = FailureContext {
                    payload: ctx.payload,
                    requirements: ctx.requirements,
                    error: err.to_string(),
                };
                run_observers(&self.hooks.verify_failure, &failed, "verify_failure").await;
                Err(err.into())
            }
        }
    }

    /// Settle at most once per distinct payload. Repeats of a settled payload
    /// get the original response; failures are not remembered.
    pub async fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, FacilitatorError> {
        let key = settlement_key(payload);
        let cell = {
            let mut settlements = self
                .settlements
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            settlements
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        if cell.initialized() {
            debug!(key = %key, "returning recorded settlement");
        }

        let attempt = cell
            .get_or_try_init(|| self.settle_once(payload, requirements))
            .await;
        match attempt {
            Ok(response) => Ok(response.clone()),
            Err(failure) => {
                self.forget(&key, &cell);
                match failure {
                    SettleAttempt::Declined(response) => Ok(response),
                    SettleAttempt::Error(err) => Err(err),
                }
            }
        }
    }

    fn forget(&self, key: &str, cell: &Arc<OnceCell<SettleResponse>>) {
        let mut settlements = self
            .settlements
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let stale = settlements
            .get(key)
            .map(|existing| Arc::ptr_eq(existing, cell) && !existing.initialized())
            .unwrap_or(false);
        if stale {
            settlements.remove(key);
        }
    }

    async fn settle_once(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, SettleAttempt> {
        let ctx = PaymentContext {
            payload: payload.clone(),
            requirements: requirements.clone(),
        };
        let failed = |error: String| FailureContext {
            payload: payload.clone(),
            requirements: requirements.clone(),
            error,
        };

        if let Err(err) = run_gate(&self.hooks.before_settle, &ctx).await {
            let err = FacilitatorError::SettlementAborted(err.reason().to_string());
            run_observers(&self.hooks.settle_failure, &failed(err.to_string()), "settle_failure")
                .await;
            return Err(SettleAttempt::Error(err));
        }

        let Some(scheme) = self.scheme_for(requirements) else {
            let response = SettleResponse::failed(payload.network(), "unsupported_scheme");
            run_observers(&self.hooks.settle_failure, &failed("unsupported_scheme".into()), "settle_failure")
                .await;
            return Err(SettleAttempt::Declined(response));
        };

        match scheme.settle(payload, requirements).await {
            Ok(response) if response.success => {
                let done = SettledContext {
                    payload: ctx.payload,
                    requirements: ctx.requirements,
                    result: response.clone(),
                };
                run_observers(&self.hooks.after_settle, &done, "after_settle").await;
                Ok(response)
            }
            Ok(response) => {
                let reason = response.error_reason.clone().unwrap_or_default();
                run_observers(&self.hooks.settle_failure, &failed(reason), "settle_failure").await;
                Err(SettleAttempt::Declined(response))
            }
            Err(err) => {
                run_observers(&self.hooks.settle_failure, &failed(err.to_string()), "settle_failure")
                    .await;
                Err(SettleAttempt::Error(err.into()))
            }
        }
    }
}

/// SHA-256 over the canonical JSON of scheme, network and signed payload.
/// `serde_json` maps are key-sorted, which makes the encoding canonical.
pub fn settlement_key(payload: &PaymentPayload) -> String {
    let canonical = json!({
        "scheme": payload.scheme(),
        "network": payload.network(),
        "payload": payload.payload,
    });
    hex::encode(Sha256::digest(canonical.to_string().as_bytes()))
}
