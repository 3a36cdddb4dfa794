//! Resource-server side of x402: admission control for protected routes.
//!
//! A verified payment admits one request. The payment is settled only after
//! the handler answers with a non-error status, and each signed payload is
//! admitted at most once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};

use super::client::{ClientError, FacilitatorClient};
use super::facilitator::settlement_key;
use super::network::NetworkPattern;
use crate::config::PaymentConfig;
use crate::crypto::Address;
use crate::models::payment::{
    PaymentPayload, PaymentRequired, PaymentRequirements, ResourceInfo, X402_VERSION,
};
use crate::models::ApiResponse;

pub const PAYMENT_SIGNATURE: HeaderName = HeaderName::from_static("payment-signature");
pub const X_PAYMENT: HeaderName = HeaderName::from_static("x-payment");
pub const PAYMENT_REQUIRED: HeaderName = HeaderName::from_static("payment-required");
pub const PAYMENT_RESPONSE: HeaderName = HeaderName::from_static("payment-response");

pub const GATEWAY_DOWN: &str = "Service unavailable: Payment gateway (x402) is down.";
pub const PAYMENT_ALREADY_USED: &str = "payment_already_used";

/// How long a settled payload stays refused at the gate. Past this the token's
/// `authorizationState` still rejects it at verification.
const ADMITTED_RETENTION: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Facilitator(#[from] ClientError),

    #[error("facilitator supports none of the configured payment options")]
    NoSupportedOption,
}

/// Price declaration for one protected route.
#[derive(Debug, Clone)]
pub struct RoutePaymentConfig {
    pub accepts: Vec<PaymentRequirements>,
    pub description: Option<String>,
    pub mime_type: Option<String>,
}

impl RoutePaymentConfig {
    pub fn exact(config: &PaymentConfig, description: impl Into<String>) -> Self {
        Self {
            accepts: vec![PaymentRequirements {
                scheme: "exact".to_string(),
                network: config.network.clone(),
                amount: config.amount.clone(),
                asset: config.asset,
                pay_to: config.pay_to,
                max_timeout_seconds: config.max_timeout_seconds,
                extra: json!({ "name": config.token_name, "version": config.token_version }),
            }],
            description: Some(description.into()),
            mime_type: Some("application/json".to_string()),
        }
    }
}

/// Facilitator client plus the (network, scheme) pairs this server accepts.
pub struct ResourceServer {
    client: Arc<dyn FacilitatorClient>,
    schemes: Vec<(NetworkPattern, String)>,
}

impl ResourceServer {
    pub fn new(client: Arc<dyn FacilitatorClient>) -> Self {
        Self {
            client,
            schemes: Vec::new(),
        }
    }

    pub fn register(mut self, network: NetworkPattern, scheme: impl Into<String>) -> Self {
        self.schemes.push((network, scheme.into()));
        self
    }

    fn accepts(&self, requirements: &PaymentRequirements) -> bool {
        self.schemes
            .iter()
            .any(|(network, scheme)| *scheme == requirements.scheme && network.matches(&requirements.network))
    }
}

/// Verified payment admitting the current request, available to handlers as
/// a request extension. Settlement follows the handler's response.
#[derive(Debug, Clone)]
pub struct VerifiedPayment {
    pub payer: Option<Address>,
    pub requirements: PaymentRequirements,
}

/// Settlement keys of payloads that are in flight or already settled.
#[derive(Default)]
struct AdmittedPayments {
    keys: Mutex<HashMap<String, Instant>>,
}

impl AdmittedPayments {
    /// Claim `key`. False if another request already holds or spent it.
    fn reserve(&self, key: &str) -> bool {
        let mut keys = self.keys.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();
        keys.retain(|_, admitted| now.duration_since(*admitted) < ADMITTED_RETENTION);
        if keys.contains_key(key) {
            return false;
        }
        keys.insert(key.to_string(), now);
        true
    }

    /// Give `key` back after the request ended without a settlement.
    fn release(&self, key: &str) {
        self.keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(key);
    }
}

pub struct PaymentGate {
    server: ResourceServer,
    route: RoutePaymentConfig,
    admitted: AdmittedPayments,
}

impl PaymentGate {
    /// Confirm the facilitator can serve at least one of the route's options.
    pub async fn initialize(
        server: ResourceServer,
        route: RoutePaymentConfig,
    ) -> Result<Self, GateError> {
        let supported = server.client.supported().await?;
        let usable = route.accepts.iter().any(|option| {
            server.accepts(option)
                && supported.kinds.iter().any(|kind| {
                    kind.scheme == option.scheme
                        && kind
                            .network
                            .parse::<NetworkPattern>()
                            .map(|pattern| pattern.matches(&option.network))
                            .unwrap_or(false)
                })
        });
        if !usable {
            return Err(GateError::NoSupportedOption);
        }
        info!(options = route.accepts.len(), "payment gate ready");
        Ok(Self {
            server,
            route,
            admitted: AdmittedPayments::default(),
        })
    }

    fn payment_required(&self, error: impl Into<String>, url: &str) -> Response {
        let body = PaymentRequired {
            x402_version: X402_VERSION,
            error: error.into(),
            resource: Some(ResourceInfo {
                url: url.to_string(),
                description: self.route.description.clone(),
                mime_type: self.route.mime_type.clone(),
            }),
            accepts: self.route.accepts.clone(),
        };
        let mut response = (StatusCode::PAYMENT_REQUIRED, Json(&body)).into_response();
        if let Some(value) = encode_header(&body) {
            response.headers_mut().insert(PAYMENT_REQUIRED, value);
        }
        response
    }

    fn select(&self, payload: &PaymentPayload) -> Option<&PaymentRequirements> {
        self.route.accepts.iter().find(|option| {
            option.scheme == payload.scheme()
                && option.network == payload.network()
                && self.server.accepts(option)
        })
    }
}

fn encode_header<T: Serialize>(value: &T) -> Option<HeaderValue> {
    let json = serde_json::to_vec(value).ok()?;
    HeaderValue::from_str(&STANDARD.encode(json)).ok()
}

fn decode_payment(headers: &HeaderMap) -> Option<Result<PaymentPayload, String>> {
    let raw = headers
        .get(PAYMENT_SIGNATURE)
        .or_else(|| headers.get(X_PAYMENT))?;
    Some(
        raw.to_str()
            .map_err(|e| e.to_string())
            .and_then(|text| STANDARD.decode(text.trim()).map_err(|e| e.to_string()))
            .and_then(|bytes| serde_json::from_slice(&bytes).map_err(|e| e.to_string())),
    )
}

fn gateway_unavailable() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ApiResponse::<()>::err(GATEWAY_DOWN)),
    )
        .into_response()
}

/// `axum::middleware::from_fn_with_state` entry point. `None` means the gate
/// failed to initialise; protected requests then get a 503.
pub async fn payment_middleware(
    State(gate): State<Option<Arc<PaymentGate>>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(gate) = gate else {
        warn!("payment gate not initialised; refusing protected request");
        return gateway_unavailable();
    };
    let url = request.uri().path().to_string();

    let payload = match decode_payment(request.headers()) {
        None => return gate.payment_required("Payment required", &url),
        Some(Err(reason)) => {
            warn!(%reason, "undecodable payment header");
            return gate.payment_required("Invalid payment header", &url);
        }
        Some(Ok(payload)) => payload,
    };

    let Some(requirements) = gate.select(&payload).cloned() else {
        return gate.payment_required("No matching payment requirements", &url);
    };

    let payer = match gate.server.client.verify(&payload, &requirements).await {
        Ok(verdict) if verdict.success => verdict.payer,
        Ok(verdict) => {
            let reason = verdict
                .invalid_reason
                .unwrap_or_else(|| "Payment verification failed".to_string());
            info!(%reason, "payment rejected");
            return gate.payment_required(reason, &url);
        }
        Err(err) => {
            error!(error = %err, "payment verification unavailable");
            return gateway_unavailable();
        }
    };

    let key = settlement_key(&payload);
    if !gate.admitted.reserve(&key) {
        info!(payer = ?payer, "payment payload already used");
        return gate.payment_required(PAYMENT_ALREADY_USED, &url);
    }

    request.extensions_mut().insert(VerifiedPayment {
        payer,
        requirements: requirements.clone(),
    });
    let mut response = next.run(request).await;

    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        gate.admitted.release(&key);
        info!(%status, payer = ?payer, "handler failed; payment not settled");
        return response;
    }

    let settlement = match gate.server.client.settle(&payload, &requirements).await {
        Ok(settlement) if settlement.success => settlement,
        Ok(settlement) => {
            gate.admitted.release(&key);
            let reason = settlement
                .error_reason
                .unwrap_or_else(|| "Payment settlement failed".to_string());
            info!(%reason, "payment settlement failed");
            return gate.payment_required(reason, &url);
        }
        Err(err) => {
            gate.admitted.release(&key);
            error!(error = %err, "payment settlement unavailable");
            return gateway_unavailable();
        }
    };

    info!(tx_hash = ?settlement.tx_hash, payer = ?settlement.payer, "payment settled");
    if let Some(value) = encode_header(&settlement) {
        response.headers_mut().insert(PAYMENT_RESPONSE, value);
    }
    response
}
