//! Route definitions for the ReliQ agent and facilitator

use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::app_state::{AppState, FacilitatorState};
use crate::handlers::{agent, facilitator, heartbeat, vault};
use crate::payment::gate::{PAYMENT_REQUIRED, PAYMENT_RESPONSE, PAYMENT_SIGNATURE, X_PAYMENT};
use crate::payment::payment_middleware;

// Open agent routes
pub fn agent_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(agent::health))
        .route("/api/verify", post(agent::verify_free))
}

// Routes that require an x402 payment
pub fn paid_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/api/verify-paid", post(agent::verify_paid))
        .route_layer(middleware::from_fn_with_state(
            state.payment_gate.clone(),
            payment_middleware,
        ))
}

// Heartbeat relay and vault status
pub fn heartbeat_routes() -> Router<AppState> {
    Router::new()
        .route("/api/heartbeat/respond", post(heartbeat::respond))
        .route("/api/heartbeat/status/:vault_id", get(heartbeat::status))
}

pub fn vault_routes() -> Router<AppState> {
    Router::new().route("/api/vaults/:vault_id/trigger", post(vault::trigger))
}

pub fn facilitator_routes() -> Router<FacilitatorState> {
    Router::new()
        .route("/", get(facilitator::info))
        .route("/verify", post(facilitator::verify))
        .route("/settle", post(facilitator::settle))
        .route("/supported", get(facilitator::supported))
}

/// Full agent application.
pub fn agent_app(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .merge(agent_routes())
        .merge(paid_routes(&state))
        .merge(heartbeat_routes())
        .merge(vault_routes())
        .layer(build_cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Full facilitator application.
pub fn facilitator_app(state: FacilitatorState, allowed_origins: &[String]) -> Router {
    facilitator_routes()
        .layer(build_cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allowed_origins = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            PAYMENT_SIGNATURE,
            X_PAYMENT,
        ])
        .expose_headers([PAYMENT_REQUIRED, PAYMENT_RESPONSE])
        .allow_credentials(false)
}
