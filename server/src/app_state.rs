//! Application state shared across handlers

use std::sync::Arc;

use axum::extract::FromRef;

use crate::crypto::Address;
use crate::payment::{Facilitator, PaymentGate};
use crate::services::{ProofVerifier, VaultService};

/// Agent service state
#[derive(Clone)]
pub struct AppState {
    pub vault_service: Arc<VaultService>,
    pub oracle: Arc<dyn ProofVerifier>,
    pub payment_gate: Option<Arc<PaymentGate>>,
}

impl AppState {
    pub fn new(
        vault_service: Arc<VaultService>,
        oracle: Arc<dyn ProofVerifier>,
        payment_gate: Option<Arc<PaymentGate>>,
    ) -> Self {
        Self {
            vault_service,
            oracle,
            payment_gate,
        }
    }
}

impl FromRef<AppState> for Arc<VaultService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.vault_service.clone()
    }
}

impl FromRef<AppState> for Arc<dyn ProofVerifier> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.oracle.clone()
    }
}

/// Facilitator service state
#[derive(Clone)]
pub struct FacilitatorState {
    pub facilitator: Arc<Facilitator>,
    pub wallet: Address,
}

impl FromRef<FacilitatorState> for Arc<Facilitator> {
    fn from_ref(state: &FacilitatorState) -> Self {
        state.facilitator.clone()
    }
}
