//! ReliQ Agent Server
//!
//! Serves vault heartbeats, status and triggers, a free mock verifier and
//! the x402-gated AI verification that unlocks vaults.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use reliq_server::app_state::AppState;
use reliq_server::chain::ChainClient;
use reliq_server::clock::{Clock, SystemClock};
use reliq_server::config::{AgentConfig, LedgerBackend, LedgerConfig, PaymentConfig};
use reliq_server::crypto::eip712::reliq_domain;
use reliq_server::crypto::{parse_wallet, Address};
use reliq_server::ledger::{InMemoryLedger, RpcLedger, VaultLedger};
use reliq_server::payment::{
    HttpFacilitatorClient, NetworkPattern, PaymentGate, ResourceServer, RoutePaymentConfig,
};
use reliq_server::routes;
use reliq_server::services::{OpenRouterOracle, VaultService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AgentConfig::from_env().context("invalid agent configuration")?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let ledger = build_ledger(&config.ledger, clock.clone())?;
    let vault_service = Arc::new(VaultService::new(ledger, clock));
    let oracle = Arc::new(OpenRouterOracle::new(config.oracle.clone()).context("oracle client")?);
    let payment_gate = build_payment_gate(&config.payment).await;

    let state = AppState::new(vault_service, oracle, payment_gate);
    let app = routes::agent_app(state, &config.cors_allowed_origins);

    let addr = SocketAddr::new(config.bind_addr, config.port);
    info!("ReliQ Agent listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_ledger(config: &LedgerConfig, clock: Arc<dyn Clock>) -> anyhow::Result<Arc<dyn VaultLedger>> {
    match config.backend {
        LedgerBackend::Memory => {
            let domain = reliq_domain(
                config.chain_id,
                config.contract_address.unwrap_or(Address::ZERO),
            );
            warn!("using in-memory ledger; vault state is lost on restart");
            Ok(Arc::new(InMemoryLedger::new(&domain, clock)))
        }
        LedgerBackend::Rpc => {
            let contract = config
                .contract_address
                .context("RELIQ_CONTRACT_ADDRESS is required for the rpc ledger")?;
            let signer = match &config.agent_private_key {
                Some(key) => Some(parse_wallet(key).context("AGENT_PRIVATE_KEY")?),
                None => {
                    warn!("AGENT_PRIVATE_KEY not set; ledger is read-only");
                    None
                }
            };
            if let Some(wallet) = &signer {
                info!(agent = %wallet.address(), contract = %contract, "rpc ledger ready");
            }
            let chain = Arc::new(ChainClient::new(
                &config.rpc_url,
                signer,
                config.rpc_timeout,
                config.receipt_timeout,
            )?);
            Ok(Arc::new(RpcLedger::new(chain, contract)))
        }
    }
}

/// A gate that cannot reach its facilitator is left out; the paid route then
/// answers 503 while the rest of the service keeps running.
async fn build_payment_gate(config: &PaymentConfig) -> Option<Arc<PaymentGate>> {
    let client = match HttpFacilitatorClient::new(config.facilitator_url.clone(), config.facilitator_timeout) {
        Ok(client) => client,
        Err(err) => {
            warn!(error = %err, "failed to build facilitator client");
            return None;
        }
    };
    let server = ResourceServer::new(Arc::new(client))
        .register(NetworkPattern::Namespace("eip155".to_string()), "exact");
    let route = RoutePaymentConfig::exact(config, "ReliQ Agent Verification Service");

    match PaymentGate::initialize(server, route).await {
        Ok(gate) => {
            info!(
                facilitator = %config.facilitator_url,
                pay_to = %config.pay_to,
                network = %config.network,
                "x402 payment gate initialized"
            );
            Some(Arc::new(gate))
        }
        Err(err) => {
            warn!(error = %err, "failed to initialize x402 gate; /api/verify-paid will return 503");
            None
        }
    }
}
