//! ReliQ x402 Facilitator
//!
//! Verifies and settles exact-scheme EVM payments for the agent's paid
//! routes, paying gas from its own wallet.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use reliq_server::app_state::FacilitatorState;
use reliq_server::chain::ChainClient;
use reliq_server::clock::{Clock, SystemClock};
use reliq_server::config::{cors_origins, FacilitatorConfig};
use reliq_server::crypto::parse_wallet;
use reliq_server::payment::exact_evm::EvmSigner;
use reliq_server::payment::network::evm_chain_id;
use reliq_server::payment::{ExactEvmScheme, Facilitator, HookRegistry, NetworkPattern, RpcEvmSigner};
use reliq_server::routes;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = FacilitatorConfig::from_env().context("invalid facilitator configuration")?;
    let wallet = parse_wallet(&config.private_key).context("EVM_PRIVATE_KEY")?;
    let address = wallet.address();

    let chain = Arc::new(ChainClient::new(
        &config.rpc_url,
        Some(wallet),
        config.rpc_timeout,
        config.receipt_timeout,
    )?);
    match chain.chain_id().await {
        Ok(chain_id) => {
            for network in &config.networks {
                if evm_chain_id(network).is_some_and(|expected| expected != chain_id) {
                    warn!(%network, chain_id, "RPC endpoint serves a different chain");
                }
            }
        }
        Err(err) => warn!(error = %err, rpc = %config.rpc_url, "could not reach RPC endpoint"),
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let signer: Arc<dyn EvmSigner> = Arc::new(RpcEvmSigner::new(chain)?);
    let scheme = Arc::new(ExactEvmScheme::new(signer, clock));

    let mut builder = Facilitator::builder().hooks(HookRegistry::with_tracing());
    for network in &config.networks {
        let pattern: NetworkPattern = network
            .parse()
            .map_err(|reason: String| anyhow::anyhow!(reason))
            .with_context(|| format!("FACILITATOR_NETWORKS entry {network}"))?;
        builder = builder.register(pattern, scheme.clone());
    }
    let facilitator = Arc::new(builder.build());

    let state = FacilitatorState {
        facilitator: facilitator.clone(),
        wallet: address,
    };
    let app = routes::facilitator_app(state, &cors_origins());

    let addr = SocketAddr::new(config.bind_addr, config.port);
    info!(wallet = %address, networks = ?facilitator.networks(), "ReliQ Facilitator listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}
