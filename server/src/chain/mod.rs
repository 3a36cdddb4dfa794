//! Provider access to the EVM chain hosting the vault contract and payment
//! token.

pub mod contracts;

use std::future::IntoFuture;
use std::time::Duration;

use alloy::contract::Error as ContractError;
use alloy::network::{Ethereum, EthereumWallet, ReceiptResponse};
use alloy::providers::{
    DynProvider, PendingTransactionBuilder, PendingTransactionError, Provider, ProviderBuilder,
};
use alloy::transports::http::reqwest::Url;
use alloy::transports::TransportError;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::crypto::{Address, Wallet, B256};

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("invalid rpc url: {0}")]
    InvalidUrl(String),

    #[error("rpc error: {0}")]
    Rpc(#[from] TransportError),

    #[error("contract call failed: {0}")]
    Contract(#[from] ContractError),

    #[error("transaction not confirmed: {0}")]
    Pending(#[from] PendingTransactionError),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("no signing key configured")]
    ReadOnly,
}

impl ChainError {
    /// Node error message when the call was refused as an EVM revert.
    pub fn revert_message(&self) -> Option<String> {
        let transport = match self {
            ChainError::Rpc(err) => err,
            ChainError::Contract(ContractError::TransportError(err)) => err,
            _ => return None,
        };
        transport
            .as_error_resp()
            .map(|payload| payload.message.to_string())
            .filter(|message| message.contains("revert"))
    }
}

/// Outcome of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
    pub status: bool,
}

pub struct ChainClient {
    provider: DynProvider,
    signer: Option<Address>,
    request_timeout: Duration,
    receipt_timeout: Duration,
    // One in-flight broadcast per client so filled nonces never collide.
    send_lock: Mutex<()>,
}

impl ChainClient {
    /// HTTP provider; with a wallet it fills nonce, gas and chain id and
    /// signs locally.
    pub fn new(
        rpc_url: &str,
        wallet: Option<Wallet>,
        request_timeout: Duration,
        receipt_timeout: Duration,
    ) -> Result<Self, ChainError> {
        let url = rpc_url
            .parse::<Url>()
            .map_err(|e| ChainError::InvalidUrl(e.to_string()))?;
        let signer = wallet.as_ref().map(|w| w.address());
        let provider = match wallet {
            Some(wallet) => ProviderBuilder::new()
                .wallet(EthereumWallet::from(wallet))
                .connect_http(url)
                .erased(),
            None => ProviderBuilder::new().connect_http(url).erased(),
        };
        Ok(Self {
            provider,
            signer,
            request_timeout,
            receipt_timeout,
            send_lock: Mutex::new(()),
        })
    }

    pub fn provider(&self) -> &DynProvider {
        &self.provider
    }

    pub fn signer_address(&self) -> Option<Address> {
        self.signer
    }

    pub async fn chain_id(&self) -> Result<u64, ChainError> {
        self.read(self.provider.get_chain_id()).await
    }

    /// Await a read-only call under the request timeout.
    pub async fn read<T, E, F>(&self, call: F) -> Result<T, ChainError>
    where
        F: IntoFuture<Output = Result<T, E>>,
        ChainError: From<E>,
    {
        match timeout(self.request_timeout, call.into_future()).await {
            Ok(result) => result.map_err(ChainError::from),
            Err(_) => Err(ChainError::Timeout(self.request_timeout)),
        }
    }

    /// Broadcast a contract write and wait for its receipt. `label` names the
    /// call in logs.
    pub async fn submit<F>(&self, label: &str, send: F) -> Result<TxReceipt, ChainError>
    where
        F: IntoFuture<Output = Result<PendingTransactionBuilder<Ethereum>, ContractError>>,
    {
        let from = self.signer.ok_or(ChainError::ReadOnly)?;
        let pending = {
            let _guard = self.send_lock.lock().await;
            self.read(send).await?
        };
        debug!(%from, method = label, tx_hash = %pending.tx_hash(), "transaction broadcast");

        let receipt = pending
            .with_timeout(Some(self.receipt_timeout))
            .get_receipt()
            .await?;
        let receipt = TxReceipt {
            tx_hash: receipt.transaction_hash(),
            block_number: receipt.block_number(),
            gas_used: Some(receipt.gas_used()),
            status: receipt.status(),
        };
        info!(
            method = label,
            tx_hash = %receipt.tx_hash,
            block = ?receipt.block_number,
            status = receipt.status,
            "transaction mined"
        );
        Ok(receipt)
    }
}
