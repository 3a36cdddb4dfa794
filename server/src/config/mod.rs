//! Environment-driven configuration for the agent and facilitator binaries.

use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::crypto::{Address, U256};

pub const DEFAULT_RPC_URL: &str = "https://base-sepolia-testnet.skalenodes.com/v1/bite-v2-sandbox";
pub const DEFAULT_NETWORK: &str = "eip155:103698795";
pub const DEFAULT_CHAIN_ID: u64 = 103_698_795;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_or<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn address_or_default(name: &'static str, default: &str) -> Result<Address, ConfigError> {
    let raw = var(name).unwrap_or_else(|| {
        warn!("{name} not set, using default {default}");
        default.to_string()
    });
    raw.trim().parse::<Address>().map_err(|e| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

fn seconds(name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    parse_or(name, default).map(Duration::from_secs)
}

#[derive(Clone, Debug)]
pub struct OracleConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl OracleConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = var("OPENROUTER_API_KEY");
        if api_key.is_none() {
            warn!("OPENROUTER_API_KEY not set; every proof will be rejected");
        }
        Ok(Self {
            api_key,
            model: var("OPENROUTER_MODEL").unwrap_or_else(|| "anthropic/claude-3.5-sonnet".to_string()),
            base_url: var("OPENROUTER_BASE_URL")
                .unwrap_or_else(|| "https://openrouter.ai/api/v1".to_string()),
            timeout: seconds("ORACLE_TIMEOUT_SECONDS", 30)?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedgerBackend {
    Rpc,
    Memory,
}

impl FromStr for LedgerBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rpc" => Ok(LedgerBackend::Rpc),
            "memory" => Ok(LedgerBackend::Memory),
            other => Err(format!("unknown ledger backend '{other}' (expected rpc or memory)")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,
    pub rpc_url: String,
    pub chain_id: u64,
    pub contract_address: Option<Address>,
    pub agent_private_key: Option<String>,
    pub rpc_timeout: Duration,
    pub receipt_timeout: Duration,
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend = parse_or("LEDGER_BACKEND", LedgerBackend::Rpc)?;
        let contract_address = match var("RELIQ_CONTRACT_ADDRESS") {
            Some(raw) => Some(raw.trim().parse::<Address>().map_err(|e| {
                ConfigError::Invalid {
                    name: "RELIQ_CONTRACT_ADDRESS",
                    reason: e.to_string(),
                }
            })?),
            None => None,
        };
        if backend == LedgerBackend::Rpc && contract_address.is_none() {
            return Err(ConfigError::Missing("RELIQ_CONTRACT_ADDRESS"));
        }

        Ok(Self {
            backend,
            rpc_url: var("SKALE_RPC_URL")
                .or_else(|| var("RPC_URL"))
                .unwrap_or_else(|| DEFAULT_RPC_URL.to_string()),
            chain_id: parse_or("CHAIN_ID", DEFAULT_CHAIN_ID)?,
            contract_address,
            agent_private_key: var("AGENT_PRIVATE_KEY"),
            rpc_timeout: seconds("RPC_TIMEOUT_SECONDS", 15)?,
            receipt_timeout: seconds("RECEIPT_TIMEOUT_SECONDS", 60)?,
        })
    }
}

#[derive(Clone, Debug)]
pub struct PaymentConfig {
    pub facilitator_url: String,
    pub pay_to: Address,
    pub asset: Address,
    pub network: String,
    pub amount: String,
    pub token_name: String,
    pub token_version: String,
    pub max_timeout_seconds: u64,
    pub facilitator_timeout: Duration,
}

impl PaymentConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let amount = var("PAYMENT_AMOUNT").unwrap_or_else(|| "10000".to_string());
        if U256::from_str_radix(amount.trim(), 10).is_err() {
            return Err(ConfigError::Invalid {
                name: "PAYMENT_AMOUNT",
                reason: "must be an integer amount of atomic units".to_string(),
            });
        }

        Ok(Self {
            facilitator_url: var("FACILITATOR_URL").unwrap_or_else(|| {
                warn!("FACILITATOR_URL not set, using https://facilitator.dirtroad.dev");
                "https://facilitator.dirtroad.dev".to_string()
            }),
            pay_to: address_or_default(
                "AGENT_WALLET_ADDRESS",
                "0x000000000000000000000000000000000000dEaD",
            )?,
            asset: address_or_default(
                "PAYMENT_TOKEN_ADDRESS",
                "0xc4083B1E81ceb461Ccef3FDa8A9F24F0d764B6D8",
            )?,
            network: var("PAYMENT_NETWORK").unwrap_or_else(|| DEFAULT_NETWORK.to_string()),
            amount,
            token_name: var("PAYMENT_TOKEN_NAME").unwrap_or_else(|| "Axios USD".to_string()),
            token_version: var("PAYMENT_TOKEN_VERSION").unwrap_or_else(|| "1".to_string()),
            max_timeout_seconds: parse_or("PAYMENT_MAX_TIMEOUT_SECONDS", 300)?,
            facilitator_timeout: seconds("FACILITATOR_TIMEOUT_SECONDS", 30)?,
        })
    }
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub bind_addr: IpAddr,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
    pub payment: PaymentConfig,
    pub oracle: OracleConfig,
    pub ledger: LedgerConfig,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bind_addr: parse_or("BIND_ADDR", IpAddr::V4(Ipv4Addr::LOCALHOST))?,
            port: parse_or("PORT", 3002)?,
            cors_allowed_origins: cors_origins(),
            payment: PaymentConfig::from_env()?,
            oracle: OracleConfig::from_env()?,
            ledger: LedgerConfig::from_env()?,
        })
    }
}

#[derive(Clone, Debug)]
pub struct FacilitatorConfig {
    pub bind_addr: IpAddr,
    pub port: u16,
    pub private_key: String,
    pub rpc_url: String,
    pub networks: Vec<String>,
    pub rpc_timeout: Duration,
    pub receipt_timeout: Duration,
}

impl FacilitatorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let private_key = var("EVM_PRIVATE_KEY").ok_or(ConfigError::Missing("EVM_PRIVATE_KEY"))?;
        let networks = var("FACILITATOR_NETWORKS")
            .unwrap_or_else(|| DEFAULT_NETWORK.to_string())
            .split(',')
            .map(|network| network.trim().to_string())
            .filter(|network| !network.is_empty())
            .collect();

        Ok(Self {
            bind_addr: parse_or("BIND_ADDR", IpAddr::V4(Ipv4Addr::LOCALHOST))?,
            port: parse_or("PORT", 8080)?,
            private_key,
            rpc_url: var("RPC_URL_103698795")
                .or_else(|| var("RPC_URL"))
                .unwrap_or_else(|| DEFAULT_RPC_URL.to_string()),
            networks,
            rpc_timeout: seconds("RPC_TIMEOUT_SECONDS", 15)?,
            receipt_timeout: seconds("RECEIPT_TIMEOUT_SECONDS", 60)?,
        })
    }
}

pub fn cors_origins() -> Vec<String> {
    var("CORS_ALLOWED_ORIGINS")
        .unwrap_or_else(|| "http://localhost:3000".to_string())
        .split(',')
        .map(|origin| origin.trim().to_string())
        .filter(|origin| !origin.is_empty())
        .collect()
}
