//! CAIP-2 network identifiers (`eip155:<chainId>`) and wildcard patterns.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NetworkPattern {
    /// Exactly one network, e.g. `eip155:103698795`.
    Exact(String),
    /// Every network in a namespace, e.g. `eip155:*`.
    Namespace(String),
}

impl NetworkPattern {
    pub fn matches(&self, network: &str) -> bool {
        match self {
            NetworkPattern::Exact(expected) => expected == network,
            NetworkPattern::Namespace(namespace) => network
                .split_once(':')
                .map(|(ns, reference)| ns == namespace && !reference.is_empty())
                .unwrap_or(false),
        }
    }
}

impl FromStr for NetworkPattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (namespace, reference) = trimmed
            .split_once(':')
            .ok_or_else(|| format!("network '{trimmed}' is not namespace:reference"))?;
        if namespace.is_empty() || reference.is_empty() {
            return Err(format!("network '{trimmed}' is not namespace:reference"));
        }
        if reference == "*" {
            Ok(NetworkPattern::Namespace(namespace.to_string()))
        } else {
            Ok(NetworkPattern::Exact(trimmed.to_string()))
        }
    }
}

impl fmt::Display for NetworkPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkPattern::Exact(network) => f.write_str(network),
            NetworkPattern::Namespace(namespace) => write!(f, "{namespace}:*"),
        }
    }
}

/// Chain id of an `eip155:<id>` network.
pub fn evm_chain_id(network: &str) -> Option<u64> {
    network.strip_prefix("eip155:")?.parse().ok()
}
