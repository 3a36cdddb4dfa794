//! Business logic services for ReliQ

pub mod heartbeat;
pub mod liveness;
pub mod oracle_service;
pub mod vault_service;

pub use heartbeat::HeartbeatSigner;
pub use oracle_service::{OpenRouterOracle, ProofVerifier};
pub use vault_service::{UnlockOutcome, VaultService};
