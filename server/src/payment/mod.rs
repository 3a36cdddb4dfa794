//! x402 payments: the facilitator that verifies and settles payloads, and
//! the gate that puts a price on agent routes.

pub mod client;
pub mod exact_evm;
pub mod facilitator;
pub mod gate;
pub mod hooks;
pub mod network;
pub mod scheme;

pub use client::{ClientError, FacilitatorClient, HttpFacilitatorClient};
pub use exact_evm::{ExactEvmPayload, ExactEvmScheme, RpcEvmSigner};
pub use facilitator::{Facilitator, FacilitatorError};
pub use gate::{payment_middleware, PaymentGate, ResourceServer, RoutePaymentConfig, VerifiedPayment};
pub use hooks::{HookError, HookRegistry};
pub use network::NetworkPattern;
pub use scheme::{SchemeError, SchemeFacilitator};
