//! Data models for the ReliQ agent and facilitator APIs

use serde::{Deserialize, Serialize};

pub mod heartbeat;
pub mod payment;
pub mod vault;
pub mod verification;

pub use heartbeat::*;
pub use vault::*;
pub use verification::*;

/// Envelope used by every ReliQ JSON endpoint that is not part of the x402
/// wire protocol.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Wei amounts travel as decimal strings so JavaScript clients keep precision.
pub(crate) mod amount_string {
    use serde::Serializer;

    use crate::crypto::U256;

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }
}
