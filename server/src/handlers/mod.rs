//! HTTP handlers for the agent and facilitator services

pub mod agent;
pub mod facilitator;
pub mod heartbeat;
pub mod vault;

use validator::ValidationErrors;

/// First message attached to a failed field, or the full report.
pub(crate) fn validation_message(errors: &ValidationErrors) -> String {
    errors
        .field_errors()
        .values()
        .flat_map(|list| list.iter())
        .find_map(|e| e.message.as_ref().map(|m| m.to_string()))
        .unwrap_or_else(|| format!("Validation error: {errors}"))
}
