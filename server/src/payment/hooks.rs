//! Ordered lifecycle observers around verify and settle.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use thiserror::Error;
use tracing::{info, warn};

use crate::models::payment::{PaymentPayload, PaymentRequirements, SettleResponse, VerifyResponse};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HookError {
    /// Stop the current phase. Only honoured from `before_*` hooks.
    #[error("aborted: {0}")]
    Abort(String),

    #[error("hook failed: {0}")]
    Failed(String),
}

impl HookError {
    pub fn abort(reason: impl Into<String>) -> Self {
        HookError::Abort(reason.into())
    }

    pub fn reason(&self) -> &str {
        match self {
            HookError::Abort(reason) | HookError::Failed(reason) => reason,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PaymentContext {
    pub payload: PaymentPayload,
    pub requirements: PaymentRequirements,
}

#[derive(Debug, Clone)]
pub struct VerifiedContext {
    pub payload: PaymentPayload,
    pub requirements: PaymentRequirements,
    pub result: VerifyResponse,
}

#[derive(Debug, Clone)]
pub struct SettledContext {
    pub payload: PaymentPayload,
    pub requirements: PaymentRequirements,
    pub result: SettleResponse,
}

#[derive(Debug, Clone)]
pub struct FailureContext {
    pub payload: PaymentPayload,
    pub requirements: PaymentRequirements,
    pub error: String,
}

pub type Hook<C> = Arc<dyn Fn(C) -> BoxFuture<'static, Result<(), HookError>> + Send + Sync>;

/// Wrap an async closure as a [`Hook`].
pub fn hook<C, F, Fut>(f: F) -> Hook<C>
where
    C: 'static,
    F: Fn(C) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HookError>> + Send + 'static,
{
    Arc::new(move |ctx: C| f(ctx).boxed())
}

#[derive(Clone, Default)]
pub struct HookRegistry {
    pub(crate) before_verify: Vec<Hook<PaymentContext>>,
    pub(crate) after_verify: Vec<Hook<VerifiedContext>>,
    pub(crate) verify_failure: Vec<Hook<FailureContext>>,
    pub(crate) before_settle: Vec<Hook<PaymentContext>>,
    pub(crate) after_settle: Vec<Hook<SettledContext>>,
    pub(crate) settle_failure: Vec<Hook<FailureContext>>,
}

impl HookRegistry {
    /// One tracing observer on each event.
    pub fn with_tracing() -> Self {
        let mut hooks = Self::default();
        hooks.before_verify.push(hook(|ctx: PaymentContext| async move {
            info!(network = %ctx.payload.network(), scheme = %ctx.payload.scheme(), "before verify");
            Ok::<_, HookError>(())
        }));
        hooks.after_verify.push(hook(|ctx: VerifiedContext| async move {
            info!(success = ctx.result.success, network = %ctx.payload.network(), "after verify");
            Ok::<_, HookError>(())
        }));
        hooks.verify_failure.push(hook(|ctx: FailureContext| async move {
            warn!(error = %ctx.error, "verify failure");
            Ok::<_, HookError>(())
        }));
        hooks.before_settle.push(hook(|ctx: PaymentContext| async move {
            info!(network = %ctx.payload.network(), "before settle");
            Ok::<_, HookError>(())
        }));
        hooks.after_settle.push(hook(|ctx: SettledContext| async move {
            info!(
                success = ctx.result.success,
                tx_hash = ?ctx.result.tx_hash,
                "after settle"
            );
            Ok::<_, HookError>(())
        }));
        hooks.settle_failure.push(hook(|ctx: FailureContext| async move {
            warn!(error = %ctx.error, "settle failure");
            Ok::<_, HookError>(())
        }));
        hooks
    }
}

/// Run gatekeeping hooks in order; the first error stops the chain.
pub(crate) async fn run_gate<C: Clone>(hooks: &[Hook<C>], ctx: &C) -> Result<(), HookError> {
    for hook in hooks {
        hook(ctx.clone()).await?;
    }
    Ok(())
}

/// Run observers in order; errors are logged and do not affect the outcome.
pub(crate) async fn run_observers<C: Clone>(hooks: &[Hook<C>], ctx: &C, event: &'static str) {
    for hook in hooks {
        if let Err(err) = hook(ctx.clone()).await {
            warn!(event, error = %err, "payment hook error ignored");
        }
    }
}
