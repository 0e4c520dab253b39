//! Execution hooks
//!
//! Hooks observe `execute`: the signature once the transaction is confirmed,
//! the final result, or the error that ended the call. They run in the
//! order template, per-call override, runtime-global.

use super::result::TransactionResult;
use crate::errors::EngineError;
use crate::metrics::EngineMetrics;
use async_trait::async_trait;
use solana_sdk::signature::Signature;
use std::sync::Arc;

#[async_trait]
pub trait ExecutionHook: Send + Sync {
    async fn on_signature(&self, _signature: &Signature) {}

    async fn on_error(&self, _error: &EngineError) {}

    async fn on_result(&self, _result: &TransactionResult) {}
}

/// Ordered set of hooks for one execution.
#[derive(Clone, Default)]
pub struct HookChain {
    hooks: Vec<Arc<dyn ExecutionHook>>,
}

impl std::fmt::Debug for HookChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookChain")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl HookChain {
    pub fn new<I>(hooks: I) -> Self
    where
        I: IntoIterator<Item = Option<Arc<dyn ExecutionHook>>>,
    {
        Self {
            hooks: hooks.into_iter().flatten().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub async fn signature(&self, signature: &Signature, metrics: &EngineMetrics) {
        for hook in &self.hooks {
            metrics.hook_invocations.inc();
            hook.on_signature(signature).await;
        }
    }

    /// Returns whether any hook saw the error.
    pub async fn error(&self, error: &EngineError, metrics: &EngineMetrics) -> bool {
        for hook in &self.hooks {
            metrics.hook_invocations.inc();
            hook.on_error(error).await;
        }
        !self.hooks.is_empty()
    }

    pub async fn result(&self, result: &TransactionResult, metrics: &EngineMetrics) {
        for hook in &self.hooks {
            metrics.hook_invocations.inc();
            hook.on_result(result).await;
        }
    }
}
