//! Structured logging and execution context

use crate::config::LoggingConfig;
use crate::errors::{EngineError, EngineResult};
use solana_sdk::signature::Signature;
use std::time::{Duration, Instant};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> EngineResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| EngineError::Configuration(format!("log filter: {e}")))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json {
        registry.with(fmt::layer().json().with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };
    installed.map_err(|e| EngineError::Configuration(format!("tracing already installed: {e}")))
}

/// Structured logger for one `execute` call
#[derive(Debug, Clone)]
pub struct ExecutionLogger {
    correlation_id: String,
    label: String,
    started: Instant,
}

impl ExecutionLogger {
    pub fn new(label: &str) -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            label: label.to_string(),
            started: Instant::now(),
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn attempt(&self, attempt: u32, signature: &Signature) {
        tracing::info!(
            correlation_id = %self.correlation_id,
            label = %self.label,
            attempt,
            signature = %signature,
            "Submitting transaction"
        );
    }

    pub fn retry(&self, attempt: u32, delay: Duration, error: &EngineError) {
        tracing::warn!(
            correlation_id = %self.correlation_id,
            label = %self.label,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Stale ledger view, retrying"
        );
    }

    pub fn signature(&self, signature: &Signature) {
        tracing::debug!(
            correlation_id = %self.correlation_id,
            label = %self.label,
            signature = %signature,
            "Signature observed"
        );
    }

    pub fn finished(&self, signature: &Signature, slot: u64, succeeded: bool) {
        if succeeded {
            tracing::info!(
                correlation_id = %self.correlation_id,
                label = %self.label,
                signature = %signature,
                slot,
                latency_ms = self.elapsed_ms(),
                "Transaction succeeded"
            );
        } else {
            tracing::warn!(
                correlation_id = %self.correlation_id,
                label = %self.label,
                signature = %signature,
                slot,
                latency_ms = self.elapsed_ms(),
                "Transaction landed with an error"
            );
        }
    }

    pub fn failure(&self, error: &EngineError) {
        tracing::warn!(
            correlation_id = %self.correlation_id,
            label = %self.label,
            category = error.category(),
            error = %error,
            latency_ms = self.elapsed_ms(),
            "Transaction failed"
        );
    }
}
