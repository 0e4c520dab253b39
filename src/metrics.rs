//! Metrics collection and export module

use crate::errors::{EngineError, EngineResult};
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder};
use std::time::Instant;

/// Per-runtime metrics registry
pub struct EngineMetrics {
    registry: Registry,

    // Cache
    pub account_cache_hits: IntCounter,
    pub account_cache_misses: IntCounter,
    pub blockhash_fetches: IntCounter,

    // RPC
    pub rpc_batches: IntCounter,
    pub rpc_errors: IntCounter,

    // Execution
    pub retries: IntCounter,
    pub hook_invocations: IntCounter,
    pub transactions_confirmed: IntCounter,
    pub transactions_failed: IntCounter,

    // Histograms
    pub batch_size: Histogram,
    pub rpc_latency: Histogram,
    pub execute_latency: Histogram,
}

impl std::fmt::Debug for EngineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineMetrics")
            .field("account_cache_hits", &self.account_cache_hits.get())
            .field("account_cache_misses", &self.account_cache_misses.get())
            .field("rpc_batches", &self.rpc_batches.get())
            .finish_non_exhaustive()
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> EngineResult<IntCounter> {
    let counter = IntCounter::with_opts(Opts::new(name, help)).map_err(metric_error)?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(metric_error)?;
    Ok(counter)
}

fn histogram(registry: &Registry, name: &str, help: &str, buckets: Vec<f64>) -> EngineResult<Histogram> {
    let histogram =
        Histogram::with_opts(HistogramOpts::new(name, help).buckets(buckets)).map_err(metric_error)?;
    registry
        .register(Box::new(histogram.clone()))
        .map_err(metric_error)?;
    Ok(histogram)
}

fn metric_error(err: prometheus::Error) -> EngineError {
    EngineError::internal(format!("metrics registration failed: {err}"))
}

impl EngineMetrics {
    /// Create a metrics set with its own registry
    pub fn new() -> EngineResult<Self> {
        let registry = Registry::new();

        let account_cache_hits = counter(
            &registry,
            "account_cache_hits_total",
            "Account lookups served from the cache",
        )?;
        let account_cache_misses = counter(
            &registry,
            "account_cache_misses_total",
            "Account lookups that went to the batch loader",
        )?;
        let blockhash_fetches = counter(
            &registry,
            "blockhash_fetches_total",
            "Latest blockhash RPC calls",
        )?;
        let rpc_batches = counter(
            &registry,
            "rpc_batches_total",
            "Batched multi-account RPC calls",
        )?;
        let rpc_errors = counter(&registry, "rpc_errors_total", "RPC calls that failed")?;
        let retries = counter(
            &registry,
            "execute_retries_total",
            "Retries after a stale ledger view",
        )?;
        let hook_invocations = counter(
            &registry,
            "hook_invocations_total",
            "Execution hook callbacks invoked",
        )?;
        let transactions_confirmed = counter(
            &registry,
            "transactions_confirmed_total",
            "Transactions executed successfully",
        )?;
        let transactions_failed = counter(
            &registry,
            "transactions_failed_total",
            "Transactions that failed to execute",
        )?;

        let batch_size = histogram(
            &registry,
            "rpc_batch_size",
            "Keys per batched RPC call",
            vec![1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0],
        )?;
        let rpc_latency = histogram(
            &registry,
            "rpc_latency_seconds",
            "RPC call latency",
            vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0],
        )?;
        let execute_latency = histogram(
            &registry,
            "execute_latency_seconds",
            "End-to-end execute latency",
            vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0],
        )?;

        Ok(Self {
            registry,
            account_cache_hits,
            account_cache_misses,
            blockhash_fetches,
            rpc_batches,
            rpc_errors,
            retries,
            hook_invocations,
            transactions_confirmed,
            transactions_failed,
            batch_size,
            rpc_latency,
            execute_latency,
        })
    }

    /// Get the registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Prometheus text exposition of every registered metric.
    pub fn encode_text(&self) -> EngineResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metric_error)?;
        String::from_utf8(buffer).map_err(|e| EngineError::internal(e.to_string()))
    }
}

/// Timer helper for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn observe_duration(&self, histogram: &Histogram) {
        histogram.observe(self.start.elapsed().as_secs_f64());
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}
