//! Configuration module for the ledger context engine
//!
//! This module handles configuration loading from TOML files and `.env`
//! environment overrides, and provides structured configuration types.

use crate::errors::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use solana_sdk::commitment_config::{CommitmentConfig, CommitmentLevel};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Main engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Ledger RPC endpoint
    #[serde(default)]
    pub rpc: RpcConfig,

    /// Batching and caching of remote reads
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Retry, confirmation and result parsing
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Off-chain metadata endpoint
    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Tracing output
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// JSON-RPC endpoint
    #[serde(default = "default_rpc_url")]
    pub url: String,

    /// processed | confirmed | finalized
    #[serde(default = "default_commitment")]
    pub commitment: String,

    /// Request timeout in seconds
    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Window in which account lookups are merged into one call
    #[serde(default = "default_batch_window_ms")]
    pub batch_window_ms: u64,

    /// Max addresses per multi-account call
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    #[serde(default = "default_account_ttl_ms")]
    pub account_ttl_ms: u64,

    #[serde(default = "default_blockhash_ttl_ms")]
    pub blockhash_ttl_ms: u64,

    #[serde(default = "default_account_cache_capacity")]
    pub account_cache_capacity: usize,

    /// TTL of deduplicated context calls
    #[serde(default = "default_dedup_ttl_ms")]
    pub dedup_ttl_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Retries after a stale ledger view; 0 disables retrying
    #[serde(default)]
    pub max_retries: u32,

    #[serde(default = "default_backoff_min_ms")]
    pub backoff_min_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Fetch attempts while a sent transaction has no logs yet
    #[serde(default = "default_parse_attempts")]
    pub parse_attempts: u32,

    #[serde(default = "default_parse_delay_ms")]
    pub parse_delay_ms: u64,

    #[serde(default = "default_confirm_poll_ms")]
    pub confirm_poll_interval_ms: u64,

    #[serde(default = "default_confirm_timeout_secs")]
    pub confirm_timeout_secs: u64,

    /// Pause between chained executions
    #[serde(default)]
    pub chain_step_delay_ms: u64,

    #[serde(default)]
    pub skip_preflight: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// HTTP batch endpoint; metadata contexts are unavailable without it
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    #[serde(default = "default_batch_window_ms")]
    pub batch_window_ms: u64,

    #[serde(default = "default_metadata_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// EnvFilter directive used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

// Default value functions
fn default_rpc_url() -> String {
    "http://127.0.0.1:8899".to_string()
}
fn default_commitment() -> String {
    "confirmed".to_string()
}
fn default_rpc_timeout() -> u64 { 30 }
fn default_batch_window_ms() -> u64 { 50 }
fn default_max_batch_size() -> usize { 100 }
fn default_account_ttl_ms() -> u64 { 10_000 }
fn default_blockhash_ttl_ms() -> u64 { 250 }
fn default_account_cache_capacity() -> usize { 4_096 }
fn default_dedup_ttl_ms() -> u64 { 5_000 }
fn default_backoff_min_ms() -> u64 { 1_000 }
fn default_backoff_max_ms() -> u64 { 6_000 }
fn default_parse_attempts() -> u32 { 5 }
fn default_parse_delay_ms() -> u64 { 1_000 }
fn default_confirm_poll_ms() -> u64 { 500 }
fn default_confirm_timeout_secs() -> u64 { 60 }
fn default_metadata_ttl_secs() -> u64 { 60 }
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: default_rpc_url(),
            commitment: default_commitment(),
            timeout_secs: default_rpc_timeout(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            batch_window_ms: default_batch_window_ms(),
            max_batch_size: default_max_batch_size(),
            account_ttl_ms: default_account_ttl_ms(),
            blockhash_ttl_ms: default_blockhash_ttl_ms(),
            account_cache_capacity: default_account_cache_capacity(),
            dedup_ttl_ms: default_dedup_ttl_ms(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff_min_ms: default_backoff_min_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            parse_attempts: default_parse_attempts(),
            parse_delay_ms: default_parse_delay_ms(),
            confirm_poll_interval_ms: default_confirm_poll_ms(),
            confirm_timeout_secs: default_confirm_timeout_secs(),
            chain_step_delay_ms: 0,
            skip_preflight: false,
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            max_batch_size: default_max_batch_size(),
            batch_window_ms: default_batch_window_ms(),
            ttl_secs: default_metadata_ttl_secs(),
            timeout_secs: default_rpc_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl RpcConfig {
    pub fn commitment(&self) -> EngineResult<CommitmentConfig> {
        let commitment = CommitmentLevel::from_str(&self.commitment).map_err(|_| {
            EngineError::Configuration(format!("unknown commitment '{}'", self.commitment))
        })?;
        Ok(CommitmentConfig { commitment })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl RuntimeConfig {
    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    pub fn account_ttl(&self) -> Duration {
        Duration::from_millis(self.account_ttl_ms)
    }

    pub fn blockhash_ttl(&self) -> Duration {
        Duration::from_millis(self.blockhash_ttl_ms)
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_millis(self.dedup_ttl_ms)
    }
}

impl ExecutionConfig {
    pub fn backoff_range(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.backoff_min_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }

    pub fn parse_delay(&self) -> Duration {
        Duration::from_millis(self.parse_delay_ms)
    }

    pub fn confirm_poll_interval(&self) -> Duration {
        Duration::from_millis(self.confirm_poll_interval_ms)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    pub fn chain_step_delay(&self) -> Duration {
        Duration::from_millis(self.chain_step_delay_ms)
    }
}

impl MetadataConfig {
    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl EngineConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: EngineConfig = toml::from_str(&content)
            .map_err(|e| EngineError::Configuration(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, applying `.env` and `LEDGER_RPC_URL` /
    /// `LEDGER_METADATA_ENDPOINT` overrides.
    pub fn from_file_with_env(path: impl AsRef<Path>) -> EngineResult<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("LEDGER_RPC_URL") {
            self.rpc.url = url;
        }
        if let Ok(endpoint) = std::env::var("LEDGER_METADATA_ENDPOINT") {
            self.metadata.endpoint = Some(endpoint);
        }
    }

    /// Reject inconsistent values.
    pub fn validate(&self) -> EngineResult<()> {
        if self.rpc.url.trim().is_empty() {
            return Err(EngineError::Configuration("rpc.url is empty".into()));
        }
        self.rpc.commitment()?;
        if self.runtime.max_batch_size == 0 {
            return Err(EngineError::Configuration(
                "runtime.max_batch_size must be positive".into(),
            ));
        }
        if self.runtime.account_cache_capacity == 0 {
            return Err(EngineError::Configuration(
                "runtime.account_cache_capacity must be positive".into(),
            ));
        }
        if self.execution.backoff_min_ms > self.execution.backoff_max_ms {
            return Err(EngineError::Configuration(format!(
                "execution backoff range inverted: {}ms > {}ms",
                self.execution.backoff_min_ms, self.execution.backoff_max_ms
            )));
        }
        if self.execution.parse_attempts == 0 {
            return Err(EngineError::Configuration(
                "execution.parse_attempts must be at least 1".into(),
            ));
        }
        if self.metadata.endpoint.is_some() && self.metadata.max_batch_size == 0 {
            return Err(EngineError::Configuration(
                "metadata.max_batch_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.runtime.batch_window(), Duration::from_millis(50));
        assert_eq!(config.runtime.max_batch_size, 100);
        assert_eq!(config.runtime.account_ttl(), Duration::from_secs(10));
        assert_eq!(config.runtime.blockhash_ttl(), Duration::from_millis(250));
        assert_eq!(config.runtime.dedup_ttl(), Duration::from_secs(5));
        assert_eq!(config.execution.max_retries, 0);
        assert_eq!(
            config.execution.backoff_range(),
            (Duration::from_secs(1), Duration::from_secs(6))
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [rpc]
            url = "https://rpc.example.org"

            [execution]
            max_retries = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.rpc.url, "https://rpc.example.org");
        assert_eq!(config.rpc.commitment, "confirmed");
        assert_eq!(config.execution.max_retries, 2);
        assert_eq!(config.execution.backoff_max_ms, 6_000);
        assert!(config.metadata.endpoint.is_none());
    }

    #[test]
    fn test_validate_rejects_inconsistent_values() {
        let mut config = EngineConfig::default();
        config.execution.backoff_min_ms = 7_000;
        assert!(matches!(
            config.validate(),
            Err(EngineError::Configuration(_))
        ));

        let mut config = EngineConfig::default();
        config.runtime.max_batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.rpc.commitment = "eventually".into();
        assert!(config.validate().is_err());
    }
}
