//! Off-chain metadata loading
//!
//! Metadata records (symbol, display name, valuation fields) live behind an
//! HTTP batch endpoint rather than on the ledger. One `MetadataLoader` is
//! created lazily per `RuntimeAccess`; it coalesces lookups through a
//! `BatchLoader` and caches answers (including absences) for a TTL.

use super::batch::{BatchConfig, BatchLoader};
use super::cache::TtlLru;
use crate::errors::{EngineError, EngineResult};
use crate::metrics::EngineMetrics;
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_METADATA_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRecord {
    pub symbol: String,
    #[serde(alias = "displayName")]
    pub name: String,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub update_interval_seconds: Option<u64>,
    /// Remaining computed valuation fields, kept verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Batch source of metadata keyed by address.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Records for the requested addresses; missing keys mean "no metadata".
    async fn fetch(&self, addresses: &[String]) -> EngineResult<HashMap<String, MetadataRecord>>;
}

/// `GET {endpoint}?addresses=a,b,c` returning `{ "<address>": record | null }`.
#[derive(Debug, Clone)]
pub struct HttpMetadataSource {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpMetadataSource {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Configuration(format!("metadata http client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl MetadataSource for HttpMetadataSource {
    async fn fetch(&self, addresses: &[String]) -> EngineResult<HashMap<String, MetadataRecord>> {
        let joined = addresses.join(",");
        debug!(endpoint = %self.endpoint, count = addresses.len(), "fetching metadata");
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("addresses", joined.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Metadata(format!(
                "metadata endpoint returned {status}"
            )));
        }

        let body: HashMap<String, Option<MetadataRecord>> = response
            .json()
            .await
            .map_err(|e| EngineError::decode("metadata response", e))?;
        Ok(body
            .into_iter()
            .filter_map(|(address, record)| record.map(|r| (address, r)))
            .collect())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MetadataLoaderConfig {
    pub batch: BatchConfig,
    pub ttl: Duration,
    pub capacity: usize,
}

impl Default for MetadataLoaderConfig {
    fn default() -> Self {
        Self {
            batch: BatchConfig::default(),
            ttl: DEFAULT_METADATA_TTL,
            capacity: 1_024,
        }
    }
}

pub struct MetadataLoader {
    loader: BatchLoader<String, Option<MetadataRecord>>,
    cache: Mutex<TtlLru<String, Option<MetadataRecord>>>,
}

impl std::fmt::Debug for MetadataLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataLoader")
            .field("loader", &self.loader)
            .field("cached", &self.cache.lock().len())
            .finish()
    }
}

impl MetadataLoader {
    pub fn new(
        source: Arc<dyn MetadataSource>,
        config: MetadataLoaderConfig,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        let loader = BatchLoader::with_metrics(
            "metadata",
            config.batch,
            Arc::new(move |addresses: Vec<String>| {
                let source = source.clone();
                async move {
                    let mut found = source.fetch(&addresses).await?;
                    Ok::<_, EngineError>(
                        addresses.iter().map(|a| found.remove(a)).collect::<Vec<_>>(),
                    )
                }
                .boxed()
            }),
            metrics,
        );
        Self {
            loader,
            cache: Mutex::new(TtlLru::new(config.capacity, config.ttl)),
        }
    }

    pub async fn load(&self, address: &str) -> EngineResult<Option<MetadataRecord>> {
        let cached = self.cache.lock().get(&address.to_string());
        if let Some(record) = cached {
            return Ok(record);
        }
        let record = self.loader.load(address.to_string()).await?;
        self.cache.lock().insert(address.to_string(), record.clone());
        Ok(record)
    }

    pub fn invalidate(&self, address: &str) -> bool {
        self.cache.lock().remove(&address.to_string())
    }
}
