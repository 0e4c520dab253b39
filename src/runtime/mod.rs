//! Runtime access
//!
//! `RuntimeAccess` is the single point of truth for remote reads. It sits
//! between contexts/builders and the `LedgerRpc` surface and provides:
//! - account lookups coalesced into multi-account calls, cached (LRU + TTL)
//! - a short-lived latest-blockhash cache
//! - typed decode helpers for nonce accounts and address lookup tables
//! - one replaceable cancellation token shared by every pending call
//! - runtime-wide transaction defaults (fee payer, signers, budget, hooks)
//! - a lazily created off-chain metadata loader

pub mod batch;
pub mod cache;
pub mod cancel;
pub mod memory;
pub mod metadata;
pub mod rpc;
pub mod types;

pub use batch::{BatchConfig, BatchFn, BatchLoader};
pub use cache::TtlLru;
pub use cancel::CancellationSlot;
pub use memory::{InMemoryLedger, LedgerMethod};
pub use metadata::{
    HttpMetadataSource, MetadataLoader, MetadataLoaderConfig, MetadataRecord, MetadataSource,
};
pub use rpc::{LedgerRpc, SolanaRpc};
pub use types::{
    AccountRecord, FetchedMeta, FetchedTransaction, InnerInstructionSet, LatestBlockhash,
    NonceConfig, SignatureStatus, SimulationOutcome,
};

use crate::config::{EngineConfig, ExecutionConfig, RuntimeConfig};
use crate::errors::{EngineError, EngineResult};
use crate::executor::confirm::{ConfirmationStrategy, PollingConfirmation};
use crate::graph::SharedResult;
use crate::metrics::{EngineMetrics, Timer};
use crate::tx_builder::RuntimeGlobals;
use futures::future::{try_join_all, FutureExt};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use solana_client::nonce_utils;
use solana_sdk::{
    address_lookup_table::{state::AddressLookupTable, AddressLookupTableAccount},
    epoch_info::EpochInfo,
    pubkey::Pubkey,
    signature::Signature,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument, trace};

struct BlockhashEntry {
    future: SharedResult<LatestBlockhash>,
    created_at: Instant,
}

pub struct RuntimeAccess {
    rpc: Arc<dyn LedgerRpc>,
    config: RuntimeConfig,
    execution: ExecutionConfig,
    accounts: Mutex<TtlLru<Pubkey, SharedResult<Option<AccountRecord>>>>,
    account_loader: BatchLoader<Pubkey, Option<AccountRecord>>,
    blockhash: Mutex<Option<BlockhashEntry>>,
    cancellation: CancellationSlot,
    globals: RwLock<RuntimeGlobals>,
    confirmation: Option<Arc<dyn ConfirmationStrategy>>,
    metadata_source: Option<Arc<dyn MetadataSource>>,
    metadata_config: MetadataLoaderConfig,
    metadata: OnceCell<Arc<MetadataLoader>>,
    metrics: Arc<EngineMetrics>,
}

impl std::fmt::Debug for RuntimeAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeAccess")
            .field("config", &self.config)
            .field("cached_accounts", &self.accounts.lock().len())
            .field("has_confirmation", &self.confirmation.is_some())
            .field("has_metadata_source", &self.metadata_source.is_some())
            .finish_non_exhaustive()
    }
}

pub struct RuntimeAccessBuilder {
    rpc: Arc<dyn LedgerRpc>,
    config: RuntimeConfig,
    execution: ExecutionConfig,
    globals: RuntimeGlobals,
    confirmation: Option<Arc<dyn ConfirmationStrategy>>,
    metadata_source: Option<Arc<dyn MetadataSource>>,
    metadata_config: MetadataLoaderConfig,
}

impl RuntimeAccessBuilder {
    pub fn runtime_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn execution_config(mut self, execution: ExecutionConfig) -> Self {
        self.execution = execution;
        self
    }

    pub fn globals(mut self, globals: RuntimeGlobals) -> Self {
        self.globals = globals;
        self
    }

    /// Without a strategy, `send_and_confirm` falls back to a bare submit.
    pub fn confirmation(mut self, strategy: Arc<dyn ConfirmationStrategy>) -> Self {
        self.confirmation = Some(strategy);
        self
    }

    pub fn metadata_source(
        mut self,
        source: Arc<dyn MetadataSource>,
        config: MetadataLoaderConfig,
    ) -> Self {
        self.metadata_source = Some(source);
        self.metadata_config = config;
        self
    }

    pub fn build(self) -> EngineResult<Arc<RuntimeAccess>> {
        let metrics = Arc::new(EngineMetrics::new()?);
        let cancellation = CancellationSlot::new();

        let rpc = self.rpc.clone();
        let slot = cancellation.clone();
        let latency = metrics.clone();
        let account_loader = BatchLoader::with_metrics(
            "accounts",
            BatchConfig {
                window: self.config.batch_window(),
                max_batch_size: self.config.max_batch_size,
            },
            Arc::new(move |addresses: Vec<Pubkey>| {
                let rpc = rpc.clone();
                let slot = slot.clone();
                let latency = latency.clone();
                async move {
                    let timer = Timer::start();
                    let accounts = slot
                        .guard(async { rpc.get_multiple_accounts(&addresses).await })
                        .await?;
                    timer.observe_duration(&latency.rpc_latency);
                    Ok::<_, EngineError>(
                        addresses
                            .iter()
                            .zip(accounts)
                            .map(|(address, account)| {
                                account.map(|a| AccountRecord::new(*address, a))
                            })
                            .collect::<Vec<_>>(),
                    )
                }
                .boxed()
            }),
            metrics.clone(),
        );

        Ok(Arc::new(RuntimeAccess {
            rpc: self.rpc,
            accounts: Mutex::new(TtlLru::new(
                self.config.account_cache_capacity,
                self.config.account_ttl(),
            )),
            config: self.config,
            execution: self.execution,
            account_loader,
            blockhash: Mutex::new(None),
            cancellation,
            globals: RwLock::new(self.globals),
            confirmation: self.confirmation,
            metadata_source: self.metadata_source,
            metadata_config: self.metadata_config,
            metadata: OnceCell::new(),
            metrics,
        }))
    }
}

impl RuntimeAccess {
    pub fn builder(rpc: Arc<dyn LedgerRpc>) -> RuntimeAccessBuilder {
        RuntimeAccessBuilder {
            rpc,
            config: RuntimeConfig::default(),
            execution: ExecutionConfig::default(),
            globals: RuntimeGlobals::default(),
            confirmation: None,
            metadata_source: None,
            metadata_config: MetadataLoaderConfig::default(),
        }
    }

    /// Network runtime wired from configuration: `SolanaRpc`, polling
    /// confirmation and, when an endpoint is configured, HTTP metadata.
    pub fn from_config(config: &EngineConfig) -> EngineResult<Arc<Self>> {
        config.validate()?;
        let rpc = Arc::new(SolanaRpc::with_timeout(
            config.rpc.url.clone(),
            config.rpc.commitment()?,
            config.rpc.timeout(),
        ));
        let mut builder = Self::builder(rpc)
            .runtime_config(config.runtime.clone())
            .execution_config(config.execution.clone())
            .confirmation(Arc::new(PollingConfirmation::new(
                config.execution.confirm_poll_interval(),
                config.execution.confirm_timeout(),
            )));
        if let Some(endpoint) = &config.metadata.endpoint {
            let source = HttpMetadataSource::new(endpoint.clone(), config.metadata.timeout())?;
            builder = builder.metadata_source(
                Arc::new(source),
                MetadataLoaderConfig {
                    batch: BatchConfig {
                        window: config.metadata.batch_window(),
                        max_batch_size: config.metadata.max_batch_size,
                    },
                    ttl: config.metadata.ttl(),
                    capacity: config.runtime.account_cache_capacity,
                },
            );
        }
        builder.build()
    }

    pub fn rpc(&self) -> &Arc<dyn LedgerRpc> {
        &self.rpc
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn execution_config(&self) -> &ExecutionConfig {
        &self.execution
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    pub fn confirmation(&self) -> Option<&Arc<dyn ConfirmationStrategy>> {
        self.confirmation.as_ref()
    }

    pub fn dedup_ttl(&self) -> Duration {
        self.config.dedup_ttl()
    }

    pub fn globals(&self) -> RuntimeGlobals {
        self.globals.read().clone()
    }

    pub fn update_globals(&self, update: impl FnOnce(&mut RuntimeGlobals)) {
        update(&mut self.globals.write());
    }

    /// Cancel every pending network call of this runtime. Calls made
    /// afterwards use a fresh token.
    pub fn cancel(&self) {
        debug!("cancelling pending runtime calls");
        self.cancellation.cancel();
    }

    /// Run `fut` under the current cancellation token.
    pub async fn guarded<T, F>(&self, fut: F) -> EngineResult<T>
    where
        F: std::future::Future<Output = EngineResult<T>>,
    {
        self.cancellation.guard(fut).await
    }

    /// Fetch one account.
    ///
    /// Without `bypass_cache` the lookup joins the current batch window and
    /// is cached for the account TTL; a failed lookup is evicted so the next
    /// caller retries. With `bypass_cache` a single fresh fetch is made and
    /// its result primes the cache.
    #[instrument(skip(self), level = "trace")]
    pub async fn fetch_account(
        &self,
        address: &Pubkey,
        bypass_cache: bool,
    ) -> EngineResult<Option<AccountRecord>> {
        if bypass_cache {
            let timer = Timer::start();
            let fetched = self
                .guarded(async { self.rpc.get_account(address).await })
                .await?;
            timer.observe_duration(&self.metrics.rpc_latency);
            let record = fetched.map(|account| AccountRecord::new(*address, account));
            let ready = futures::future::ready(Ok(record.clone())).boxed().shared();
            self.accounts.lock().insert(*address, ready);
            return Ok(record);
        }

        let shared = {
            let mut cache = self.accounts.lock();
            match cache.get(address) {
                Some(pending) => {
                    self.metrics.account_cache_hits.inc();
                    pending
                }
                None => {
                    self.metrics.account_cache_misses.inc();
                    let loader = self.account_loader.clone();
                    let key = *address;
                    let pending = async move { loader.load(key).await }.boxed().shared();
                    cache.insert(key, pending.clone());
                    pending
                }
            }
        };

        let result = shared.clone().await;
        if result.is_err() {
            let mut cache = self.accounts.lock();
            if cache.peek(address).is_some_and(|cached| cached.ptr_eq(&shared)) {
                cache.remove(address);
            }
        }
        result
    }

    /// Fetch several accounts; results follow the order of `addresses`.
    pub async fn fetch_multiple_accounts(
        &self,
        addresses: &[Pubkey],
        bypass_cache: bool,
    ) -> EngineResult<Vec<Option<AccountRecord>>> {
        try_join_all(
            addresses
                .iter()
                .map(|address| self.fetch_account(address, bypass_cache)),
        )
        .await
    }

    /// Drop the cached entry for `address`; returns whether one existed.
    pub fn invalidate_account(&self, address: &Pubkey) -> bool {
        let removed = self.accounts.lock().remove(address);
        trace!(%address, removed, "account cache invalidated");
        removed
    }

    pub fn cached_account_count(&self) -> usize {
        self.accounts.lock().len()
    }

    /// Latest blockhash, shared by every caller within the blockhash TTL.
    pub async fn fetch_latest_blockhash(&self) -> EngineResult<LatestBlockhash> {
        let ttl = self.config.blockhash_ttl();
        let shared = {
            let mut slot = self.blockhash.lock();
            match slot.as_ref() {
                Some(entry) if entry.created_at.elapsed() < ttl => entry.future.clone(),
                _ => {
                    self.metrics.blockhash_fetches.inc();
                    let rpc = self.rpc.clone();
                    let cancellation = self.cancellation.clone();
                    let future = async move {
                        cancellation
                            .guard(async { rpc.get_latest_blockhash().await })
                            .await
                    }
                    .boxed()
                    .shared();
                    *slot = Some(BlockhashEntry {
                        future: future.clone(),
                        created_at: Instant::now(),
                    });
                    future
                }
            }
        };

        let result = shared.clone().await;
        if result.is_err() {
            let mut slot = self.blockhash.lock();
            if slot
                .as_ref()
                .is_some_and(|entry| entry.future.ptr_eq(&shared))
            {
                *slot = None;
            }
        }
        result
    }

    /// Durable nonce stored in `address`, or `None` when the account is absent.
    pub async fn fetch_nonce_config(&self, address: &Pubkey) -> EngineResult<Option<NonceConfig>> {
        let Some(record) = self.fetch_account(address, true).await? else {
            return Ok(None);
        };
        let data = nonce_utils::data_from_account(&record.to_account())
            .map_err(|e| EngineError::decode("nonce account", e))?;
        Ok(Some(NonceConfig {
            nonce_account: *address,
            nonce_authority: data.authority,
            nonce: data.blockhash(),
        }))
    }

    pub async fn fetch_address_lookup_table(
        &self,
        address: &Pubkey,
    ) -> EngineResult<Option<AddressLookupTableAccount>> {
        let Some(record) = self.fetch_account(address, false).await? else {
            return Ok(None);
        };
        decode_lookup_table(address, &record).map(Some)
    }

    /// Fetch tables; absent tables are skipped.
    pub async fn fetch_multiple_address_lookup_tables(
        &self,
        addresses: &[Pubkey],
    ) -> EngineResult<Vec<AddressLookupTableAccount>> {
        let records = self.fetch_multiple_accounts(addresses, false).await?;
        addresses
            .iter()
            .zip(records)
            .filter_map(|(address, record)| record.map(|r| decode_lookup_table(address, &r)))
            .collect()
    }

    pub async fn fetch_epoch_info(&self) -> EngineResult<EpochInfo> {
        self.guarded(async { self.rpc.get_epoch_info().await }).await
    }

    pub async fn fetch_slot(&self) -> EngineResult<u64> {
        self.guarded(async { self.rpc.get_slot().await }).await
    }

    pub async fn fetch_block_height(&self) -> EngineResult<u64> {
        self.guarded(async { self.rpc.get_block_height().await }).await
    }

    pub async fn request_airdrop(&self, address: &Pubkey, lamports: u64) -> EngineResult<Signature> {
        self.guarded(async { self.rpc.request_airdrop(address, lamports).await })
            .await
    }

    /// Metadata loader owned by this runtime, created on first use.
    pub fn metadata_loader(&self) -> EngineResult<Arc<MetadataLoader>> {
        let source = self.metadata_source.clone().ok_or_else(|| {
            EngineError::Configuration("no metadata source configured for this runtime".into())
        })?;
        Ok(self
            .metadata
            .get_or_init(|| {
                debug!("creating metadata loader");
                Arc::new(MetadataLoader::new(
                    source,
                    self.metadata_config,
                    self.metrics.clone(),
                ))
            })
            .clone())
    }
}

fn decode_lookup_table(
    address: &Pubkey,
    record: &AccountRecord,
) -> EngineResult<AddressLookupTableAccount> {
    let table = AddressLookupTable::deserialize(&record.data)
        .map_err(|e| EngineError::decode("address lookup table", e))?;
    Ok(AddressLookupTableAccount {
        key: *address,
        addresses: table.addresses.to_vec(),
    })
}
