//! Transaction execution pipeline
//!
//! `TransactionExecutor` wraps a blueprint builder and adds everything that
//! happens after assembly:
//! - **serialize / simulate / send**: sign and hand the transaction over
//! - **send_and_confirm**: submit through the runtime's confirmation
//!   strategy (or bare submit without one), with a status re-check on
//!   nonce races
//! - **execute**: argument validation, bounded retry of stale-ledger-view
//!   errors, hooks, result parsing and optional chaining
//! - **parse**: fetch a landed transaction and decode its program events
//!
//! ## Retry safety
//!
//! `execute` only retries errors matching `EngineError::is_stale_ledger_view`
//! and always resubmits the identical signed transaction. The ledger's
//! blockhash/nonce replay protection guarantees a resubmission cannot apply
//! twice; a fresh blueprint would not carry that guarantee.

pub mod confirm;
pub mod events;
pub mod hooks;
pub mod result;

pub use confirm::{ConfirmationStrategy, PollingConfirmation};
pub use events::{
    decode_events, encode_event_instruction_data, event_authority, event_discriminator,
    BincodeEvent, DecodedEvents, EventDecoder, UnknownEvent, EVENT_IX_TAG,
};
pub use hooks::{ExecutionHook, HookChain};
pub use result::{ResumableStep, TransactionResult};

use crate::compat;
use crate::errors::{EngineError, EngineResult, Reported};
use crate::graph::GraphNode;
use crate::metrics::Timer;
use crate::runtime::{RuntimeAccess, SimulationOutcome};
use crate::structured_logging::ExecutionLogger;
use crate::tx_builder::{
    BlueprintConfig, BlueprintOverrides, Lifetime, TransactionBlueprint,
    TransactionBlueprintBuilder,
};
use futures::future::{BoxFuture, FutureExt};
use rand::Rng;
use solana_sdk::{
    message::v0::LoadedAddresses, pubkey::Pubkey, signature::Signature,
    transaction::VersionedTransaction,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

/// Caller arguments of a transaction template.
pub trait TransactionArgs: Clone + Send + Sync + 'static {
    /// Reject arguments that do not fit the template's schema.
    fn validate(&self) -> EngineResult<()> {
        Ok(())
    }
}

impl TransactionArgs for () {}

/// Produces the arguments of a follow-up transaction from a successful one.
pub type ChainFn<A> =
    Arc<dyn Fn(TransactionResult, A) -> BoxFuture<'static, EngineResult<Option<A>>> + Send + Sync>;

pub struct TransactionExecutor<A> {
    builder: TransactionBlueprintBuilder<A>,
    program_id: Option<Pubkey>,
    events: Vec<Arc<dyn events::EventDecoder>>,
    chain: Option<ChainFn<A>>,
}

impl<A> std::fmt::Debug for TransactionExecutor<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionExecutor")
            .field("builder", &self.builder)
            .field("program_id", &self.program_id)
            .field(
                "events",
                &self.events.iter().map(|e| e.name().to_string()).collect::<Vec<_>>(),
            )
            .field("chained", &self.chain.is_some())
            .finish()
    }
}

struct ChainedStep<A> {
    executor: Arc<TransactionExecutor<A>>,
    args: A,
}

impl<A: TransactionArgs> ResumableStep for ChainedStep<A> {
    fn label(&self) -> &str {
        &self.executor.builder.config().label
    }

    fn resume(&self) -> BoxFuture<'static, Result<TransactionResult, Reported>> {
        let executor = self.executor.clone();
        let args = self.args.clone();
        async move { executor.execute(args, BlueprintOverrides::default()).await }.boxed()
    }
}

fn backoff_delay((min, max): (Duration, Duration)) -> Duration {
    let min_ms = min.as_millis() as u64;
    let max_ms = (max.as_millis() as u64).max(min_ms);
    Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
}

impl<A: TransactionArgs> TransactionExecutor<A> {
    pub fn new(runtime: Arc<RuntimeAccess>, config: BlueprintConfig<A>) -> Self {
        Self {
            builder: TransactionBlueprintBuilder::new(runtime, config),
            program_id: None,
            events: Vec::new(),
            chain: None,
        }
    }

    pub fn with_owner(mut self, owner: &Arc<dyn GraphNode>) -> Self {
        self.builder = self.builder.with_owner(owner);
        self
    }

    /// Program whose events `parse` decodes.
    pub fn program(mut self, program_id: Pubkey) -> Self {
        self.program_id = Some(program_id);
        self
    }

    pub fn event(mut self, decoder: Arc<dyn events::EventDecoder>) -> Self {
        self.events.push(decoder);
        self
    }

    pub fn chain<F>(mut self, next: F) -> Self
    where
        F: Fn(TransactionResult, A) -> BoxFuture<'static, EngineResult<Option<A>>>
            + Send
            + Sync
            + 'static,
    {
        self.chain = Some(Arc::new(next));
        self
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn builder(&self) -> &TransactionBlueprintBuilder<A> {
        &self.builder
    }

    fn runtime(&self) -> &Arc<RuntimeAccess> {
        self.builder.runtime()
    }

    fn skip_preflight(&self, overrides: &BlueprintOverrides<A>) -> bool {
        overrides
            .skip_preflight
            .unwrap_or(self.runtime().execution_config().skip_preflight)
    }

    pub async fn assemble(
        &self,
        args: A,
        overrides: BlueprintOverrides<A>,
    ) -> EngineResult<TransactionBlueprint> {
        self.builder.assemble(args, overrides).await
    }

    async fn assemble_submittable(
        &self,
        args: A,
        overrides: BlueprintOverrides<A>,
    ) -> EngineResult<TransactionBlueprint> {
        let blueprint = self.builder.assemble(args, overrides).await?;
        if !blueprint.lifetime.is_submittable() {
            return Err(EngineError::InvalidArguments(
                "blueprint has no lifetime and cannot be submitted".into(),
            ));
        }
        Ok(blueprint)
    }

    /// Sign and return bincode wire bytes.
    ///
    /// Without `allow_partial`, fails naming every required signer that did
    /// not sign.
    pub async fn serialize(
        &self,
        args: A,
        overrides: BlueprintOverrides<A>,
        allow_partial: bool,
    ) -> EngineResult<Vec<u8>> {
        let blueprint = self.builder.assemble(args, overrides).await?;
        let transaction = blueprint.sign(allow_partial).await?;
        compat::encode_wire_transaction(&transaction)
    }

    /// Dry run. Signature verification is disabled, so missing signatures
    /// are tolerated.
    pub async fn simulate(
        &self,
        args: A,
        overrides: BlueprintOverrides<A>,
    ) -> EngineResult<SimulationOutcome> {
        args.validate()?;
        let blueprint = self.builder.assemble(args, overrides).await?;
        let transaction = blueprint.sign(true).await?;
        let runtime = self.runtime();
        let outcome = runtime
            .guarded(runtime.rpc().simulate_transaction(&transaction))
            .await?;
        if let Some(err) = &outcome.err {
            return Err(EngineError::SimulationFailed {
                message: err.clone(),
                logs: outcome.logs.clone(),
            });
        }
        Ok(outcome)
    }

    /// Submit without waiting for confirmation.
    pub async fn send(&self, args: A, overrides: BlueprintOverrides<A>) -> EngineResult<Signature> {
        let skip_preflight = self.skip_preflight(&overrides);
        let blueprint = self.assemble_submittable(args, overrides).await?;
        let runtime = self.runtime();

        if let Some(sender) = &blueprint.sending_signer {
            debug!(sender = %sender.address(), "delegating submission to signer");
            let partial = blueprint.sign_without(&sender.address()).await?;
            return runtime.guarded(sender.sign_and_send(partial)).await;
        }

        let transaction = blueprint.sign(false).await?;
        runtime
            .guarded(runtime.rpc().send_transaction(&transaction, skip_preflight))
            .await
    }

    pub async fn send_and_confirm(
        &self,
        args: A,
        overrides: BlueprintOverrides<A>,
    ) -> EngineResult<Signature> {
        let skip_preflight = self.skip_preflight(&overrides);
        let blueprint = self.assemble_submittable(args, overrides).await?;
        let transaction = blueprint.sign(false).await?;
        self.submit_and_confirm(&blueprint, &transaction, skip_preflight)
            .await
    }

    async fn submit_and_confirm(
        &self,
        blueprint: &TransactionBlueprint,
        transaction: &VersionedTransaction,
        skip_preflight: bool,
    ) -> EngineResult<Signature> {
        let runtime = self.runtime();
        let rpc = runtime.rpc().as_ref();
        let signature = transaction.signatures.first().copied().unwrap_or_default();

        let outcome = match (runtime.confirmation(), &blueprint.lifetime) {
            (_, Lifetime::Inspection) => {
                return Err(EngineError::InvalidArguments(
                    "blueprint has no lifetime and cannot be submitted".into(),
                ))
            }
            (None, _) => {
                runtime
                    .guarded(rpc.send_transaction(transaction, skip_preflight))
                    .await
            }
            (Some(strategy), Lifetime::Blockhash(latest)) => {
                runtime
                    .guarded(strategy.confirm_blockhash(rpc, transaction, *latest, skip_preflight))
                    .await
            }
            (Some(strategy), Lifetime::DurableNonce(nonce)) => {
                runtime
                    .guarded(strategy.confirm_nonce(rpc, transaction, *nonce, skip_preflight))
                    .await
            }
        };

        match outcome {
            Ok(signature) => Ok(signature),
            Err(err) if err.is_nonce_invalid() => {
                if self.landed(&signature).await? {
                    info!(%signature, "transaction landed despite nonce race");
                    Ok(signature)
                } else {
                    Err(err)
                }
            }
            Err(err @ EngineError::SimulationFailed { .. }) if skip_preflight => {
                warn!(%signature, error = %err, "preflight failed, returning best-effort signature");
                Ok(signature)
            }
            Err(err) => Err(err),
        }
    }

    async fn landed(&self, signature: &Signature) -> EngineResult<bool> {
        let runtime = self.runtime();
        let statuses = runtime
            .guarded(
                runtime
                    .rpc()
                    .get_signature_statuses(std::slice::from_ref(signature)),
            )
            .await?;
        Ok(statuses.into_iter().next().flatten().is_some())
    }

    /// Validate, submit with bounded retry, run hooks, parse the result.
    ///
    /// Errors come back as `Reported`; `already_reported` is set when at
    /// least one hook saw the error.
    pub async fn execute(
        self: &Arc<Self>,
        args: A,
        overrides: BlueprintOverrides<A>,
    ) -> Result<TransactionResult, Reported> {
        let runtime = self.runtime().clone();
        let metrics = runtime.metrics().clone();
        let hooks = HookChain::new([
            self.builder.config().hooks.clone(),
            overrides.hooks.clone(),
            runtime.globals().hooks,
        ]);
        let logger = ExecutionLogger::new(&self.builder.config().label);

        let timer = Timer::start();
        let outcome = self.execute_inner(args, overrides, &hooks, &logger).await;
        timer.observe_duration(&metrics.execute_latency);

        match outcome {
            Ok(result) => {
                logger.finished(&result.signature, result.slot, result.succeeded);
                hooks.result(&result, &metrics).await;
                Ok(result)
            }
            Err(err) => {
                metrics.transactions_failed.inc();
                logger.failure(&err);
                if hooks.error(&err, &metrics).await {
                    Err(Reported::reported(err))
                } else {
                    Err(Reported::unreported(err))
                }
            }
        }
    }

    async fn execute_inner(
        self: &Arc<Self>,
        args: A,
        overrides: BlueprintOverrides<A>,
        hooks: &HookChain,
        logger: &ExecutionLogger,
    ) -> EngineResult<TransactionResult> {
        args.validate()?;
        let runtime = self.runtime();
        let metrics = runtime.metrics();
        let execution = runtime.execution_config();
        let skip_preflight = self.skip_preflight(&overrides);

        let blueprint = self
            .assemble_submittable(args.clone(), overrides)
            .await?;
        let transaction = blueprint.sign(false).await?;
        let signature = transaction.signatures.first().copied().unwrap_or_default();

        let mut attempt = 0;
        let signature = loop {
            logger.attempt(attempt + 1, &signature);
            match self
                .submit_and_confirm(&blueprint, &transaction, skip_preflight)
                .await
            {
                Ok(confirmed) => break confirmed,
                Err(err) if err.is_stale_ledger_view() && attempt < execution.max_retries => {
                    attempt += 1;
                    metrics.retries.inc();
                    let delay = backoff_delay(execution.backoff_range());
                    logger.retry(attempt, delay, &err);
                    runtime
                        .guarded(async {
                            tokio::time::sleep(delay).await;
                            Ok::<_, EngineError>(())
                        })
                        .await?;
                    if self.landed(&signature).await? {
                        break signature;
                    }
                }
                Err(err) => return Err(err),
            }
        };

        logger.signature(&signature);
        hooks.signature(&signature, metrics).await;

        let mut result = self.parse(&signature).await?;
        if result.succeeded {
            metrics.transactions_confirmed.inc();
        } else {
            metrics.transactions_failed.inc();
        }

        if let (Some(chain), true) = (&self.chain, result.succeeded) {
            if let Some(next_args) = chain(result.clone(), args).await? {
                debug!(label = %self.builder.config().label, "follow-up transaction attached");
                result.next = Some(Arc::new(ChainedStep {
                    executor: self.clone(),
                    args: next_args,
                }));
            }
        }
        Ok(result)
    }

    /// Execute, then keep resuming attached follow-ups until none remains,
    /// a step fails, or `cancel` fires.
    pub async fn execute_chained(
        self: &Arc<Self>,
        args: A,
        overrides: BlueprintOverrides<A>,
        cancel: CancellationToken,
    ) -> Result<Vec<TransactionResult>, Reported> {
        let delay = self.runtime().execution_config().chain_step_delay();
        let mut results = Vec::new();
        let mut current = self.execute(args, overrides).await?;
        loop {
            let next = current.next.clone();
            results.push(current);
            let Some(step) = next else { break };
            if cancel.is_cancelled() {
                debug!(step = step.label(), "chain cancelled");
                break;
            }
            if !delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(step = step.label(), "chain cancelled during delay");
                        break;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            current = step.resume().await?;
        }
        Ok(results)
    }

    /// Fetch a landed transaction and decode it.
    ///
    /// The fetch is retried while the transaction is missing or has no logs
    /// yet, which RPC nodes report transiently right after confirmation.
    #[instrument(skip(self), level = "debug")]
    pub async fn parse(&self, signature: &Signature) -> EngineResult<TransactionResult> {
        let runtime = self.runtime();
        let execution = runtime.execution_config();
        let attempts = execution.parse_attempts.max(1);

        let mut fetched = None;
        for attempt in 1..=attempts {
            let found = runtime
                .guarded(runtime.rpc().get_transaction(signature))
                .await?;
            let complete = found.as_ref().is_some_and(|tx| !tx.log_messages().is_empty());
            if found.is_some() {
                fetched = found;
            }
            if complete {
                break;
            }
            trace!(attempt, "transaction not yet complete");
            if attempt < attempts {
                tokio::time::sleep(execution.parse_delay()).await;
            }
        }
        let fetched = fetched.ok_or_else(|| {
            EngineError::Rpc(format!(
                "transaction {signature} not available after {attempts} attempts"
            ))
        })?;

        let meta = fetched.meta.clone().unwrap_or_default();
        let message = &fetched.transaction.message;
        let loaded = match &meta.loaded_addresses {
            Some(loaded) => loaded.clone(),
            None => {
                let table_keys: Vec<Pubkey> = message
                    .address_table_lookups()
                    .map(|lookups| lookups.iter().map(|l| l.account_key).collect())
                    .unwrap_or_default();
                if table_keys.is_empty() {
                    LoadedAddresses::default()
                } else {
                    let tables = runtime
                        .fetch_multiple_address_lookup_tables(&table_keys)
                        .await?;
                    compat::resolve_loaded_addresses(message, &tables)?
                }
            }
        };

        let account_keys = compat::full_account_keys(message, &loaded);
        let instructions = compat::decompile_message(message, &loaded)?;
        let events = match &self.program_id {
            Some(program_id) => {
                decode_events(program_id, &account_keys, &meta.inner_instructions, &self.events)
            }
            None => DecodedEvents::default(),
        };

        Ok(TransactionResult {
            signature: *signature,
            slot: fetched.slot,
            succeeded: meta.err.is_none(),
            meta,
            instructions,
            events,
            next: None,
        })
    }
}
