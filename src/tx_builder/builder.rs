//! Blueprint assembly
//!
//! `TransactionBlueprintBuilder::assemble` runs a fixed sequence of stages,
//! each a function of the previous stage's output plus configuration:
//!
//! 1. Instructions: prepended, configured, appended; resolvers invoked in
//!    declaration order, `None` entries dropped
//! 2. Compute budget: price/limit (runtime-global < template < override),
//!    synthesized only when no such instruction exists yet
//! 3. Signer extraction from instruction accounts
//! 4. Address lookup tables: template and override tables merged, fetched
//! 5. Fee payer: override > runtime-global > template > owning account
//! 6. Lifetime: durable nonce, inspection, explicit blockhash, or the latest
//!    blockhash
//! 7. Signer resolution: lowest to highest priority, last occurrence per
//!    address wins
//!
//! Fee payer, nonce account and blockhash failures abort assembly before
//! anything is signed.

use super::blueprint::TransactionBlueprint;
use super::instructions::{apply_compute_budget, InstructionSource, ResolveScope};
use super::lifetime::{Lifetime, LifetimeOverride, NonceSource};
use super::signers::{SignerCapability, SignerRef, SignerResolver, SignerSource};
use crate::errors::{EngineError, EngineResult};
use crate::executor::hooks::ExecutionHook;
use crate::graph::GraphNode;
use crate::runtime::RuntimeAccess;
use solana_sdk::pubkey::Pubkey;
use std::sync::{Arc, Weak};
use tracing::{debug, instrument};

/// Fee payer given either as a bare address or as its signer.
#[derive(Clone)]
pub enum FeePayerSource {
    Address(Pubkey),
    Signer(SignerRef),
}

impl FeePayerSource {
    pub fn address(&self) -> Pubkey {
        match self {
            Self::Address(address) => *address,
            Self::Signer(signer) => signer.address(),
        }
    }
}

impl std::fmt::Debug for FeePayerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Address(address) => f.debug_tuple("Address").field(address).finish(),
            Self::Signer(signer) => f.debug_tuple("Signer").field(&signer.address()).finish(),
        }
    }
}

/// Transaction defaults shared by everything attached to one runtime.
#[derive(Clone, Default)]
pub struct RuntimeGlobals {
    pub fee_payer: Option<FeePayerSource>,
    pub signers: Vec<SignerSource>,
    pub compute_unit_price: Option<u64>,
    pub compute_unit_limit: Option<u32>,
    pub hooks: Option<Arc<dyn ExecutionHook>>,
}

impl std::fmt::Debug for RuntimeGlobals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeGlobals")
            .field("fee_payer", &self.fee_payer)
            .field("signers", &self.signers)
            .field("compute_unit_price", &self.compute_unit_price)
            .field("compute_unit_limit", &self.compute_unit_limit)
            .field("hooks", &self.hooks.is_some())
            .finish()
    }
}

/// Template configuration of a transaction.
#[derive(Clone)]
pub struct BlueprintConfig<A> {
    pub label: String,
    pub instructions: Vec<InstructionSource<A>>,
    pub fee_payer: Option<FeePayerSource>,
    pub signers: Vec<SignerSource>,
    pub compute_unit_price: Option<u64>,
    pub compute_unit_limit: Option<u32>,
    pub address_lookup_tables: Vec<Pubkey>,
    pub lifetime: Option<LifetimeOverride>,
    pub hooks: Option<Arc<dyn ExecutionHook>>,
}

impl<A> Default for BlueprintConfig<A> {
    fn default() -> Self {
        Self {
            label: "transaction".to_string(),
            instructions: Vec::new(),
            fee_payer: None,
            signers: Vec::new(),
            compute_unit_price: None,
            compute_unit_limit: None,
            address_lookup_tables: Vec::new(),
            lifetime: None,
            hooks: None,
        }
    }
}

impl<A> std::fmt::Debug for BlueprintConfig<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlueprintConfig")
            .field("label", &self.label)
            .field("instructions", &self.instructions)
            .field("fee_payer", &self.fee_payer)
            .field("signers", &self.signers)
            .field("compute_unit_price", &self.compute_unit_price)
            .field("compute_unit_limit", &self.compute_unit_limit)
            .field("address_lookup_tables", &self.address_lookup_tables)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

/// Per-call overrides. Every field takes precedence over the template and
/// the runtime globals.
#[derive(Clone)]
pub struct BlueprintOverrides<A> {
    pub prepend: Vec<InstructionSource<A>>,
    pub append: Vec<InstructionSource<A>>,
    pub compute_unit_price: Option<u64>,
    pub compute_unit_limit: Option<u32>,
    pub address_lookup_tables: Vec<Pubkey>,
    pub fee_payer: Option<FeePayerSource>,
    pub signers: Vec<SignerSource>,
    pub lifetime: Option<LifetimeOverride>,
    pub hooks: Option<Arc<dyn ExecutionHook>>,
    pub skip_preflight: Option<bool>,
}

impl<A> Default for BlueprintOverrides<A> {
    fn default() -> Self {
        Self {
            prepend: Vec::new(),
            append: Vec::new(),
            compute_unit_price: None,
            compute_unit_limit: None,
            address_lookup_tables: Vec::new(),
            fee_payer: None,
            signers: Vec::new(),
            lifetime: None,
            hooks: None,
            skip_preflight: None,
        }
    }
}

impl<A> std::fmt::Debug for BlueprintOverrides<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlueprintOverrides")
            .field("prepend", &self.prepend)
            .field("append", &self.append)
            .field("compute_unit_price", &self.compute_unit_price)
            .field("compute_unit_limit", &self.compute_unit_limit)
            .field("address_lookup_tables", &self.address_lookup_tables)
            .field("fee_payer", &self.fee_payer)
            .field("signers", &self.signers)
            .field("lifetime", &self.lifetime)
            .field("skip_preflight", &self.skip_preflight)
            .finish_non_exhaustive()
    }
}

struct ResolvedSigners {
    signers: Vec<SignerRef>,
    sending: Option<SignerRef>,
    deferred: Vec<SignerResolver>,
}

/// Concatenate sources lowest to highest priority, keep the last signer
/// per address. A sending-capable signer is dropped as soon as a later
/// entry takes its address.
async fn resolve_signers(
    attached: Vec<SignerRef>,
    tiers: [&[SignerSource]; 3],
) -> EngineResult<ResolvedSigners> {
    let mut ordered = attached;
    let mut deferred = Vec::new();
    for source in tiers.into_iter().flatten() {
        match source {
            SignerSource::Signer(signer) => ordered.push(signer.clone()),
            SignerSource::Resolver(resolve) => ordered.extend(resolve().await?),
            SignerSource::Deferred(resolve) => deferred.push(resolve.clone()),
        }
    }

    let mut signers: Vec<SignerRef> = Vec::with_capacity(ordered.len());
    let mut sending: Option<SignerRef> = None;
    for signer in ordered {
        let address = signer.address();
        if sending.as_ref().is_some_and(|s| s.address() == address) {
            sending = None;
        }
        if signer.capability() == SignerCapability::SignAndSend {
            sending = Some(signer.clone());
        }
        signers.retain(|existing| existing.address() != address);
        signers.push(signer);
    }

    Ok(ResolvedSigners {
        signers,
        sending,
        deferred,
    })
}

fn stage_error(err: EngineError, wrap: impl FnOnce(String) -> EngineError) -> EngineError {
    match err {
        EngineError::Cancelled => EngineError::Cancelled,
        other => wrap(other.to_string()),
    }
}

pub struct TransactionBlueprintBuilder<A> {
    runtime: Arc<RuntimeAccess>,
    owner: Option<Weak<dyn GraphNode>>,
    config: BlueprintConfig<A>,
}

impl<A> std::fmt::Debug for TransactionBlueprintBuilder<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionBlueprintBuilder")
            .field("config", &self.config)
            .field("has_owner", &self.owner.is_some())
            .finish()
    }
}

impl<A: Clone + Send + Sync + 'static> TransactionBlueprintBuilder<A> {
    pub fn new(runtime: Arc<RuntimeAccess>, config: BlueprintConfig<A>) -> Self {
        Self {
            runtime,
            owner: None,
            config,
        }
    }

    /// Attach the context that owns this transaction. An owning account
    /// serves as the fee payer of last resort.
    pub fn with_owner(mut self, owner: &Arc<dyn GraphNode>) -> Self {
        self.owner = Some(Arc::downgrade(owner));
        self
    }

    pub fn runtime(&self) -> &Arc<RuntimeAccess> {
        &self.runtime
    }

    pub fn config(&self) -> &BlueprintConfig<A> {
        &self.config
    }

    pub fn owner(&self) -> Option<Arc<dyn GraphNode>> {
        self.owner.as_ref().and_then(Weak::upgrade)
    }

    #[instrument(skip_all, fields(label = %self.config.label))]
    pub async fn assemble(
        &self,
        args: A,
        overrides: BlueprintOverrides<A>,
    ) -> EngineResult<TransactionBlueprint> {
        let overrides = Arc::new(overrides);
        let globals = self.runtime.globals();
        let owner = self.owner();

        // 1. instructions
        let mut specs = Vec::new();
        for source in overrides
            .prepend
            .iter()
            .chain(&self.config.instructions)
            .chain(&overrides.append)
        {
            match source {
                InstructionSource::Literal(spec) => specs.push(spec.clone()),
                InstructionSource::Resolver(resolve) => {
                    let produced = resolve(ResolveScope {
                        owner: owner.clone(),
                        args: args.clone(),
                        overrides: overrides.clone(),
                    })
                    .await?;
                    specs.extend(produced.into_iter().flatten());
                }
            }
        }

        // 3. signer extraction (before the budget stage so that synthesized
        // instructions never carry signers)
        let mut attached = Vec::new();
        let mut instructions = Vec::with_capacity(specs.len() + 2);
        for spec in specs {
            let (ix, signers) = spec.into_parts();
            instructions.push(ix);
            attached.extend(signers);
        }

        // 2. compute budget
        let unit_price = overrides
            .compute_unit_price
            .or(self.config.compute_unit_price)
            .or(globals.compute_unit_price);
        let unit_limit = overrides
            .compute_unit_limit
            .or(self.config.compute_unit_limit)
            .or(globals.compute_unit_limit);
        apply_compute_budget(&mut instructions, unit_price, unit_limit);

        // 4. lookup tables
        let mut table_keys = self.config.address_lookup_tables.clone();
        for key in &overrides.address_lookup_tables {
            if !table_keys.contains(key) {
                table_keys.push(*key);
            }
        }
        let address_lookup_tables = if table_keys.is_empty() {
            Vec::new()
        } else {
            self.runtime
                .fetch_multiple_address_lookup_tables(&table_keys)
                .await?
        };

        // 5. fee payer
        let fee_payer = match overrides
            .fee_payer
            .clone()
            .or_else(|| globals.fee_payer.clone())
            .or_else(|| self.config.fee_payer.clone())
        {
            Some(FeePayerSource::Address(address)) => address,
            Some(FeePayerSource::Signer(signer)) => {
                let address = signer.address();
                attached.push(signer);
                address
            }
            None => self.owner_address(owner.as_ref()).await?,
        };

        // 6. lifetime
        let lifetime = self
            .resolve_lifetime(overrides.lifetime.or(self.config.lifetime))
            .await?;

        // 7. signers
        let resolved = resolve_signers(
            attached,
            [
                self.config.signers.as_slice(),
                globals.signers.as_slice(),
                overrides.signers.as_slice(),
            ],
        )
        .await?;

        debug!(
            instructions = instructions.len(),
            %fee_payer,
            signers = resolved.signers.len(),
            lookup_tables = address_lookup_tables.len(),
            "blueprint assembled"
        );

        Ok(TransactionBlueprint {
            instructions,
            fee_payer,
            lifetime,
            address_lookup_tables,
            signers: resolved.signers,
            sending_signer: resolved.sending,
            deferred_signers: resolved.deferred,
        })
    }

    async fn owner_address(&self, owner: Option<&Arc<dyn GraphNode>>) -> EngineResult<Pubkey> {
        let Some(account) = owner.and_then(|node| node.as_account_node()) else {
            return Err(EngineError::FeePayerUnresolved);
        };
        match account.resolve_address_boxed(false).await {
            Ok(Some(address)) => Ok(address),
            Ok(None) => Err(EngineError::FeePayerUnresolved),
            Err(EngineError::Cancelled) => Err(EngineError::Cancelled),
            Err(err) => {
                debug!(error = %err, "owning account address unavailable for fee payer");
                Err(EngineError::FeePayerUnresolved)
            }
        }
    }

    async fn resolve_lifetime(&self, requested: Option<LifetimeOverride>) -> EngineResult<Lifetime> {
        match requested {
            Some(LifetimeOverride::DurableNonce(NonceSource::Literal(nonce))) => {
                Ok(Lifetime::DurableNonce(nonce))
            }
            Some(LifetimeOverride::DurableNonce(NonceSource::Account(address))) => {
                match self.runtime.fetch_nonce_config(&address).await {
                    Ok(Some(nonce)) => Ok(Lifetime::DurableNonce(nonce)),
                    Ok(None) => Err(EngineError::NonceAccountUnresolved(format!(
                        "{address} does not exist"
                    ))),
                    Err(err) => Err(stage_error(err, EngineError::NonceAccountUnresolved)),
                }
            }
            Some(LifetimeOverride::Inspection) => Ok(Lifetime::Inspection),
            Some(LifetimeOverride::Blockhash(latest)) => Ok(Lifetime::Blockhash(latest)),
            None => self
                .runtime
                .fetch_latest_blockhash()
                .await
                .map(Lifetime::Blockhash)
                .map_err(|err| stage_error(err, EngineError::BlockhashUnresolved)),
        }
    }
}
