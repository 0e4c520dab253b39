//! Transaction blueprint builder
//!
//! Turns a transaction template plus per-call overrides into an unsigned
//! `TransactionBlueprint`.
//!
//! ## Architecture
//!
//! - **instructions**: instruction sources (literal or resolver), attached
//!   signers and compute-budget synthesis
//! - **signers**: signer trait, capabilities, sources and signing helpers
//! - **lifetime**: blockhash / durable nonce / inspection lifetimes
//! - **builder**: the staged `assemble` pipeline and runtime-wide defaults
//! - **blueprint**: assembled result, message compilation and signing
//!
//! ## Instruction ordering
//!
//! A compiled message always reads:
//! 1. `advance_nonce_account` (durable nonce lifetimes only)
//! 2. Compute budget instructions (CU limit, CU price)
//! 3. Program instructions, in declaration order
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use ledger_context_engine::runtime::{InMemoryLedger, RuntimeAccess};
//! use ledger_context_engine::tx_builder::{
//!     BlueprintConfig, BlueprintOverrides, FeePayerSource, KeypairSigner,
//!     TransactionBlueprintBuilder,
//! };
//! use solana_sdk::signature::Keypair;
//! use std::sync::Arc;
//!
//! # async fn example() -> ledger_context_engine::errors::EngineResult<()> {
//! let runtime = RuntimeAccess::builder(Arc::new(InMemoryLedger::new())).build()?;
//! let payer = KeypairSigner::shared(Keypair::new());
//! let builder = TransactionBlueprintBuilder::new(
//!     runtime,
//!     BlueprintConfig::<()> {
//!         fee_payer: Some(FeePayerSource::Signer(payer)),
//!         ..Default::default()
//!     },
//! );
//! let blueprint = builder.assemble((), BlueprintOverrides::default()).await?;
//! let signed = blueprint.sign(false).await?;
//! # let _ = signed;
//! # Ok(())
//! # }
//! ```

pub mod blueprint;
pub mod builder;
pub mod instructions;
pub mod lifetime;
pub mod signers;

pub use blueprint::TransactionBlueprint;
pub use builder::{
    BlueprintConfig, BlueprintOverrides, FeePayerSource, RuntimeGlobals,
    TransactionBlueprintBuilder,
};
pub use instructions::{
    AccountInput, InstructionResolver, InstructionSource, InstructionSpec, ResolveScope,
};
pub use lifetime::{Lifetime, LifetimeOverride, NonceSource};
pub use signers::{
    KeypairSigner, SignerCapability, SignerRef, SignerResolver, SignerSource, SubmittingSigner,
    TransactionSigner,
};
