//! Ledger Context Engine
//!
//! Client-side coordination for a ledger JSON-RPC service: resolving and
//! decoding remote accounts through a graph of contexts, and assembling,
//! signing, submitting, confirming and decoding transactions.
//!
//! Layers, leaves first:
//! - [`graph`]: node core with request deduplication and traversal
//! - [`runtime`]: batching and caching access to the RPC surface
//! - [`context`]: account, collection and metadata contexts
//! - [`tx_builder`]: staged blueprint assembly and signer resolution
//! - [`executor`]: sign, send, confirm, retry, parse and chain

pub mod compat;
pub mod config;
pub mod context;
pub mod errors;
pub mod executor;
pub mod graph;
pub mod metrics;
pub mod runtime;
pub mod structured_logging;
pub mod tx_builder;

pub use config::EngineConfig;
pub use context::{
    resolve_account_tree, AccountCodec, AccountCollection, AccountContext, AccountNode,
    AddressResolver, DecodedAccount, MetadataContext, RawCodec,
};
pub use errors::{EngineError, EngineResult, Reported};
pub use executor::{TransactionArgs, TransactionExecutor, TransactionResult};
pub use graph::{render_tree, GraphNode, RenderOptions};
pub use runtime::{InMemoryLedger, LedgerRpc, RuntimeAccess, SolanaRpc};
pub use tx_builder::{
    BlueprintConfig, BlueprintOverrides, TransactionBlueprint, TransactionBlueprintBuilder,
};

// Re-export commonly used types
pub use solana_sdk::{message::VersionedMessage, pubkey::Pubkey, signature::Signature};
