//! Account contexts
//!
//! An account context resolves an address, then fetches and decodes the
//! account behind it through `RuntimeAccess`. Variants:
//! - `AccountContext`: one account, decoded by an injected `AccountCodec`
//! - `AccountCollection`: children discovered from a resolved address list
//! - `MetadataContext`: off-chain metadata served by the runtime's loader
//!
//! All of them are graph nodes, so a whole tree can be resolved with
//! `resolve_account_tree`.

pub mod account;
pub mod address;
pub mod collection;
pub mod metadata;

pub use account::{AccountContext, ResolutionState};
pub use address::{AddressFn, AddressResolver};
pub use collection::{AccountCollection, AddressListFn, ChildFactory};
pub use metadata::MetadataContext;

use crate::errors::{EngineError, EngineResult};
use crate::graph::{visit_graph, GraphNode, VisitControl};
use crate::runtime::AccountRecord;
use futures::future::{try_join_all, BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use solana_sdk::pubkey::Pubkey;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::trace;

/// Resolution capability shared by every account-like node.
pub trait AccountNode: Send + Sync {
    /// Address, if already resolved.
    fn address(&self) -> Option<Pubkey>;

    /// Lazy nodes only learn their children from their own fetch.
    fn is_lazy(&self) -> bool {
        false
    }

    fn resolve_address_boxed(&self, bypass_cache: bool) -> BoxFuture<'_, EngineResult<Option<Pubkey>>>;

    /// Resolve this node's own state. Collections discover their children here.
    fn resolve_self(&self, bypass_cache: bool) -> BoxFuture<'_, EngineResult<()>>;
}

/// Decoder for an account payload.
pub trait AccountCodec: Send + Sync + 'static {
    type Output: Clone + Send + Sync + 'static;

    fn decode(&self, data: &[u8], owner: &Pubkey) -> EngineResult<Self::Output>;
}

/// Keeps the payload as raw bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl AccountCodec for RawCodec {
    type Output = Vec<u8>;

    fn decode(&self, data: &[u8], _owner: &Pubkey) -> EngineResult<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// Fixed-layout payload decoded with bincode, optionally checking the owner
/// program and skipping a leading discriminator.
pub struct BincodeCodec<T> {
    owner: Option<Pubkey>,
    skip: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Default for BincodeCodec<T> {
    fn default() -> Self {
        Self {
            owner: None,
            skip: 0,
            _marker: PhantomData,
        }
    }
}

impl<T> BincodeCodec<T> {
    pub fn owned_by(mut self, program: Pubkey) -> Self {
        self.owner = Some(program);
        self
    }

    pub fn skip_prefix(mut self, bytes: usize) -> Self {
        self.skip = bytes;
        self
    }
}

impl<T> AccountCodec for BincodeCodec<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    type Output = T;

    fn decode(&self, data: &[u8], owner: &Pubkey) -> EngineResult<T> {
        let what = std::any::type_name::<T>();
        if let Some(expected) = self.owner {
            if expected != *owner {
                return Err(EngineError::decode(
                    what,
                    format!("owned by {owner}, expected {expected}"),
                ));
            }
        }
        let body = data
            .get(self.skip..)
            .ok_or_else(|| EngineError::decode(what, "payload shorter than prefix"))?;
        bincode::deserialize(body).map_err(|e| EngineError::decode(what, e))
    }
}

/// A fetched account and its decoded payload.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAccount<T> {
    pub record: AccountRecord,
    pub data: T,
}

impl<T> DecodedAccount<T> {
    pub fn address(&self) -> Pubkey {
        self.record.address
    }

    pub fn lamports(&self) -> u64 {
        self.record.lamports
    }
}

/// Resolve `node` and every account node below it, up to `max_depth` hops.
///
/// Eager descendants (already registered) resolve in parallel. A lazy node
/// first resolves itself to discover its children, then each child subtree
/// is resolved with the remaining depth.
pub fn resolve_account_tree(
    node: Arc<dyn GraphNode>,
    bypass_cache: bool,
    max_depth: usize,
) -> BoxFuture<'static, EngineResult<()>> {
    async move {
        if let Some(account) = node.as_account_node().filter(|a| a.is_lazy()) {
            account.resolve_self(bypass_cache).await?;
            if max_depth == 0 {
                return Ok(());
            }
            try_join_all(
                node.core()
                    .children()
                    .into_iter()
                    .map(|child| resolve_account_tree(child, bypass_cache, max_depth - 1)),
            )
            .await?;
            return Ok(());
        }

        let mut eager: Vec<Arc<dyn GraphNode>> = Vec::new();
        let mut lazy: Vec<(Arc<dyn GraphNode>, usize)> = Vec::new();
        visit_graph(
            &node,
            |visited, depth| match visited.as_account_node() {
                Some(account) if account.is_lazy() => {
                    let remaining = max_depth.saturating_sub(depth.max(0) as usize);
                    lazy.push((visited.clone(), remaining));
                    VisitControl::SkipChildren
                }
                Some(_) => {
                    eager.push(visited.clone());
                    VisitControl::Continue
                }
                None => VisitControl::Continue,
            },
            max_depth,
            0,
        );
        trace!(
            root = node.core().label(),
            eager = eager.len(),
            lazy = lazy.len(),
            "resolving account tree"
        );

        let mut tasks: Vec<BoxFuture<'_, EngineResult<()>>> = Vec::new();
        for visited in &eager {
            if let Some(account) = visited.as_account_node() {
                tasks.push(account.resolve_self(bypass_cache));
            }
        }
        for (subtree, remaining) in lazy {
            tasks.push(resolve_account_tree(subtree, bypass_cache, remaining));
        }
        try_join_all(tasks).await?;
        Ok(())
    }
    .boxed()
}
