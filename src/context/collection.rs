//! Collection of account contexts discovered from a resolved address list.

use super::account::AccountContext;
use super::{AccountCodec, AccountNode, DecodedAccount};
use crate::errors::{EngineError, EngineResult};
use crate::graph::{parent_ref, GraphNode, NodeCore, NodeDescription};
use crate::runtime::RuntimeAccess;
use futures::future::{try_join_all, BoxFuture, FutureExt};
use parking_lot::RwLock;
use solana_sdk::pubkey::Pubkey;
use std::future::Future;
use std::sync::{Arc, Weak};
use tracing::debug;

const ITEMS_FRESH: &str = "items:fresh";
const ITEMS_CACHED: &str = "items:cached";

/// Produces the current address list; receives the collection's parent.
pub type AddressListFn = Arc<
    dyn Fn(Option<Arc<dyn GraphNode>>) -> BoxFuture<'static, EngineResult<Vec<Pubkey>>>
        + Send
        + Sync,
>;

/// Builds the child context for one address; receives the collection as parent.
pub type ChildFactory<C> = Arc<
    dyn Fn(Weak<dyn GraphNode>, Pubkey) -> BoxFuture<'static, EngineResult<Arc<AccountContext<C>>>>
        + Send
        + Sync,
>;

/// Lazy collection: children are only known once the address list resolves.
///
/// Children are addressed by index (`get`) in address-list order. A refresh
/// reuses the existing child for every address that is still listed.
pub struct AccountCollection<C: AccountCodec> {
    core: NodeCore,
    this: Weak<dyn GraphNode>,
    addresses: AddressListFn,
    factory: ChildFactory<C>,
    items: RwLock<Option<Vec<(Pubkey, Arc<AccountContext<C>>)>>>,
}

impl<C: AccountCodec> std::fmt::Debug for AccountCollection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountCollection")
            .field("label", &self.core.label())
            .field("items", &self.items.read().as_ref().map(Vec::len))
            .finish_non_exhaustive()
    }
}

impl<C: AccountCodec> AccountCollection<C> {
    fn build(
        core: NodeCore,
        addresses: AddressListFn,
        factory: ChildFactory<C>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let this: Weak<dyn GraphNode> = weak.clone();
            Self {
                core,
                this,
                addresses,
                factory,
                items: RwLock::new(None),
            }
        })
    }

    pub fn new(
        runtime: &RuntimeAccess,
        label: impl Into<String>,
        addresses: AddressListFn,
        factory: ChildFactory<C>,
    ) -> Arc<Self> {
        Self::build(
            NodeCore::with_dedup_ttl(label, runtime.dedup_ttl()),
            addresses,
            factory,
        )
    }

    pub fn child_of<P: GraphNode>(
        parent: &Arc<P>,
        runtime: &RuntimeAccess,
        label: impl Into<String>,
        addresses: AddressListFn,
        factory: ChildFactory<C>,
    ) -> Arc<Self> {
        let core = NodeCore::with_dedup_ttl(label, runtime.dedup_ttl()).with_parent(parent_ref(parent));
        let collection = Self::build(core, addresses, factory);
        parent.core().add_child(collection.clone());
        collection
    }

    /// Address list from an async closure.
    pub fn address_list<F, Fut>(list: F) -> AddressListFn
    where
        F: Fn(Option<Arc<dyn GraphNode>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EngineResult<Vec<Pubkey>>> + Send + 'static,
    {
        Arc::new(move |parent| list(parent).boxed())
    }

    /// Factory producing plain `AccountContext` children decoded with `codec`.
    pub fn account_factory(runtime: Arc<RuntimeAccess>, codec: C) -> ChildFactory<C>
    where
        C: Clone,
    {
        Arc::new(move |parent: Weak<dyn GraphNode>, address: Pubkey| {
            let child = AccountContext::attached(
                parent,
                runtime.clone(),
                address.to_string(),
                address,
                codec.clone(),
            );
            futures::future::ready(Ok::<_, EngineError>(child)).boxed()
        })
    }

    pub fn len(&self) -> usize {
        self.items.read().as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the address list has been resolved at least once.
    pub fn is_loaded(&self) -> bool {
        self.items.read().is_some()
    }

    pub fn get(&self, index: usize) -> Option<Arc<AccountContext<C>>> {
        self.items
            .read()
            .as_ref()
            .and_then(|items| items.get(index))
            .map(|(_, child)| child.clone())
    }

    pub fn addresses(&self) -> Vec<Pubkey> {
        self.items
            .read()
            .as_ref()
            .map(|items| items.iter().map(|(address, _)| *address).collect())
            .unwrap_or_default()
    }

    pub fn items(&self) -> Vec<Arc<AccountContext<C>>> {
        self.items
            .read()
            .as_ref()
            .map(|items| items.iter().map(|(_, child)| child.clone()).collect())
            .unwrap_or_default()
    }

    /// Resolve the address list and reconcile the children against it.
    pub async fn resolve_items(&self, bypass_cache: bool) -> EngineResult<Vec<Arc<AccountContext<C>>>> {
        let (key, alternate) = self
            .core
            .dedup()
            .bypass_keys::<Vec<Pubkey>>(bypass_cache, ITEMS_FRESH, ITEMS_CACHED);
        let list = self.addresses.clone();
        let parent = self.core.parent();
        let addresses = self
            .core
            .dedup()
            .deduplicate(key, alternate, None, move || list(parent))
            .await?;

        let existing = self.items.read().clone().unwrap_or_default();
        let created = try_join_all(
            addresses
                .iter()
                .filter(|address| !existing.iter().any(|(known, _)| known == *address))
                .map(|address| {
                    let address = *address;
                    let build = (self.factory)(self.this.clone(), address);
                    async move { Ok::<_, EngineError>((address, build.await?)) }
                }),
        )
        .await?;

        let reconciled = {
            let mut items = self.items.write();
            let current = items.take().unwrap_or_default();
            let reconciled: Vec<(Pubkey, Arc<AccountContext<C>>)> = addresses
                .iter()
                .filter_map(|address| {
                    current
                        .iter()
                        .chain(created.iter())
                        .find(|(known, _)| known == address)
                        .cloned()
                })
                .collect();
            *items = Some(reconciled.clone());
            reconciled
        };

        debug!(
            collection = self.core.label(),
            count = reconciled.len(),
            created = created.len(),
            "collection reconciled"
        );
        self.core.replace_children(
            reconciled
                .iter()
                .map(|(_, child)| child.clone() as Arc<dyn GraphNode>)
                .collect(),
        );
        Ok(reconciled.into_iter().map(|(_, child)| child).collect())
    }

    /// Reconcile, then resolve every listed child together.
    pub async fn resolve_accounts(
        &self,
        bypass_cache: bool,
    ) -> EngineResult<Vec<Option<Arc<DecodedAccount<C::Output>>>>> {
        let items = self.resolve_items(bypass_cache).await?;
        try_join_all(items.iter().map(|child| child.resolve_account(bypass_cache))).await
    }
}

impl<C: AccountCodec> GraphNode for AccountCollection<C> {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn describe(&self) -> NodeDescription {
        let mut desc = self.core.base_description();
        desc.unresolved = !self.is_loaded();
        desc.with_property("items", self.len())
    }

    fn as_account_node(&self) -> Option<&dyn AccountNode> {
        Some(self)
    }
}

impl<C: AccountCodec> AccountNode for AccountCollection<C> {
    fn address(&self) -> Option<Pubkey> {
        None
    }

    fn is_lazy(&self) -> bool {
        true
    }

    fn resolve_address_boxed(&self, _bypass_cache: bool) -> BoxFuture<'_, EngineResult<Option<Pubkey>>> {
        futures::future::ready(Ok::<_, EngineError>(None)).boxed()
    }

    fn resolve_self(&self, bypass_cache: bool) -> BoxFuture<'_, EngineResult<()>> {
        async move { self.resolve_items(bypass_cache).await.map(|_| ()) }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{resolve_account_tree, RawCodec};
    use crate::graph::same_node;
    use crate::runtime::{InMemoryLedger, LedgerMethod};
    use parking_lot::Mutex;
    use solana_sdk::account::Account;

    fn seeded(ledger: &InMemoryLedger, count: usize) -> Vec<Pubkey> {
        (0..count)
            .map(|i| {
                let address = Pubkey::new_unique();
                ledger.set_account(address, Account::new(i as u64 + 1, 0, &Pubkey::new_unique()));
                address
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_reuses_children_by_address() {
        let ledger = Arc::new(InMemoryLedger::new());
        let runtime = RuntimeAccess::builder(ledger.clone()).build().unwrap();
        let addresses = seeded(&ledger, 3);
        let listed = Arc::new(Mutex::new(vec![addresses[0], addresses[1]]));

        let source = listed.clone();
        let collection = AccountCollection::new(
            &runtime,
            "positions",
            AccountCollection::<RawCodec>::address_list(move |_| {
                let current = source.lock().clone();
                async move { Ok(current) }
            }),
            AccountCollection::account_factory(runtime.clone(), RawCodec),
        );
        assert!(!collection.is_loaded());

        let first = collection.resolve_accounts(false).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[1].as_ref().unwrap().lamports(), 2);
        let kept: Arc<dyn GraphNode> = collection.get(1).unwrap();

        *listed.lock() = vec![addresses[1], addresses[2]];
        collection.resolve_items(true).await.unwrap();
        assert_eq!(collection.addresses(), vec![addresses[1], addresses[2]]);
        let reused: Arc<dyn GraphNode> = collection.get(0).unwrap();
        assert!(same_node(&kept, &reused));
        assert_eq!(collection.core().children().len(), 2);
        assert_eq!(ledger.calls(LedgerMethod::GetMultipleAccounts), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tree_resolution_discovers_lazy_children() {
        let ledger = Arc::new(InMemoryLedger::new());
        let runtime = RuntimeAccess::builder(ledger.clone()).build().unwrap();
        let addresses = seeded(&ledger, 2);
        let root_address = seeded(&ledger, 1)[0];

        let root = AccountContext::new(runtime.clone(), "fund", root_address, RawCodec);
        let listed = addresses.clone();
        let collection = AccountCollection::child_of(
            &root,
            &runtime,
            "supported tokens",
            AccountCollection::<RawCodec>::address_list(move |_| {
                let listed = listed.clone();
                async move { Ok(listed) }
            }),
            AccountCollection::account_factory(runtime.clone(), RawCodec),
        );

        let start: Arc<dyn GraphNode> = root.clone();
        resolve_account_tree(start, false, 3).await.unwrap();

        assert!(root.account().is_some());
        assert_eq!(collection.len(), 2);
        assert!(collection.items().iter().all(|child| child.account().is_some()));
    }
}
