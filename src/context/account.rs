//! Single account context.

use super::address::AddressResolver;
use super::{AccountCodec, AccountNode, DecodedAccount};
use crate::errors::{EngineError, EngineResult};
use crate::graph::{parent_ref, GraphNode, NodeCore, NodeDescription};
use crate::runtime::RuntimeAccess;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use solana_sdk::pubkey::Pubkey;
use std::sync::{Arc, Weak};
use tracing::debug;

const ADDRESS_FRESH: &str = "address:fresh";
const ADDRESS_CACHED: &str = "address:cached";

/// Where a context is in its resolution lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionState {
    Unresolved,
    AddressResolved,
    /// Address known, no account lives there.
    ResolvedEmpty,
    ResolvedPresent,
}

enum AccountState<T> {
    Unresolved,
    AddressResolved(Pubkey),
    Empty(Pubkey),
    Present(Arc<DecodedAccount<T>>),
}

impl<T> AccountState<T> {
    fn address(&self) -> Option<Pubkey> {
        match self {
            Self::Unresolved => None,
            Self::AddressResolved(address) | Self::Empty(address) => Some(*address),
            Self::Present(account) => Some(account.address()),
        }
    }

    fn kind(&self) -> ResolutionState {
        match self {
            Self::Unresolved => ResolutionState::Unresolved,
            Self::AddressResolved(_) => ResolutionState::AddressResolved,
            Self::Empty(_) => ResolutionState::ResolvedEmpty,
            Self::Present(_) => ResolutionState::ResolvedPresent,
        }
    }
}

/// An account resolved through `RuntimeAccess` and decoded with `C`.
pub struct AccountContext<C: AccountCodec> {
    core: NodeCore,
    runtime: Arc<RuntimeAccess>,
    resolver: AddressResolver,
    codec: Arc<C>,
    state: RwLock<AccountState<C::Output>>,
}

impl<C: AccountCodec> std::fmt::Debug for AccountContext<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountContext")
            .field("label", &self.core.label())
            .field("resolver", &self.resolver)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<C: AccountCodec> AccountContext<C> {
    fn build(
        core: NodeCore,
        runtime: Arc<RuntimeAccess>,
        resolver: AddressResolver,
        codec: C,
    ) -> Self {
        Self {
            core,
            runtime,
            resolver,
            codec: Arc::new(codec),
            state: RwLock::new(AccountState::Unresolved),
        }
    }

    /// Root context with no parent.
    pub fn new(
        runtime: Arc<RuntimeAccess>,
        label: impl Into<String>,
        address: impl Into<AddressResolver>,
        codec: C,
    ) -> Arc<Self> {
        let core = NodeCore::with_dedup_ttl(label, runtime.dedup_ttl());
        Arc::new(Self::build(core, runtime, address.into(), codec))
    }

    /// Context linked to `parent` without registering it as a child; the
    /// parent is expected to manage its own child list.
    pub fn attached(
        parent: Weak<dyn GraphNode>,
        runtime: Arc<RuntimeAccess>,
        label: impl Into<String>,
        address: impl Into<AddressResolver>,
        codec: C,
    ) -> Arc<Self> {
        let core = NodeCore::with_dedup_ttl(label, runtime.dedup_ttl()).with_parent(parent);
        Arc::new(Self::build(core, runtime, address.into(), codec))
    }

    /// Context registered as a child of `parent`.
    pub fn child_of<P: GraphNode>(
        parent: &Arc<P>,
        runtime: Arc<RuntimeAccess>,
        label: impl Into<String>,
        address: impl Into<AddressResolver>,
        codec: C,
    ) -> Arc<Self> {
        let child = Self::attached(parent_ref(parent), runtime, label, address, codec);
        parent.core().add_child(child.clone());
        child
    }

    pub fn runtime(&self) -> &Arc<RuntimeAccess> {
        &self.runtime
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn state(&self) -> ResolutionState {
        self.state.read().kind()
    }

    /// Resolved address, or the literal one if resolution has not run yet.
    pub fn address(&self) -> Option<Pubkey> {
        self.state.read().address().or_else(|| self.resolver.known())
    }

    /// Last resolved account, if present.
    pub fn account(&self) -> Option<Arc<DecodedAccount<C::Output>>> {
        match &*self.state.read() {
            AccountState::Present(account) => Some(account.clone()),
            _ => None,
        }
    }

    pub fn data(&self) -> Option<C::Output> {
        self.account().map(|account| account.data.clone())
    }

    /// Resolve the address; `Ok(None)` when the resolver yields none or
    /// fails. Either way the context falls back to `Unresolved`.
    pub async fn resolve_address(&self, bypass_cache: bool) -> EngineResult<Option<Pubkey>> {
        match self.lookup_address(bypass_cache).await {
            Ok(address) => Ok(address),
            Err(err) => {
                debug!(context = self.core.label(), error = %err, "address resolution failed");
                Ok(None)
            }
        }
    }

    /// Resolve the address or fail with `AddressUnresolved`.
    pub async fn require_address(&self, bypass_cache: bool) -> EngineResult<Pubkey> {
        match self.lookup_address(bypass_cache).await {
            Ok(Some(address)) => Ok(address),
            Ok(None) => Err(EngineError::AddressUnresolved {
                context: self.core.label().to_string(),
                reason: "resolver returned no address".into(),
            }),
            Err(err) => Err(EngineError::AddressUnresolved {
                context: self.core.label().to_string(),
                reason: err.to_string(),
            }),
        }
    }

    async fn lookup_address(&self, bypass_cache: bool) -> EngineResult<Option<Pubkey>> {
        let (key, alternate) = self
            .core
            .dedup()
            .bypass_keys::<Option<Pubkey>>(bypass_cache, ADDRESS_FRESH, ADDRESS_CACHED);

        let resolver = self.resolver.clone();
        let parent = self.core.parent();
        let resolved = self
            .core
            .dedup()
            .deduplicate(key, alternate, None, move || async move {
                resolver.resolve(parent).await
            })
            .await;

        let mut state = self.state.write();
        match resolved {
            Ok(Some(address)) => {
                if state.address() != Some(address) {
                    *state = AccountState::AddressResolved(address);
                }
                Ok(Some(address))
            }
            Ok(None) => {
                debug!(context = self.core.label(), "address resolver returned none");
                *state = AccountState::Unresolved;
                Ok(None)
            }
            Err(err) => {
                *state = AccountState::Unresolved;
                Err(err)
            }
        }
    }

    /// Fetch and decode the account. `Ok(None)` when the address is
    /// unresolved or no account exists there.
    ///
    /// With `bypass_cache` the runtime cache entry is invalidated first and
    /// a fresh fetch is made even if an earlier result is still in the
    /// dedup window.
    pub async fn resolve_account(
        &self,
        bypass_cache: bool,
    ) -> EngineResult<Option<Arc<DecodedAccount<C::Output>>>> {
        let Some(address) = self.resolve_address(bypass_cache).await? else {
            return Ok(None);
        };

        let fresh = format!("account:{address}:fresh");
        let cached = format!("account:{address}:cached");
        let (key, alternate) = self
            .core
            .dedup()
            .bypass_keys::<Option<Arc<DecodedAccount<C::Output>>>>(bypass_cache, &fresh, &cached);

        let runtime = self.runtime.clone();
        let codec = self.codec.clone();
        let fetched = self
            .core
            .dedup()
            .deduplicate(key, alternate, None, move || async move {
                if bypass_cache {
                    runtime.invalidate_account(&address);
                }
                let Some(record) = runtime.fetch_account(&address, bypass_cache).await? else {
                    return Ok::<_, EngineError>(None);
                };
                let data = codec.decode(&record.data, &record.owner)?;
                Ok(Some(Arc::new(DecodedAccount { record, data })))
            })
            .await?;

        *self.state.write() = match &fetched {
            Some(account) => AccountState::Present(account.clone()),
            None => AccountState::Empty(address),
        };
        Ok(fetched)
    }

    /// Resolve the account or fail with `AccountAbsent`.
    pub async fn require_account(
        &self,
        bypass_cache: bool,
    ) -> EngineResult<Arc<DecodedAccount<C::Output>>> {
        if let Some(account) = self.resolve_account(bypass_cache).await? {
            return Ok(account);
        }
        let address = self.require_address(false).await?;
        Err(EngineError::AccountAbsent(address))
    }
}

impl<C: AccountCodec> GraphNode for AccountContext<C> {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn describe(&self) -> NodeDescription {
        let state = self.state.read();
        let mut desc = self.core.base_description();
        desc.unresolved = matches!(*state, AccountState::Unresolved);
        if let Some(address) = state.address() {
            desc = desc.with_property("address", address);
        }
        match &*state {
            AccountState::Present(account) => desc
                .with_property("lamports", account.record.lamports)
                .with_property("owner", account.record.owner)
                .with_property("space", account.record.space),
            AccountState::Empty(_) => desc.with_property("account", "none"),
            _ => desc,
        }
    }

    fn as_account_node(&self) -> Option<&dyn AccountNode> {
        Some(self)
    }
}

impl<C: AccountCodec> AccountNode for AccountContext<C> {
    fn address(&self) -> Option<Pubkey> {
        AccountContext::address(self)
    }

    fn resolve_address_boxed(&self, bypass_cache: bool) -> BoxFuture<'_, EngineResult<Option<Pubkey>>> {
        self.resolve_address(bypass_cache).boxed()
    }

    fn resolve_self(&self, bypass_cache: bool) -> BoxFuture<'_, EngineResult<()>> {
        async move { self.resolve_account(bypass_cache).await.map(|_| ()) }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RawCodec;
    use crate::runtime::{InMemoryLedger, LedgerMethod};
    use solana_sdk::account::Account;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn setup() -> (Arc<InMemoryLedger>, Arc<RuntimeAccess>) {
        let ledger = Arc::new(InMemoryLedger::new());
        let runtime = RuntimeAccess::builder(ledger.clone()).build().unwrap();
        (ledger, runtime)
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_moves_forward() {
        let (ledger, runtime) = setup();
        let address = Pubkey::new_unique();
        let ctx = AccountContext::new(runtime, "vault", address, RawCodec);
        assert_eq!(ctx.state(), ResolutionState::Unresolved);
        assert_eq!(ctx.address(), Some(address));

        assert!(ctx.resolve_account(false).await.unwrap().is_none());
        assert_eq!(ctx.state(), ResolutionState::ResolvedEmpty);
        assert!(matches!(
            ctx.require_account(false).await,
            Err(EngineError::AccountAbsent(a)) if a == address
        ));

        ledger.set_account(address, Account::new(5, 3, &Pubkey::new_unique()));
        let account = ctx.resolve_account(true).await.unwrap().unwrap();
        assert_eq!(account.lamports(), 5);
        assert_eq!(ctx.state(), ResolutionState::ResolvedPresent);
        assert_eq!(ctx.data(), Some(vec![0, 0, 0]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_resolves_share_one_resolver_call() {
        let (_ledger, runtime) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let address = Pubkey::new_unique();
        let counter = calls.clone();
        let ctx = AccountContext::new(
            runtime,
            "derived",
            AddressResolver::resolver(move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(Some(address))
                }
            }),
            RawCodec,
        );

        let (a, b) = tokio::join!(ctx.resolve_address(false), ctx.resolve_address(false));
        assert_eq!(a.unwrap(), Some(address));
        assert_eq!(b.unwrap(), Some(address));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.state(), ResolutionState::AddressResolved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_address_is_soft() {
        let (ledger, runtime) = setup();
        let ctx = AccountContext::new(
            runtime,
            "nothing",
            AddressResolver::resolver(|_| async { Ok(None) }),
            RawCodec,
        );
        assert!(ctx.resolve_account(false).await.unwrap().is_none());
        assert_eq!(ctx.state(), ResolutionState::Unresolved);
        assert!(matches!(
            ctx.require_address(false).await,
            Err(EngineError::AddressUnresolved { .. })
        ));
        assert_eq!(ledger.calls(LedgerMethod::GetMultipleAccounts), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_resolver_is_soft() {
        let (ledger, runtime) = setup();
        let ctx = AccountContext::new(
            runtime,
            "orphan",
            AddressResolver::resolver(|_| async { Err(EngineError::Rpc("parent gone".into())) }),
            RawCodec,
        );

        assert_eq!(ctx.resolve_address(false).await.unwrap(), None);
        assert!(ctx.resolve_account(false).await.unwrap().is_none());
        assert_eq!(ctx.state(), ResolutionState::Unresolved);
        assert!(matches!(
            ctx.require_address(false).await,
            Err(EngineError::AddressUnresolved { reason, .. }) if reason.contains("parent gone")
        ));
        assert_eq!(ledger.calls(LedgerMethod::GetMultipleAccounts), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_vanished_address_clears_previous_account() {
        let (ledger, runtime) = setup();
        let address = Pubkey::new_unique();
        ledger.set_account(address, Account::new(8, 0, &Pubkey::new_unique()));
        let exists = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let flag = exists.clone();
        let ctx = AccountContext::new(
            runtime,
            "position",
            AddressResolver::resolver(move |_| {
                let present = flag.load(Ordering::SeqCst);
                async move { Ok(present.then_some(address)) }
            }),
            RawCodec,
        );

        assert_eq!(ctx.resolve_account(false).await.unwrap().unwrap().lamports(), 8);
        assert_eq!(ctx.state(), ResolutionState::ResolvedPresent);

        exists.store(false, Ordering::SeqCst);
        assert_eq!(ctx.resolve_address(true).await.unwrap(), None);
        assert_eq!(ctx.state(), ResolutionState::Unresolved);
        assert_eq!(ctx.address(), None);
        assert!(ctx.account().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_address_derives_from_parent() {
        let (ledger, runtime) = setup();
        let parent_address = Pubkey::new_unique();
        let child_address = Pubkey::new_unique();
        ledger.set_account(parent_address, Account::new(1, 0, &Pubkey::new_unique()));

        let parent = AccountContext::new(runtime.clone(), "parent", parent_address, RawCodec);
        let child = AccountContext::child_of(
            &parent,
            runtime,
            "child",
            AddressResolver::resolver(move |parent| async move {
                let parent = parent.and_then(crate::graph::downcast_node::<AccountContext<RawCodec>>);
                Ok(parent.and_then(|p| p.address()).map(|_| child_address))
            }),
            RawCodec,
        );

        assert_eq!(parent.core().children().len(), 1);
        assert_eq!(child.resolve_address(false).await.unwrap(), Some(child_address));
        let desc = child.describe();
        assert_eq!(desc.properties["address"], child_address.to_string());
    }
}
