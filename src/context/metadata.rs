//! Off-chain metadata context.

use super::address::AddressResolver;
use super::AccountNode;
use crate::errors::{EngineError, EngineResult};
use crate::graph::{parent_ref, GraphNode, NodeCore, NodeDescription};
use crate::runtime::{MetadataRecord, RuntimeAccess};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use solana_sdk::pubkey::Pubkey;
use std::any::Any;
use std::sync::Arc;
use tracing::debug;

const ADDRESS_FRESH: &str = "address:fresh";
const ADDRESS_CACHED: &str = "address:cached";

/// Metadata for an address, served by the runtime's metadata loader
/// instead of the ledger.
pub struct MetadataContext {
    core: NodeCore,
    runtime: Arc<RuntimeAccess>,
    resolver: AddressResolver,
    address: RwLock<Option<Pubkey>>,
    /// `None` until resolved; `Some(None)` when the endpoint has no record.
    record: RwLock<Option<Option<MetadataRecord>>>,
}

impl std::fmt::Debug for MetadataContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataContext")
            .field("label", &self.core.label())
            .field("address", &*self.address.read())
            .field("record", &*self.record.read())
            .finish_non_exhaustive()
    }
}

impl MetadataContext {
    fn build(core: NodeCore, runtime: Arc<RuntimeAccess>, resolver: AddressResolver) -> Self {
        Self {
            core,
            runtime,
            resolver,
            address: RwLock::new(None),
            record: RwLock::new(None),
        }
    }

    pub fn new(
        runtime: Arc<RuntimeAccess>,
        label: impl Into<String>,
        address: impl Into<AddressResolver>,
    ) -> Arc<Self> {
        let core = NodeCore::with_dedup_ttl(label, runtime.dedup_ttl());
        Arc::new(Self::build(core, runtime, address.into()))
    }

    /// Fails when `parent` is itself a metadata context.
    pub fn child_of<P: GraphNode>(
        parent: &Arc<P>,
        runtime: Arc<RuntimeAccess>,
        label: impl Into<String>,
        address: impl Into<AddressResolver>,
    ) -> EngineResult<Arc<Self>> {
        let label = label.into();
        let concrete: &dyn Any = &**parent;
        if concrete.is::<MetadataContext>() {
            return Err(EngineError::Configuration(format!(
                "metadata context {label} cannot be nested under another metadata context"
            )));
        }
        let core = NodeCore::with_dedup_ttl(label, runtime.dedup_ttl()).with_parent(parent_ref(parent));
        let context = Arc::new(Self::build(core, runtime, address.into()));
        parent.core().add_child(context.clone());
        Ok(context)
    }

    pub fn address(&self) -> Option<Pubkey> {
        (*self.address.read()).or_else(|| self.resolver.known())
    }

    /// Last resolved record.
    pub fn record(&self) -> Option<MetadataRecord> {
        self.record.read().clone().flatten()
    }

    /// `Ok(None)` when the resolver yields no address or fails; the last
    /// address and record are dropped in that case.
    pub async fn resolve_address(&self, bypass_cache: bool) -> EngineResult<Option<Pubkey>> {
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
        let address = match resolved {
            Ok(address) => address,
            Err(err) => {
                debug!(context = self.core.label(), error = %err, "address resolution failed");
                None
            }
        };
        let mut current = self.address.write();
        if address.is_none() || *current != address {
            *self.record.write() = None;
        }
        *current = address;
        Ok(address)
    }

    /// Load the record; `Ok(None)` when the address is unresolved or the
    /// endpoint knows nothing about it.
    pub async fn resolve(&self, bypass_cache: bool) -> EngineResult<Option<MetadataRecord>> {
        let Some(address) = self.resolve_address(bypass_cache).await? else {
            return Ok(None);
        };
        let loader = self.runtime.metadata_loader()?;
        let key = address.to_string();
        if bypass_cache {
            loader.invalidate(&key);
        }

        let fresh = format!("metadata:{key}:fresh");
        let cached = format!("metadata:{key}:cached");
        let (dedup_key, alternate) = self
            .core
            .dedup()
            .bypass_keys::<Option<MetadataRecord>>(bypass_cache, &fresh, &cached);
        let record = self
            .core
            .dedup()
            .deduplicate(dedup_key, alternate, None, move || async move {
                loader.load(&key).await
            })
            .await?;

        *self.record.write() = Some(record.clone());
        Ok(record)
    }
}

impl GraphNode for MetadataContext {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn describe(&self) -> NodeDescription {
        let mut desc = self.core.base_description();
        desc.unresolved = self.record.read().is_none();
        if let Some(address) = self.address() {
            desc = desc.with_property("address", address);
        }
        match self.record() {
            Some(record) => desc
                .with_property("symbol", record.symbol)
                .with_property("name", record.name),
            None => desc,
        }
    }

    fn as_account_node(&self) -> Option<&dyn AccountNode> {
        Some(self)
    }
}

impl AccountNode for MetadataContext {
    fn address(&self) -> Option<Pubkey> {
        MetadataContext::address(self)
    }

    fn resolve_address_boxed(&self, bypass_cache: bool) -> BoxFuture<'_, EngineResult<Option<Pubkey>>> {
        self.resolve_address(bypass_cache).boxed()
    }

    fn resolve_self(&self, bypass_cache: bool) -> BoxFuture<'_, EngineResult<()>> {
        async move { self.resolve(bypass_cache).await.map(|_| ()) }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{InMemoryLedger, MetadataLoaderConfig, MetadataSource};
    use async_trait::async_trait;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MetadataSource for StaticSource {
        async fn fetch(&self, addresses: &[String]) -> EngineResult<HashMap<String, MetadataRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(addresses
                .iter()
                .map(|a| {
                    (
                        a.clone(),
                        MetadataRecord {
                            symbol: "fragSOL".into(),
                            name: "Fragmetric Restaked SOL".into(),
                            price: None,
                            update_interval_seconds: Some(30),
                            extra: BTreeMap::new(),
                        },
                    )
                })
                .collect())
        }
    }

    fn runtime(source: Arc<StaticSource>) -> Arc<RuntimeAccess> {
        RuntimeAccess::builder(Arc::new(InMemoryLedger::new()))
            .metadata_source(source, MetadataLoaderConfig::default())
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolves_through_loader() {
        let source = Arc::new(StaticSource {
            calls: AtomicUsize::new(0),
        });
        let ctx = MetadataContext::new(runtime(source.clone()), "token metadata", Pubkey::new_unique());

        let (a, b) = tokio::join!(ctx.resolve(false), ctx.resolve(false));
        assert_eq!(a.unwrap().unwrap().symbol, "fragSOL");
        assert_eq!(b.unwrap(), ctx.record());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        ctx.resolve(true).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(ctx.describe().properties["symbol"], "fragSOL");
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_address_drops_record() {
        let source = Arc::new(StaticSource {
            calls: AtomicUsize::new(0),
        });
        let address = Pubkey::new_unique();
        let listed = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let flag = listed.clone();
        let ctx = MetadataContext::new(
            runtime(source.clone()),
            "receipt metadata",
            AddressResolver::resolver(move |_| {
                let listed = flag.load(Ordering::SeqCst);
                async move {
                    if listed {
                        Ok(Some(address))
                    } else {
                        Err(EngineError::Rpc("fund account closed".into()))
                    }
                }
            }),
        );

        assert!(ctx.resolve(false).await.unwrap().is_some());
        assert_eq!(ctx.address(), Some(address));

        listed.store(false, Ordering::SeqCst);
        assert_eq!(ctx.resolve(true).await.unwrap(), None);
        assert_eq!(ctx.address(), None);
        assert!(ctx.record().is_none());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_nested_metadata_context_is_rejected() {
        let source = Arc::new(StaticSource {
            calls: AtomicUsize::new(0),
        });
        let runtime = runtime(source);
        let outer = MetadataContext::new(runtime.clone(), "outer", Pubkey::new_unique());
        assert!(matches!(
            MetadataContext::child_of(&outer, runtime, "inner", Pubkey::new_unique()),
            Err(EngineError::Configuration(_))
        ));
        assert!(outer.core().children().is_empty());
    }
}
