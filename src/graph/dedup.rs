//! Request deduplication keyed by string
//!
//! Identical concurrent calls collapse into one shared future. Entries expire
//! after their TTL whether or not anybody awaited them, and failed outcomes are
//! shared exactly like successful ones.

use crate::errors::EngineResult;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Default lifetime of a dedup entry.
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(5);

/// A settled-or-pending outcome shared by every caller with the same key.
pub type SharedResult<T> = Shared<BoxFuture<'static, EngineResult<T>>>;

struct DedupEntry {
    future: Box<dyn Any + Send + Sync>,
    created_at: Instant,
    ttl: Duration,
}

impl DedupEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) >= self.ttl
    }
}

/// Per-node store of in-flight and recently settled futures.
pub struct Deduplicator {
    entries: Mutex<HashMap<String, DedupEntry>>,
    default_ttl: Duration,
}

impl std::fmt::Debug for Deduplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deduplicator")
            .field("entries", &self.entries.lock().len())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_TTL)
    }
}

impl Deduplicator {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_ttl,
        }
    }

    /// Return the outstanding future for `key` (or, failing that,
    /// `alternate_key`), or start `resolver` and store it under `key`.
    ///
    /// `resolver` must only build the future; it is invoked while the entry
    /// table is locked so that two racing callers can never both miss.
    pub fn deduplicate<T, F, Fut>(
        &self,
        key: &str,
        alternate_key: Option<&str>,
        ttl: Option<Duration>,
        resolver: F,
    ) -> SharedResult<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResult<T>> + Send + 'static,
    {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| !entry.is_expired(now));

        for candidate in std::iter::once(key).chain(alternate_key) {
            if let Some(shared) = entries
                .get(candidate)
                .and_then(|entry| entry.future.downcast_ref::<SharedResult<T>>())
            {
                trace!(key = candidate, "dedup hit");
                return shared.clone();
            }
        }

        let shared = resolver().boxed().shared();
        entries.insert(
            key.to_string(),
            DedupEntry {
                future: Box::new(shared.clone()),
                created_at: now,
                ttl: ttl.unwrap_or(self.default_ttl),
            },
        );
        shared
    }

    /// Drop the entry for `key`; returns whether one existed.
    pub fn forget(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Drop the entry for `key` only if its future has already settled.
    ///
    /// Cache-bypassing callers use this so that a bypass issued after an
    /// earlier one completed starts a fresh call, while concurrent bypasses
    /// still collapse into one.
    pub fn forget_settled<T>(&self, key: &str) -> bool
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut entries = self.entries.lock();
        let settled = entries
            .get(key)
            .and_then(|entry| entry.future.downcast_ref::<SharedResult<T>>())
            .is_some_and(|shared| shared.peek().is_some());
        if settled {
            entries.remove(key);
        }
        settled
    }

    /// Primary and alternate key for a call with a cache-bypassing variant.
    ///
    /// A bypassing call runs under `fresh` after dropping the settled entries
    /// of both keys, so cached calls that follow it observe the refreshed
    /// outcome through the alternate key.
    pub fn bypass_keys<'k, T>(
        &self,
        bypass_cache: bool,
        fresh: &'k str,
        cached: &'k str,
    ) -> (&'k str, Option<&'k str>)
    where
        T: Clone + Send + Sync + 'static,
    {
        if bypass_cache {
            self.forget_settled::<T>(fresh);
            self.forget_settled::<T>(cached);
            (fresh, None)
        } else {
            (cached, Some(fresh))
        }
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| !entry.is_expired(now));
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
