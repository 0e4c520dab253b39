//! Keyed batch loader
//!
//! Calls to `load` made within one window are merged into a single call of
//! the batch function (at most `max_batch_size` keys). Each caller receives
//! only the value at its own key, in its own call order. A full batch is
//! dispatched immediately without waiting for the window to close.

use crate::errors::{EngineError, EngineResult};
use crate::metrics::EngineMetrics;
use futures::future::{join_all, BoxFuture};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace};

pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_millis(50);
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

/// Fetches values for a list of unique keys, returning one value per key in
/// the same order.
pub type BatchFn<K, V> =
    Arc<dyn Fn(Vec<K>) -> BoxFuture<'static, EngineResult<Vec<V>>> + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    pub window: Duration,
    pub max_batch_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_BATCH_WINDOW,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

struct PendingBatch<K, V> {
    keys: Vec<K>,
    waiters: Vec<oneshot::Sender<EngineResult<V>>>,
    /// Bumped on every flush so a stale window timer does nothing.
    generation: u64,
}

impl<K, V> PendingBatch<K, V> {
    fn take(&mut self) -> (Vec<K>, Vec<oneshot::Sender<EngineResult<V>>>) {
        self.generation = self.generation.wrapping_add(1);
        (
            std::mem::take(&mut self.keys),
            std::mem::take(&mut self.waiters),
        )
    }
}

struct LoaderInner<K, V> {
    name: &'static str,
    fetch: BatchFn<K, V>,
    config: BatchConfig,
    pending: Mutex<PendingBatch<K, V>>,
    metrics: Option<Arc<EngineMetrics>>,
}

pub struct BatchLoader<K, V> {
    inner: Arc<LoaderInner<K, V>>,
}

impl<K, V> Clone for BatchLoader<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> std::fmt::Debug for BatchLoader<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchLoader")
            .field("name", &self.inner.name)
            .field("config", &self.inner.config)
            .field("pending", &self.inner.pending.lock().keys.len())
            .finish()
    }
}

impl<K, V> BatchLoader<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    pub fn new(name: &'static str, config: BatchConfig, fetch: BatchFn<K, V>) -> Self {
        Self::build(name, config, fetch, None)
    }

    /// Record batch counts and sizes into `metrics`.
    pub fn with_metrics(
        name: &'static str,
        config: BatchConfig,
        fetch: BatchFn<K, V>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self::build(name, config, fetch, Some(metrics))
    }

    fn build(
        name: &'static str,
        config: BatchConfig,
        fetch: BatchFn<K, V>,
        metrics: Option<Arc<EngineMetrics>>,
    ) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                name,
                fetch,
                config: BatchConfig {
                    window: config.window,
                    max_batch_size: config.max_batch_size.max(1),
                },
                pending: Mutex::new(PendingBatch {
                    keys: Vec::new(),
                    waiters: Vec::new(),
                    generation: 0,
                }),
                metrics,
            }),
        }
    }

    pub fn config(&self) -> BatchConfig {
        self.inner.config
    }

    /// Queue `key` into the current window and wait for its value.
    pub async fn load(&self, key: K) -> EngineResult<V> {
        let (tx, rx) = oneshot::channel();
        let full_batch = {
            let mut pending = self.inner.pending.lock();
            pending.keys.push(key);
            pending.waiters.push(tx);
            if pending.keys.len() >= self.inner.config.max_batch_size {
                Some(pending.take())
            } else {
                if pending.keys.len() == 1 {
                    self.schedule_flush(pending.generation);
                }
                None
            }
        };

        if let Some((keys, waiters)) = full_batch {
            let inner = self.inner.clone();
            tokio::spawn(async move { dispatch(inner, keys, waiters).await });
        }

        rx.await
            .map_err(|_| EngineError::internal("batch loader dropped a pending request"))?
    }

    /// Load several keys; results follow the order of `keys`.
    pub async fn load_many(&self, keys: Vec<K>) -> EngineResult<Vec<V>> {
        join_all(keys.into_iter().map(|key| self.load(key)))
            .await
            .into_iter()
            .collect()
    }

    fn schedule_flush(&self, generation: u64) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(inner.config.window).await;
            let batch = {
                let mut pending = inner.pending.lock();
                if pending.generation == generation && !pending.keys.is_empty() {
                    Some(pending.take())
                } else {
                    None
                }
            };
            if let Some((keys, waiters)) = batch {
                dispatch(inner, keys, waiters).await;
            }
        });
    }
}

async fn dispatch<K, V>(
    inner: Arc<LoaderInner<K, V>>,
    keys: Vec<K>,
    waiters: Vec<oneshot::Sender<EngineResult<V>>>,
) where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    // Same key twice in one window is fetched once.
    let mut unique: Vec<K> = Vec::with_capacity(keys.len());
    let mut index: HashMap<K, usize> = HashMap::with_capacity(keys.len());
    let slots: Vec<usize> = keys
        .into_iter()
        .map(|key| {
            *index.entry(key.clone()).or_insert_with(|| {
                unique.push(key);
                unique.len() - 1
            })
        })
        .collect();

    debug!(
        loader = inner.name,
        keys = unique.len(),
        callers = waiters.len(),
        "flushing batch"
    );
    if let Some(metrics) = &inner.metrics {
        metrics.rpc_batches.inc();
        metrics.batch_size.observe(unique.len() as f64);
    }

    let expected = unique.len();
    match (inner.fetch)(unique).await {
        Ok(values) if values.len() == expected => {
            for (waiter, slot) in waiters.into_iter().zip(slots) {
                let _ = waiter.send(Ok(values[slot].clone()));
            }
        }
        Ok(values) => {
            let err = EngineError::internal(format!(
                "{} batch returned {} values for {} keys",
                inner.name,
                values.len(),
                expected
            ));
            for waiter in waiters {
                let _ = waiter.send(Err(err.clone()));
            }
        }
        Err(err) => {
            trace!(loader = inner.name, error = %err, "batch failed");
            if let Some(metrics) = &inner.metrics {
                metrics.rpc_errors.inc();
            }
            for waiter in waiters {
                let _ = waiter.send(Err(err.clone()));
            }
        }
    }
}
