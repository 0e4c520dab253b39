use crate::errors::{EngineError, EngineResult};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared, replaceable cancellation token.
///
/// Every guarded call reads the current token when it starts. `cancel`
/// fires the current token and installs a fresh one under the same lock,
/// so calls started afterwards are unaffected.
#[derive(Debug, Clone, Default)]
pub struct CancellationSlot {
    token: Arc<Mutex<CancellationToken>>,
}

impl CancellationSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> CancellationToken {
        self.token.lock().clone()
    }

    /// Cancel everything pending and arm a new token.
    pub fn cancel(&self) {
        let mut token = self.token.lock();
        token.cancel();
        *token = CancellationToken::new();
    }

    /// Run `fut` unless the token current at call time fires first.
    pub async fn guard<T, F>(&self, fut: F) -> EngineResult<T>
    where
        F: Future<Output = EngineResult<T>>,
    {
        let token = self.current();
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(EngineError::Cancelled),
            result = fut => result,
        }
    }
}
