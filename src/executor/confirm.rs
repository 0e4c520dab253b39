//! Submission and confirmation strategies
//!
//! Blockhash transactions are confirmed until the blockhash's last valid
//! block height passes. Durable-nonce transactions have no expiry height;
//! they are confirmed until the nonce account advances, at which point the
//! signature status is checked one last time before the nonce race is
//! reported.

use crate::errors::{EngineError, EngineResult};
use crate::runtime::{LatestBlockhash, LedgerRpc, NonceConfig};
use async_trait::async_trait;
use solana_client::nonce_utils;
use solana_sdk::{signature::Signature, transaction::VersionedTransaction};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

#[async_trait]
pub trait ConfirmationStrategy: Send + Sync {
    async fn confirm_blockhash(
        &self,
        rpc: &dyn LedgerRpc,
        transaction: &VersionedTransaction,
        blockhash: LatestBlockhash,
        skip_preflight: bool,
    ) -> EngineResult<Signature>;

    async fn confirm_nonce(
        &self,
        rpc: &dyn LedgerRpc,
        transaction: &VersionedTransaction,
        nonce: NonceConfig,
        skip_preflight: bool,
    ) -> EngineResult<Signature>;
}

/// Sends once, then polls signature status at a fixed interval.
#[derive(Debug, Clone)]
pub struct PollingConfirmation {
    poll_interval: Duration,
    timeout: Duration,
}

enum Landed {
    Confirmed,
    Pending,
}

impl PollingConfirmation {
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval,
            timeout,
        }
    }

    /// A landed-but-failed transaction still counts as confirmed; the
    /// failure surfaces through the parsed result.
    async fn poll_status(rpc: &dyn LedgerRpc, signature: &Signature) -> EngineResult<Landed> {
        let statuses = rpc.get_signature_statuses(std::slice::from_ref(signature)).await?;
        match statuses.into_iter().next().flatten() {
            Some(status) if status.confirmed || status.err.is_some() => {
                if let Some(err) = &status.err {
                    warn!(%signature, error = %err, "transaction landed with an error");
                }
                Ok(Landed::Confirmed)
            }
            _ => Ok(Landed::Pending),
        }
    }

    fn timed_out(&self, started: Instant, signature: &Signature) -> EngineResult<()> {
        if started.elapsed() >= self.timeout {
            return Err(EngineError::Transport(format!(
                "confirmation of {signature} timed out after {:?}",
                self.timeout
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ConfirmationStrategy for PollingConfirmation {
    async fn confirm_blockhash(
        &self,
        rpc: &dyn LedgerRpc,
        transaction: &VersionedTransaction,
        blockhash: LatestBlockhash,
        skip_preflight: bool,
    ) -> EngineResult<Signature> {
        let signature = rpc.send_transaction(transaction, skip_preflight).await?;
        let started = Instant::now();
        loop {
            if let Landed::Confirmed = Self::poll_status(rpc, &signature).await? {
                debug!(%signature, "confirmed");
                return Ok(signature);
            }
            let height = rpc.get_block_height().await?;
            if height > blockhash.last_valid_block_height {
                return Err(EngineError::Rpc(format!(
                    "transaction {signature} expired: block height {height} exceeded {}",
                    blockhash.last_valid_block_height
                )));
            }
            self.timed_out(started, &signature)?;
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn confirm_nonce(
        &self,
        rpc: &dyn LedgerRpc,
        transaction: &VersionedTransaction,
        nonce: NonceConfig,
        skip_preflight: bool,
    ) -> EngineResult<Signature> {
        let signature = rpc.send_transaction(transaction, skip_preflight).await?;
        let started = Instant::now();
        loop {
            if let Landed::Confirmed = Self::poll_status(rpc, &signature).await? {
                debug!(%signature, "confirmed");
                return Ok(signature);
            }

            let current = match rpc.get_account(&nonce.nonce_account).await? {
                Some(account) => Some(
                    nonce_utils::data_from_account(&account)
                        .map_err(|e| EngineError::decode("nonce account", e))?
                        .blockhash(),
                ),
                None => None,
            };
            if current != Some(nonce.nonce) {
                // the nonce moved; the transaction may still be the one that moved it
                if let Landed::Confirmed = Self::poll_status(rpc, &signature).await? {
                    return Ok(signature);
                }
                return Err(EngineError::NonceInvalid(format!(
                    "nonce account {} advanced before {signature} landed",
                    nonce.nonce_account
                )));
            }
            self.timed_out(started, &signature)?;
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
