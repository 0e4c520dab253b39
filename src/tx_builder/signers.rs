//! Signer sources and signing
//!
//! A signer is anything that can produce an ed25519 signature for an
//! address. Three capabilities exist:
//! - `PartialSign`: signs message bytes (local keypairs, remote signing services)
//! - `SignAndSend`: can also sign and submit a whole transaction itself
//!   (wallet-style signers); `send` delegates to it
//! - `Deferred`: produced by a resolver that is only invoked when the
//!   already-attached signers cannot complete the signature set, so a
//!   hardware wallet is not unlocked for nothing
//!
//! Signers reach a blueprint through `SignerSource`s, which are concatenated
//! lowest to highest priority and deduplicated by address.

use crate::compat;
use crate::errors::{EngineError, EngineResult};
use crate::runtime::LedgerRpc;
use async_trait::async_trait;
use futures::future::BoxFuture;
use solana_sdk::{
    message::VersionedMessage,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
    transaction::VersionedTransaction,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignerCapability {
    PartialSign,
    SignAndSend,
    Deferred,
}

/// Async signing service for one address.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    fn address(&self) -> Pubkey;

    fn capability(&self) -> SignerCapability {
        SignerCapability::PartialSign
    }

    /// Sign serialized message bytes.
    async fn sign_message(&self, message: &[u8]) -> EngineResult<Signature>;

    /// Add this signer's signature and submit. Only `SignAndSend` signers
    /// implement this.
    async fn sign_and_send(&self, transaction: VersionedTransaction) -> EngineResult<Signature> {
        let _ = transaction;
        Err(EngineError::Signing(format!(
            "signer {} cannot submit transactions",
            self.address()
        )))
    }
}

pub type SignerRef = Arc<dyn TransactionSigner>;

/// Lazily produces signers.
pub type SignerResolver =
    Arc<dyn Fn() -> BoxFuture<'static, EngineResult<Vec<SignerRef>>> + Send + Sync>;

#[derive(Clone)]
pub enum SignerSource {
    Signer(SignerRef),
    Resolver(SignerResolver),
    /// Invoked only when the other signers leave required signatures missing.
    Deferred(SignerResolver),
}

impl std::fmt::Debug for SignerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Signer(signer) => f
                .debug_tuple("Signer")
                .field(&signer.address())
                .field(&signer.capability())
                .finish(),
            Self::Resolver(_) => f.write_str("Resolver(..)"),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

impl SignerSource {
    pub fn signer(signer: impl TransactionSigner + 'static) -> Self {
        Self::Signer(Arc::new(signer))
    }

    pub fn resolver<F>(resolver: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, EngineResult<Vec<SignerRef>>> + Send + Sync + 'static,
    {
        Self::Resolver(Arc::new(resolver))
    }

    pub fn deferred<F>(resolver: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, EngineResult<Vec<SignerRef>>> + Send + Sync + 'static,
    {
        Self::Deferred(Arc::new(resolver))
    }
}

impl From<SignerRef> for SignerSource {
    fn from(signer: SignerRef) -> Self {
        Self::Signer(signer)
    }
}

/// Local keypair signer.
#[derive(Clone)]
pub struct KeypairSigner {
    keypair: Arc<Keypair>,
}

impl std::fmt::Debug for KeypairSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeypairSigner")
            .field("address", &self.keypair.pubkey())
            .finish()
    }
}

impl KeypairSigner {
    pub fn new(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    pub fn shared(keypair: Keypair) -> SignerRef {
        Arc::new(Self::new(keypair))
    }
}

#[async_trait]
impl TransactionSigner for KeypairSigner {
    fn address(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    async fn sign_message(&self, message: &[u8]) -> EngineResult<Signature> {
        Ok(Signer::sign_message(&*self.keypair, message))
    }
}

/// Keypair-backed signer that submits the transactions it signs.
pub struct SubmittingSigner {
    keypair: Arc<Keypair>,
    rpc: Arc<dyn LedgerRpc>,
    skip_preflight: bool,
}

impl SubmittingSigner {
    pub fn new(keypair: Keypair, rpc: Arc<dyn LedgerRpc>) -> Self {
        Self {
            keypair: Arc::new(keypair),
            rpc,
            skip_preflight: false,
        }
    }

    pub fn skip_preflight(mut self, skip: bool) -> Self {
        self.skip_preflight = skip;
        self
    }
}

#[async_trait]
impl TransactionSigner for SubmittingSigner {
    fn address(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    fn capability(&self) -> SignerCapability {
        SignerCapability::SignAndSend
    }

    async fn sign_message(&self, message: &[u8]) -> EngineResult<Signature> {
        Ok(Signer::sign_message(&*self.keypair, message))
    }

    async fn sign_and_send(&self, mut transaction: VersionedTransaction) -> EngineResult<Signature> {
        let address = self.keypair.pubkey();
        let position = compat::get_required_signers(&transaction.message)
            .iter()
            .position(|key| *key == address)
            .ok_or_else(|| {
                EngineError::Signing(format!("{address} is not a required signer"))
            })?;
        let signature = Signer::sign_message(&*self.keypair, &transaction.message.serialize());
        transaction.signatures[position] = signature;
        self.rpc
            .send_transaction(&transaction, self.skip_preflight)
            .await
    }
}

/// Required signer addresses not covered by `signers`.
pub fn missing_signers(message: &VersionedMessage, signers: &[SignerRef]) -> Vec<Pubkey> {
    compat::get_required_signers(message)
        .iter()
        .filter(|key| !signers.iter().any(|s| s.address() == **key))
        .copied()
        .collect()
}

/// Sign `message` with every signer that matches a required address.
///
/// Unmatched slots keep the default (all-zero) signature. Unless
/// `allow_partial` is set, any unmatched slot fails with
/// `MissingSignatures` naming every such address.
pub async fn sign_message_with(
    message: VersionedMessage,
    signers: &[SignerRef],
    allow_partial: bool,
) -> EngineResult<VersionedTransaction> {
    let missing = missing_signers(&message, signers);
    if !missing.is_empty() && !allow_partial {
        return Err(EngineError::MissingSignatures { addresses: missing });
    }

    let by_address: HashMap<Pubkey, &SignerRef> =
        signers.iter().map(|s| (s.address(), s)).collect();
    let bytes = message.serialize();
    let required = compat::get_required_signers(&message).to_vec();

    let mut signatures = vec![Signature::default(); required.len()];
    for (slot, key) in signatures.iter_mut().zip(&required) {
        if let Some(signer) = by_address.get(key) {
            *slot = signer.sign_message(&bytes).await?;
        }
    }
    debug!(
        required = required.len(),
        missing = missing.len(),
        "message signed"
    );

    Ok(VersionedTransaction {
        signatures,
        message,
    })
}
