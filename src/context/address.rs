//! Uniform async address lookup.

use crate::errors::EngineResult;
use crate::graph::GraphNode;
use crate::tx_builder::SignerRef;
use futures::future::{BoxFuture, FutureExt};
use solana_sdk::pubkey::Pubkey;
use std::future::Future;
use std::sync::Arc;

/// Async address lookup; receives the parent of the context being resolved.
pub type AddressFn = Arc<
    dyn Fn(Option<Arc<dyn GraphNode>>) -> BoxFuture<'static, EngineResult<Option<Pubkey>>>
        + Send
        + Sync,
>;

/// Where a context's address comes from.
#[derive(Clone)]
pub enum AddressResolver {
    Literal(Pubkey),
    Signer(SignerRef),
    Resolver(AddressFn),
}

impl std::fmt::Debug for AddressResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Literal(address) => f.debug_tuple("Literal").field(address).finish(),
            Self::Signer(signer) => f.debug_tuple("Signer").field(&signer.address()).finish(),
            Self::Resolver(_) => f.write_str("Resolver(..)"),
        }
    }
}

impl AddressResolver {
    pub fn resolver<F, Fut>(resolve: F) -> Self
    where
        F: Fn(Option<Arc<dyn GraphNode>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EngineResult<Option<Pubkey>>> + Send + 'static,
    {
        Self::Resolver(Arc::new(move |parent| resolve(parent).boxed()))
    }

    /// Address known without awaiting anything.
    pub fn known(&self) -> Option<Pubkey> {
        match self {
            Self::Literal(address) => Some(*address),
            Self::Signer(signer) => Some(signer.address()),
            Self::Resolver(_) => None,
        }
    }

    /// `Ok(None)` means the address does not exist, not that lookup failed.
    pub async fn resolve(&self, parent: Option<Arc<dyn GraphNode>>) -> EngineResult<Option<Pubkey>> {
        match self {
            Self::Resolver(resolve) => resolve(parent).await,
            other => Ok(other.known()),
        }
    }
}

impl From<Pubkey> for AddressResolver {
    fn from(address: Pubkey) -> Self {
        Self::Literal(address)
    }
}

impl From<SignerRef> for AddressResolver {
    fn from(signer: SignerRef) -> Self {
        Self::Signer(signer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx_builder::KeypairSigner;
    use solana_sdk::signature::{Keypair, Signer};

    #[tokio::test]
    async fn test_every_source_resolves() {
        let literal = Pubkey::new_unique();
        assert_eq!(
            AddressResolver::from(literal).resolve(None).await.unwrap(),
            Some(literal)
        );

        let keypair = Keypair::new();
        let expected = keypair.pubkey();
        let signer = AddressResolver::from(KeypairSigner::shared(keypair));
        assert_eq!(signer.known(), Some(expected));

        let missing = AddressResolver::resolver(|_| async { Ok(None) });
        assert_eq!(missing.known(), None);
        assert_eq!(missing.resolve(None).await.unwrap(), None);
    }
}
