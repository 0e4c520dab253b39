//! Transaction lifetime: recent blockhash or durable nonce.

use crate::runtime::{LatestBlockhash, NonceConfig};
use solana_sdk::{hash::Hash, pubkey::Pubkey};

/// Where a durable nonce comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceSource {
    /// Nonce value and authority known up front; nothing is fetched.
    Literal(NonceConfig),
    /// Read the nonce account at assembly time.
    Account(Pubkey),
}

/// Explicit lifetime requested by a template or a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifetimeOverride {
    DurableNonce(NonceSource),
    /// Do not fetch a blockhash. The blueprint can be inspected and
    /// serialized but never submitted.
    Inspection,
    Blockhash(LatestBlockhash),
}

/// The single lifetime constraint of an assembled blueprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    Blockhash(LatestBlockhash),
    DurableNonce(NonceConfig),
    Inspection,
}

impl Lifetime {
    /// Value placed in the message's `recent_blockhash` field.
    pub fn token(&self) -> Hash {
        match self {
            Self::Blockhash(latest) => latest.blockhash,
            Self::DurableNonce(nonce) => nonce.nonce,
            Self::Inspection => Hash::default(),
        }
    }

    pub fn is_durable_nonce(&self) -> bool {
        matches!(self, Self::DurableNonce(_))
    }

    pub fn is_submittable(&self) -> bool {
        !matches!(self, Self::Inspection)
    }

    pub fn last_valid_block_height(&self) -> Option<u64> {
        match self {
            Self::Blockhash(latest) => Some(latest.last_valid_block_height),
            _ => None,
        }
    }
}
