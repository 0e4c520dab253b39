//! Assembled, unsigned transaction.

use super::lifetime::Lifetime;
use super::signers::{self, SignerRef, SignerResolver};
use crate::compat;
use crate::errors::{EngineError, EngineResult};
use futures::future::try_join_all;
use solana_sdk::{
    address_lookup_table::AddressLookupTableAccount,
    instruction::Instruction,
    message::{v0, VersionedMessage},
    pubkey::Pubkey,
    transaction::VersionedTransaction,
};
#[allow(deprecated)]
use solana_sdk::system_instruction;
use tracing::debug;

/// Output of `TransactionBlueprintBuilder::assemble`.
///
/// Exactly one lifetime is set. For a durable-nonce lifetime the
/// `advance_nonce_account` instruction is not part of `instructions`; it is
/// placed first when the message is compiled.
#[derive(Clone)]
pub struct TransactionBlueprint {
    pub instructions: Vec<Instruction>,
    pub fee_payer: Pubkey,
    pub lifetime: Lifetime,
    pub address_lookup_tables: Vec<AddressLookupTableAccount>,
    /// One entry per address, highest-priority source kept.
    pub signers: Vec<SignerRef>,
    /// Signer that submits the transaction itself, if one won its address.
    pub sending_signer: Option<SignerRef>,
    pub deferred_signers: Vec<SignerResolver>,
}

impl std::fmt::Debug for TransactionBlueprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionBlueprint")
            .field("instructions", &self.instructions.len())
            .field("fee_payer", &self.fee_payer)
            .field("lifetime", &self.lifetime)
            .field("lookup_tables", &self.address_lookup_tables.len())
            .field(
                "signers",
                &self.signers.iter().map(|s| s.address()).collect::<Vec<_>>(),
            )
            .field(
                "sending_signer",
                &self.sending_signer.as_ref().map(|s| s.address()),
            )
            .field("deferred_signers", &self.deferred_signers.len())
            .finish()
    }
}

impl TransactionBlueprint {
    /// Instructions in message order, nonce advance included.
    pub fn message_instructions(&self) -> Vec<Instruction> {
        let mut all = Vec::with_capacity(self.instructions.len() + 1);
        if let Lifetime::DurableNonce(nonce) = &self.lifetime {
            all.push(system_instruction::advance_nonce_account(
                &nonce.nonce_account,
                &nonce.nonce_authority,
            ));
        }
        all.extend(self.instructions.iter().cloned());
        all
    }

    pub fn compile(&self) -> EngineResult<VersionedMessage> {
        let message = v0::Message::try_compile(
            &self.fee_payer,
            &self.message_instructions(),
            &self.address_lookup_tables,
            self.lifetime.token(),
        )
        .map_err(|e| EngineError::Signing(format!("message compilation failed: {e}")))?;
        Ok(VersionedMessage::V0(message))
    }

    pub fn required_signers(&self) -> EngineResult<Vec<Pubkey>> {
        Ok(compat::get_required_signers(&self.compile()?).to_vec())
    }

    /// Sign with the attached signers.
    ///
    /// Deferred resolvers run only when the attached signers leave required
    /// addresses uncovered; their signers fill those gaps and never replace
    /// an attached signer.
    pub async fn sign(&self, allow_partial: bool) -> EngineResult<VersionedTransaction> {
        let message = self.compile()?;
        let signers = self.complete_signers(&message).await?;
        signers::sign_message_with(message, &signers, allow_partial).await
    }

    /// Sign with everyone except `excluded`, leaving its slot empty.
    pub async fn sign_without(&self, excluded: &Pubkey) -> EngineResult<VersionedTransaction> {
        let message = self.compile()?;
        let signers: Vec<SignerRef> = self
            .complete_signers(&message)
            .await?
            .into_iter()
            .filter(|s| s.address() != *excluded)
            .collect();
        signers::sign_message_with(message, &signers, true).await
    }

    async fn complete_signers(&self, message: &VersionedMessage) -> EngineResult<Vec<SignerRef>> {
        let mut signers = self.signers.clone();
        if self.deferred_signers.is_empty() || signers::missing_signers(message, &signers).is_empty()
        {
            return Ok(signers);
        }

        debug!(
            resolvers = self.deferred_signers.len(),
            "attached signers incomplete, invoking deferred signers"
        );
        let resolved = try_join_all(self.deferred_signers.iter().map(|resolve| resolve())).await?;
        for signer in resolved.into_iter().flatten() {
            if !signers.iter().any(|s| s.address() == signer.address()) {
                signers.push(signer);
            }
        }
        Ok(signers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{LatestBlockhash, NonceConfig};
    use crate::tx_builder::signers::KeypairSigner;
    use futures::FutureExt;
    use solana_sdk::{hash::Hash, signature::Keypair};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn blueprint(payer: &SignerRef, lifetime: Lifetime) -> TransactionBlueprint {
        TransactionBlueprint {
            instructions: vec![system_instruction::transfer(
                &payer.address(),
                &Pubkey::new_unique(),
                10,
            )],
            fee_payer: payer.address(),
            lifetime,
            address_lookup_tables: vec![],
            signers: vec![payer.clone()],
            sending_signer: None,
            deferred_signers: vec![],
        }
    }

    #[tokio::test]
    async fn test_nonce_lifetime_prepends_advance() {
        let payer = KeypairSigner::shared(Keypair::new());
        let nonce = NonceConfig {
            nonce_account: Pubkey::new_unique(),
            nonce_authority: payer.address(),
            nonce: Hash::new_unique(),
        };
        let bp = blueprint(&payer, Lifetime::DurableNonce(nonce));

        let ixs = bp.message_instructions();
        assert_eq!(ixs.len(), 2);
        assert_eq!(
            ixs[0],
            system_instruction::advance_nonce_account(&nonce.nonce_account, &payer.address())
        );
        let message = bp.compile().unwrap();
        assert_eq!(*compat::get_recent_blockhash(&message), nonce.nonce);
    }

    #[tokio::test]
    async fn test_deferred_signers_only_run_when_needed() {
        let payer = KeypairSigner::shared(Keypair::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let hardware = KeypairSigner::shared(Keypair::new());
        let provided = hardware.clone();

        let mut bp = blueprint(
            &payer,
            Lifetime::Blockhash(LatestBlockhash {
                blockhash: Hash::new_unique(),
                last_valid_block_height: 10,
            }),
        );
        bp.deferred_signers.push(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let signer = provided.clone();
            async move { Ok::<_, EngineError>(vec![signer]) }.boxed()
        }));

        bp.sign(false).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        bp.instructions.push(system_instruction::transfer(
            &hardware.address(),
            &payer.address(),
            1,
        ));
        let tx = bp.sign(false).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(tx.verify_with_results().into_iter().all(|ok| ok));
    }
}
