//! Instruction sources and compute-budget handling
//!
//! Blueprints are assembled from `InstructionSource`s, each either a literal
//! instruction or an async resolver. Resolvers see the owning context, the
//! caller's arguments and the per-call overrides, and may yield several
//! (or no) instructions.
//!
//! Instruction accounts may carry the signer that authorizes them. Those
//! signers are pulled out during assembly and take the lowest priority in
//! signer resolution.

use super::builder::BlueprintOverrides;
use super::signers::SignerRef;
use crate::errors::EngineResult;
use crate::graph::GraphNode;
use futures::future::BoxFuture;
use solana_sdk::{
    compute_budget::{self, ComputeBudgetInstruction},
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};
use std::sync::Arc;

/// Borsh tags of the compute-budget program's instructions.
const SET_COMPUTE_UNIT_LIMIT_TAG: u8 = 2;
const SET_COMPUTE_UNIT_PRICE_TAG: u8 = 3;

/// Instruction account, optionally carrying its signer.
#[derive(Clone)]
pub struct AccountInput {
    pub pubkey: Pubkey,
    pub is_signer: bool,
    pub is_writable: bool,
    pub signer: Option<SignerRef>,
}

impl std::fmt::Debug for AccountInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountInput")
            .field("pubkey", &self.pubkey)
            .field("is_signer", &self.is_signer)
            .field("is_writable", &self.is_writable)
            .field("has_signer", &self.signer.is_some())
            .finish()
    }
}

impl AccountInput {
    pub fn writable(pubkey: Pubkey) -> Self {
        Self {
            pubkey,
            is_signer: false,
            is_writable: true,
            signer: None,
        }
    }

    pub fn readonly(pubkey: Pubkey) -> Self {
        Self {
            is_writable: false,
            ..Self::writable(pubkey)
        }
    }

    /// Signing account whose signer travels with the instruction.
    pub fn signer(signer: SignerRef, is_writable: bool) -> Self {
        Self {
            pubkey: signer.address(),
            is_signer: true,
            is_writable,
            signer: Some(signer),
        }
    }
}

impl From<AccountMeta> for AccountInput {
    fn from(meta: AccountMeta) -> Self {
        Self {
            pubkey: meta.pubkey,
            is_signer: meta.is_signer,
            is_writable: meta.is_writable,
            signer: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstructionSpec {
    pub program_id: Pubkey,
    pub accounts: Vec<AccountInput>,
    pub data: Vec<u8>,
}

impl InstructionSpec {
    pub fn new(program_id: Pubkey, accounts: Vec<AccountInput>, data: Vec<u8>) -> Self {
        Self {
            program_id,
            accounts,
            data,
        }
    }

    /// Reduce to a plain instruction, returning the attached signers.
    pub fn into_parts(self) -> (Instruction, Vec<SignerRef>) {
        let mut signers = Vec::new();
        let accounts = self
            .accounts
            .into_iter()
            .map(|input| {
                if let Some(signer) = input.signer {
                    signers.push(signer);
                }
                AccountMeta {
                    pubkey: input.pubkey,
                    is_signer: input.is_signer,
                    is_writable: input.is_writable,
                }
            })
            .collect();
        (
            Instruction {
                program_id: self.program_id,
                accounts,
                data: self.data,
            },
            signers,
        )
    }
}

impl From<Instruction> for InstructionSpec {
    fn from(ix: Instruction) -> Self {
        Self {
            program_id: ix.program_id,
            accounts: ix.accounts.into_iter().map(AccountInput::from).collect(),
            data: ix.data,
        }
    }
}

/// What an instruction resolver gets to look at.
pub struct ResolveScope<A> {
    /// The context that owns the blueprint, if any.
    pub owner: Option<Arc<dyn GraphNode>>,
    pub args: A,
    pub overrides: Arc<BlueprintOverrides<A>>,
}

/// `None` entries are dropped during assembly.
pub type InstructionResolver<A> = Arc<
    dyn Fn(ResolveScope<A>) -> BoxFuture<'static, EngineResult<Vec<Option<InstructionSpec>>>>
        + Send
        + Sync,
>;

pub enum InstructionSource<A> {
    Literal(InstructionSpec),
    Resolver(InstructionResolver<A>),
}

impl<A> Clone for InstructionSource<A> {
    fn clone(&self) -> Self {
        match self {
            Self::Literal(spec) => Self::Literal(spec.clone()),
            Self::Resolver(resolver) => Self::Resolver(resolver.clone()),
        }
    }
}

impl<A> std::fmt::Debug for InstructionSource<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Literal(spec) => f.debug_tuple("Literal").field(&spec.program_id).finish(),
            Self::Resolver(_) => f.write_str("Resolver(..)"),
        }
    }
}

impl<A> InstructionSource<A> {
    pub fn literal(spec: impl Into<InstructionSpec>) -> Self {
        Self::Literal(spec.into())
    }

    pub fn resolver<F>(resolver: F) -> Self
    where
        F: Fn(ResolveScope<A>) -> BoxFuture<'static, EngineResult<Vec<Option<InstructionSpec>>>>
            + Send
            + Sync
            + 'static,
    {
        Self::Resolver(Arc::new(resolver))
    }
}

fn compute_budget_tag(ix: &Instruction) -> Option<u8> {
    (ix.program_id == compute_budget::id())
        .then(|| ix.data.first().copied())
        .flatten()
}

pub fn has_compute_unit_limit(instructions: &[Instruction]) -> bool {
    instructions
        .iter()
        .any(|ix| compute_budget_tag(ix) == Some(SET_COMPUTE_UNIT_LIMIT_TAG))
}

pub fn has_compute_unit_price(instructions: &[Instruction]) -> bool {
    instructions
        .iter()
        .any(|ix| compute_budget_tag(ix) == Some(SET_COMPUTE_UNIT_PRICE_TAG))
}

/// Prepend one compute-budget instruction per configured kind that the
/// list does not already carry.
pub fn apply_compute_budget(
    instructions: &mut Vec<Instruction>,
    unit_price: Option<u64>,
    unit_limit: Option<u32>,
) {
    let mut synthesized = Vec::with_capacity(2);
    if let Some(limit) = unit_limit {
        if !has_compute_unit_limit(instructions) {
            synthesized.push(ComputeBudgetInstruction::set_compute_unit_limit(limit));
        }
    }
    if let Some(price) = unit_price {
        if !has_compute_unit_price(instructions) {
            synthesized.push(ComputeBudgetInstruction::set_compute_unit_price(price));
        }
    }
    if !synthesized.is_empty() {
        instructions.splice(0..0, synthesized);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx_builder::signers::KeypairSigner;
    use solana_sdk::signature::Keypair;

    fn program_ix() -> Instruction {
        Instruction::new_with_bytes(
            Pubkey::new_unique(),
            &[1, 2, 3],
            vec![AccountMeta::new(Pubkey::new_unique(), false)],
        )
    }

    #[test]
    fn test_budget_is_prepended_once_per_kind() {
        let mut ixs = vec![program_ix()];
        apply_compute_budget(&mut ixs, Some(10_000), Some(200_000));
        assert_eq!(ixs.len(), 3);
        assert_eq!(ixs[0], ComputeBudgetInstruction::set_compute_unit_limit(200_000));
        assert_eq!(ixs[1], ComputeBudgetInstruction::set_compute_unit_price(10_000));

        apply_compute_budget(&mut ixs, Some(1), Some(1));
        assert_eq!(ixs.len(), 3);
    }

    #[test]
    fn test_existing_budget_instruction_wins() {
        let mut ixs = vec![
            ComputeBudgetInstruction::set_compute_unit_price(5),
            program_ix(),
        ];
        apply_compute_budget(&mut ixs, Some(10_000), None);
        assert_eq!(ixs.len(), 2);
        assert_eq!(ixs[0], ComputeBudgetInstruction::set_compute_unit_price(5));
    }

    #[test]
    fn test_signers_are_extracted_from_accounts() {
        let signer = KeypairSigner::shared(Keypair::new());
        let spec = InstructionSpec::new(
            Pubkey::new_unique(),
            vec![
                AccountInput::signer(signer.clone(), true),
                AccountInput::readonly(Pubkey::new_unique()),
            ],
            vec![9],
        );
        let (ix, signers) = spec.into_parts();
        assert_eq!(signers.len(), 1);
        assert_eq!(signers[0].address(), signer.address());
        assert!(ix.accounts[0].is_signer && ix.accounts[0].is_writable);
        assert!(!ix.accounts[1].is_signer && !ix.accounts[1].is_writable);
    }
}
