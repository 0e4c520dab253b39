//! Records exchanged with the ledger RPC surface.

use solana_sdk::{
    account::Account,
    hash::Hash,
    instruction::CompiledInstruction,
    message::v0::LoadedAddresses,
    pubkey::Pubkey,
    transaction::VersionedTransaction,
};

/// Raw account state as fetched; replaced wholesale on every fresh fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRecord {
    pub address: Pubkey,
    pub data: Vec<u8>,
    pub owner: Pubkey,
    pub lamports: u64,
    pub executable: bool,
    pub space: usize,
}

impl AccountRecord {
    pub fn new(address: Pubkey, account: Account) -> Self {
        let space = account.data.len();
        Self {
            address,
            data: account.data,
            owner: account.owner,
            lamports: account.lamports,
            executable: account.executable,
            space,
        }
    }

    pub fn to_account(&self) -> Account {
        Account {
            lamports: self.lamports,
            data: self.data.clone(),
            owner: self.owner,
            executable: self.executable,
            rent_epoch: 0,
        }
    }
}

/// Freshness token used as a blockhash lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatestBlockhash {
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
}

/// Durable nonce descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceConfig {
    pub nonce_account: Pubkey,
    pub nonce_authority: Pubkey,
    /// Current stored nonce value, used as the message lifetime token.
    pub nonce: Hash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerInstructionSet {
    /// Index of the top-level instruction that produced these.
    pub index: u8,
    pub instructions: Vec<CompiledInstruction>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedMeta {
    pub err: Option<String>,
    pub fee: u64,
    pub log_messages: Vec<String>,
    pub compute_units_consumed: Option<u64>,
    pub inner_instructions: Vec<InnerInstructionSet>,
    pub loaded_addresses: Option<LoadedAddresses>,
}

/// A confirmed transaction as returned by get-transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedTransaction {
    pub slot: u64,
    pub transaction: VersionedTransaction,
    pub meta: Option<FetchedMeta>,
}

impl FetchedTransaction {
    pub fn log_messages(&self) -> &[String] {
        self.meta
            .as_ref()
            .map(|m| m.log_messages.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationOutcome {
    pub err: Option<String>,
    pub logs: Vec<String>,
    pub units_consumed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureStatus {
    pub slot: u64,
    pub err: Option<String>,
    /// Reached the configured commitment level.
    pub confirmed: bool,
}
