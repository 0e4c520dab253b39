//! In-memory ledger
//!
//! A `LedgerRpc` without a network: accounts are seeded directly, sent
//! transactions are recorded and become fetchable, failures can be
//! scripted per method and every call is counted. Used for offline runs
//! and as the test double throughout the crate.

use super::rpc::LedgerRpc;
use super::types::{
    FetchedMeta, FetchedTransaction, LatestBlockhash, SignatureStatus, SimulationOutcome,
};
use crate::errors::{EngineError, EngineResult};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use solana_sdk::{
    account::Account,
    epoch_info::EpochInfo,
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    system_program,
    transaction::VersionedTransaction,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::trace;

/// Byte length of an address lookup table header.
const LOOKUP_TABLE_META_SIZE: usize = 56;
const LOOKUP_TABLE_PROGRAM: Pubkey =
    solana_sdk::pubkey!("AddressLookupTab1e1111111111111111111111111");
/// Byte length of a durable nonce account.
const NONCE_ACCOUNT_SIZE: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerMethod {
    GetAccount,
    GetMultipleAccounts,
    GetLatestBlockhash,
    GetBlockHeight,
    GetTransaction,
    SimulateTransaction,
    SendTransaction,
    GetSignatureStatuses,
    GetEpochInfo,
    GetSlot,
    RequestAirdrop,
}

#[derive(Debug)]
pub struct InMemoryLedger {
    accounts: DashMap<Pubkey, Account>,
    transactions: DashMap<Signature, FetchedTransaction>,
    statuses: DashMap<Signature, SignatureStatus>,
    sent: Mutex<Vec<VersionedTransaction>>,
    blockhash: Mutex<LatestBlockhash>,
    slot: AtomicU64,
    block_height: AtomicU64,
    calls: Mutex<HashMap<LedgerMethod, usize>>,
    failures: Mutex<HashMap<LedgerMethod, VecDeque<EngineError>>>,
    simulation: Mutex<SimulationOutcome>,
    execution_meta: Mutex<FetchedMeta>,
    /// Number of upcoming get-transaction calls that see nothing.
    hidden_transaction_polls: AtomicUsize,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
            transactions: DashMap::new(),
            statuses: DashMap::new(),
            sent: Mutex::new(Vec::new()),
            blockhash: Mutex::new(LatestBlockhash {
                blockhash: Hash::new_unique(),
                last_valid_block_height: 150,
            }),
            slot: AtomicU64::new(1),
            block_height: AtomicU64::new(1),
            calls: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            simulation: Mutex::new(SimulationOutcome {
                err: None,
                logs: vec!["Program log: simulated".to_string()],
                units_consumed: Some(1_000),
            }),
            execution_meta: Mutex::new(FetchedMeta {
                log_messages: vec!["Program log: executed".to_string()],
                fee: 5_000,
                compute_units_consumed: Some(1_000),
                ..FetchedMeta::default()
            }),
            hidden_transaction_polls: AtomicUsize::new(0),
        }
    }

    pub fn set_account(&self, address: Pubkey, account: Account) {
        self.accounts.insert(address, account);
    }

    pub fn remove_account(&self, address: &Pubkey) -> Option<Account> {
        self.accounts.remove(address).map(|(_, account)| account)
    }

    pub fn account(&self, address: &Pubkey) -> Option<Account> {
        self.accounts.get(address).map(|a| a.clone())
    }

    /// Install a new latest blockhash and return it.
    pub fn advance_blockhash(&self) -> LatestBlockhash {
        let mut current = self.blockhash.lock();
        *current = LatestBlockhash {
            blockhash: Hash::new_unique(),
            last_valid_block_height: current.last_valid_block_height + 150,
        };
        self.block_height.fetch_add(1, Ordering::SeqCst);
        *current
    }

    pub fn latest_blockhash(&self) -> LatestBlockhash {
        *self.blockhash.lock()
    }

    /// Queue an error returned by the next call to `method`.
    pub fn fail_next(&self, method: LedgerMethod, error: EngineError) {
        self.failures
            .lock()
            .entry(method)
            .or_default()
            .push_back(error);
    }

    pub fn calls(&self, method: LedgerMethod) -> usize {
        self.calls.lock().get(&method).copied().unwrap_or(0)
    }

    pub fn sent_transactions(&self) -> Vec<VersionedTransaction> {
        self.sent.lock().clone()
    }

    pub fn set_simulation(&self, outcome: SimulationOutcome) {
        *self.simulation.lock() = outcome;
    }

    /// Meta attached to every transaction accepted from now on.
    pub fn set_execution_meta(&self, meta: FetchedMeta) {
        *self.execution_meta.lock() = meta;
    }

    pub fn insert_transaction(&self, signature: Signature, transaction: FetchedTransaction) {
        self.transactions.insert(signature, transaction);
    }

    pub fn set_signature_status(&self, signature: Signature, status: SignatureStatus) {
        self.statuses.insert(signature, status);
    }

    pub fn hide_transactions_for(&self, polls: usize) {
        self.hidden_transaction_polls.store(polls, Ordering::SeqCst);
    }

    /// Account data for an active address lookup table holding `addresses`.
    pub fn lookup_table_account(addresses: &[Pubkey]) -> Account {
        let mut data = vec![0u8; LOOKUP_TABLE_META_SIZE];
        // ProgramState::LookupTable
        data[0..4].copy_from_slice(&1u32.to_le_bytes());
        // deactivation_slot = u64::MAX keeps the table active
        data[4..12].copy_from_slice(&u64::MAX.to_le_bytes());
        for address in addresses {
            data.extend_from_slice(address.as_ref());
        }
        Account {
            lamports: 1_000_000,
            data,
            owner: LOOKUP_TABLE_PROGRAM,
            executable: false,
            rent_epoch: 0,
        }
    }

    /// Account data for an initialized durable nonce account.
    pub fn nonce_account(authority: &Pubkey, nonce: &Hash) -> Account {
        let mut data = Vec::with_capacity(NONCE_ACCOUNT_SIZE);
        // Versions::Current
        data.extend_from_slice(&1u32.to_le_bytes());
        // State::Initialized
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(authority.as_ref());
        data.extend_from_slice(nonce.as_ref());
        data.extend_from_slice(&5_000u64.to_le_bytes());
        Account {
            lamports: 1_447_680,
            data,
            owner: system_program::id(),
            executable: false,
            rent_epoch: 0,
        }
    }

    fn enter(&self, method: LedgerMethod) -> EngineResult<()> {
        *self.calls.lock().entry(method).or_insert(0) += 1;
        let scripted = self
            .failures
            .lock()
            .get_mut(&method)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(err) => {
                trace!(?method, error = %err, "scripted failure");
                Err(err)
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl LedgerRpc for InMemoryLedger {
    async fn get_account(&self, address: &Pubkey) -> EngineResult<Option<Account>> {
        self.enter(LedgerMethod::GetAccount)?;
        Ok(self.account(address))
    }

    async fn get_multiple_accounts(
        &self,
        addresses: &[Pubkey],
    ) -> EngineResult<Vec<Option<Account>>> {
        self.enter(LedgerMethod::GetMultipleAccounts)?;
        Ok(addresses.iter().map(|a| self.account(a)).collect())
    }

    async fn get_latest_blockhash(&self) -> EngineResult<LatestBlockhash> {
        self.enter(LedgerMethod::GetLatestBlockhash)?;
        Ok(self.latest_blockhash())
    }

    async fn get_block_height(&self) -> EngineResult<u64> {
        self.enter(LedgerMethod::GetBlockHeight)?;
        Ok(self.block_height.load(Ordering::SeqCst))
    }

    async fn get_transaction(
        &self,
        signature: &Signature,
    ) -> EngineResult<Option<FetchedTransaction>> {
        self.enter(LedgerMethod::GetTransaction)?;
        let hidden = self
            .hidden_transaction_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if hidden {
            return Ok(None);
        }
        Ok(self.transactions.get(signature).map(|t| t.clone()))
    }

    async fn simulate_transaction(
        &self,
        _transaction: &VersionedTransaction,
    ) -> EngineResult<SimulationOutcome> {
        self.enter(LedgerMethod::SimulateTransaction)?;
        Ok(self.simulation.lock().clone())
    }

    async fn send_transaction(
        &self,
        transaction: &VersionedTransaction,
        _skip_preflight: bool,
    ) -> EngineResult<Signature> {
        self.enter(LedgerMethod::SendTransaction)?;
        let signature = transaction
            .signatures
            .first()
            .copied()
            .ok_or_else(|| EngineError::Rpc("transaction has no signatures".into()))?;
        let slot = self.slot.fetch_add(1, Ordering::SeqCst) + 1;

        self.sent.lock().push(transaction.clone());
        self.transactions.insert(
            signature,
            FetchedTransaction {
                slot,
                transaction: transaction.clone(),
                meta: Some(self.execution_meta.lock().clone()),
            },
        );
        self.statuses.entry(signature).or_insert(SignatureStatus {
            slot,
            err: None,
            confirmed: true,
        });
        Ok(signature)
    }

    async fn get_signature_statuses(
        &self,
        signatures: &[Signature],
    ) -> EngineResult<Vec<Option<SignatureStatus>>> {
        self.enter(LedgerMethod::GetSignatureStatuses)?;
        Ok(signatures
            .iter()
            .map(|s| self.statuses.get(s).map(|status| status.clone()))
            .collect())
    }

    async fn get_epoch_info(&self) -> EngineResult<EpochInfo> {
        self.enter(LedgerMethod::GetEpochInfo)?;
        let slot = self.slot.load(Ordering::SeqCst);
        Ok(EpochInfo {
            epoch: slot / 432_000,
            slot_index: slot % 432_000,
            slots_in_epoch: 432_000,
            absolute_slot: slot,
            block_height: self.block_height.load(Ordering::SeqCst),
            transaction_count: Some(self.sent.lock().len() as u64),
        })
    }

    async fn get_slot(&self) -> EngineResult<u64> {
        self.enter(LedgerMethod::GetSlot)?;
        Ok(self.slot.load(Ordering::SeqCst))
    }

    async fn request_airdrop(&self, address: &Pubkey, lamports: u64) -> EngineResult<Signature> {
        self.enter(LedgerMethod::RequestAirdrop)?;
        self.accounts
            .entry(*address)
            .or_insert_with(|| Account::new(0, 0, &system_program::id()))
            .lamports += lamports;
        Ok(Signature::new_unique())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_failure_is_consumed_once() {
        let ledger = InMemoryLedger::new();
        ledger.fail_next(LedgerMethod::GetSlot, EngineError::Transport("x".into()));
        assert!(ledger.get_slot().await.is_err());
        assert!(ledger.get_slot().await.is_ok());
        assert_eq!(ledger.calls(LedgerMethod::GetSlot), 2);
    }

    #[tokio::test]
    async fn test_airdrop_credits_account() {
        let ledger = InMemoryLedger::new();
        let address = Pubkey::new_unique();
        ledger.request_airdrop(&address, 10).await.unwrap();
        ledger.request_airdrop(&address, 5).await.unwrap();
        assert_eq!(ledger.account(&address).unwrap().lamports, 15);
    }

    #[tokio::test]
    async fn test_hidden_transaction_polls() {
        let ledger = InMemoryLedger::new();
        let signature = Signature::new_unique();
        ledger.insert_transaction(
            signature,
            FetchedTransaction {
                slot: 3,
                transaction: VersionedTransaction::default(),
                meta: None,
            },
        );
        ledger.hide_transactions_for(1);
        assert!(ledger.get_transaction(&signature).await.unwrap().is_none());
        assert!(ledger.get_transaction(&signature).await.unwrap().is_some());
    }
}
