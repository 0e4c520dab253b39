//! Compatibility layer for Solana SDK message types
//!
//! Legacy and V0 messages expose the same information through different
//! APIs. This module gives one interface over both, and adds the pieces the
//! engine needs on top:
//! - header, static keys and required signers for either version
//! - lookup-table resolution and full message decompilation
//! - wire encoding (bincode bytes, base64 for transport) and its inverse
//!
//! ## Usage
//!
//! ```rust,no_run
//! use solana_sdk::transaction::VersionedTransaction;
//! use ledger_context_engine::compat;
//!
//! fn first_signer(tx: &VersionedTransaction) -> Option<solana_sdk::pubkey::Pubkey> {
//!     compat::get_required_signers(&tx.message).first().copied()
//! }
//! ```

use crate::errors::{EngineError, EngineResult};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use solana_sdk::{
    address_lookup_table::AddressLookupTableAccount,
    hash::Hash,
    instruction::{AccountMeta, Instruction},
    message::{v0::LoadedAddresses, MessageHeader, VersionedMessage},
    pubkey::Pubkey,
    transaction::VersionedTransaction,
};

/// Get the message header from a `VersionedMessage`.
#[inline]
#[must_use]
pub fn get_message_header(message: &VersionedMessage) -> &MessageHeader {
    match message {
        VersionedMessage::Legacy(legacy_msg) => &legacy_msg.header,
        VersionedMessage::V0(v0_msg) => &v0_msg.header,
    }
}

/// Get the static account keys from a `VersionedMessage`.
///
/// For V0 messages this excludes addresses loaded from lookup tables.
#[inline]
#[must_use]
pub fn get_static_account_keys(message: &VersionedMessage) -> &[Pubkey] {
    match message {
        VersionedMessage::Legacy(legacy_msg) => &legacy_msg.account_keys,
        VersionedMessage::V0(v0_msg) => &v0_msg.account_keys,
    }
}

/// Get the required signers from a `VersionedMessage`.
///
/// Required signers are always the first `header.num_required_signatures`
/// static account keys.
#[inline]
#[must_use]
pub fn get_required_signers(message: &VersionedMessage) -> &[Pubkey] {
    let header = get_message_header(message);
    let account_keys = get_static_account_keys(message);
    let num_signers = header.num_required_signatures as usize;
    &account_keys[..num_signers.min(account_keys.len())]
}

#[inline]
#[must_use]
pub fn get_recent_blockhash(message: &VersionedMessage) -> &Hash {
    match message {
        VersionedMessage::Legacy(legacy_msg) => &legacy_msg.recent_blockhash,
        VersionedMessage::V0(v0_msg) => &v0_msg.recent_blockhash,
    }
}

/// Resolve a V0 message's table lookups against fetched tables.
///
/// Legacy messages load nothing. Every referenced table must be present.
pub fn resolve_loaded_addresses(
    message: &VersionedMessage,
    tables: &[AddressLookupTableAccount],
) -> EngineResult<LoadedAddresses> {
    let VersionedMessage::V0(v0_msg) = message else {
        return Ok(LoadedAddresses::default());
    };

    let mut loaded = LoadedAddresses::default();
    for lookup in &v0_msg.address_table_lookups {
        let table = tables
            .iter()
            .find(|t| t.key == lookup.account_key)
            .ok_or_else(|| {
                EngineError::decode(
                    "message",
                    format!("lookup table {} not available", lookup.account_key),
                )
            })?;
        let pick = |index: &u8| {
            table.addresses.get(*index as usize).copied().ok_or_else(|| {
                EngineError::decode(
                    "message",
                    format!("index {index} out of range for table {}", table.key),
                )
            })
        };
        for index in &lookup.writable_indexes {
            loaded.writable.push(pick(index)?);
        }
        for index in &lookup.readonly_indexes {
            loaded.readonly.push(pick(index)?);
        }
    }
    Ok(loaded)
}

/// Static keys followed by loaded writable then loaded readonly keys.
pub fn full_account_keys(message: &VersionedMessage, loaded: &LoadedAddresses) -> Vec<Pubkey> {
    let mut keys = get_static_account_keys(message).to_vec();
    keys.extend_from_slice(&loaded.writable);
    keys.extend_from_slice(&loaded.readonly);
    keys
}

fn is_writable_index(
    header: &MessageHeader,
    static_len: usize,
    loaded: &LoadedAddresses,
    index: usize,
) -> bool {
    let num_signed = header.num_required_signatures as usize;
    if index < static_len {
        if index < num_signed {
            index < num_signed.saturating_sub(header.num_readonly_signed_accounts as usize)
        } else {
            index < static_len.saturating_sub(header.num_readonly_unsigned_accounts as usize)
        }
    } else {
        index - static_len < loaded.writable.len()
    }
}

/// Rebuild full instructions from a compiled message.
///
/// Signer/writable flags come from the header layout, so the result is
/// equivalent to (not necessarily identical to) the instructions originally
/// compiled: account metas of a key shared by several instructions carry
/// the merged flags.
pub fn decompile_message(
    message: &VersionedMessage,
    loaded: &LoadedAddresses,
) -> EngineResult<Vec<Instruction>> {
    let header = get_message_header(message);
    let static_len = get_static_account_keys(message).len();
    let keys = full_account_keys(message, loaded);
    let key_at = |index: u8| {
        keys.get(index as usize).copied().ok_or_else(|| {
            EngineError::decode("message", format!("account index {index} out of range"))
        })
    };

    message
        .instructions()
        .iter()
        .map(|compiled| {
            let program_id = key_at(compiled.program_id_index)?;
            let accounts = compiled
                .accounts
                .iter()
                .map(|&index| {
                    let pubkey = key_at(index)?;
                    let i = index as usize;
                    Ok(AccountMeta {
                        pubkey,
                        is_signer: i < header.num_required_signatures as usize,
                        is_writable: is_writable_index(header, static_len, loaded, i),
                    })
                })
                .collect::<EngineResult<Vec<_>>>()?;
            Ok(Instruction {
                program_id,
                accounts,
                data: compiled.data.clone(),
            })
        })
        .collect()
}

/// Bincode wire bytes of a transaction.
pub fn encode_wire_transaction(transaction: &VersionedTransaction) -> EngineResult<Vec<u8>> {
    bincode::serialize(transaction).map_err(|e| EngineError::internal(format!("serialize: {e}")))
}

pub fn to_base64(wire: &[u8]) -> String {
    BASE64.encode(wire)
}

/// Accepts raw wire bytes or their base64 text.
pub fn decode_wire_transaction(bytes: &[u8]) -> EngineResult<VersionedTransaction> {
    if let Ok(transaction) = bincode::deserialize::<VersionedTransaction>(bytes) {
        return Ok(transaction);
    }
    let raw = BASE64
        .decode(bytes)
        .map_err(|e| EngineError::decode("wire transaction", e))?;
    bincode::deserialize(&raw).map_err(|e| EngineError::decode("wire transaction", e))
}
