//! Consumed ledger RPC surface
//!
//! `LedgerRpc` is the only seam through which the engine talks to the
//! network. `SolanaRpc` implements it over the nonblocking solana-client
//! with base64 encodings throughout.

use super::types::{
    FetchedMeta, FetchedTransaction, InnerInstructionSet, LatestBlockhash, SignatureStatus,
    SimulationOutcome,
};
use crate::errors::{EngineError, EngineResult};
use async_trait::async_trait;
use serde_json::json;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_rpc_client_api::{
    config::{RpcSendTransactionConfig, RpcSimulateTransactionConfig, RpcTransactionConfig},
    request::RpcRequest,
};
use solana_sdk::{
    account::Account,
    commitment_config::CommitmentConfig,
    epoch_info::EpochInfo,
    instruction::CompiledInstruction,
    message::v0::LoadedAddresses,
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};
use solana_transaction_status::{
    option_serializer::OptionSerializer, EncodedConfirmedTransactionWithStatusMeta, UiInstruction,
    UiTransactionEncoding, UiTransactionStatusMeta,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, instrument};

/// Ledger JSON-RPC operations used by the engine.
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    async fn get_account(&self, address: &Pubkey) -> EngineResult<Option<Account>>;

    async fn get_multiple_accounts(
        &self,
        addresses: &[Pubkey],
    ) -> EngineResult<Vec<Option<Account>>>;

    async fn get_latest_blockhash(&self) -> EngineResult<LatestBlockhash>;

    async fn get_block_height(&self) -> EngineResult<u64>;

    /// `Ok(None)` when the ledger does not (yet) know the signature.
    async fn get_transaction(
        &self,
        signature: &Signature,
    ) -> EngineResult<Option<FetchedTransaction>>;

    async fn simulate_transaction(
        &self,
        transaction: &VersionedTransaction,
    ) -> EngineResult<SimulationOutcome>;

    async fn send_transaction(
        &self,
        transaction: &VersionedTransaction,
        skip_preflight: bool,
    ) -> EngineResult<Signature>;

    async fn get_signature_statuses(
        &self,
        signatures: &[Signature],
    ) -> EngineResult<Vec<Option<SignatureStatus>>>;

    async fn get_epoch_info(&self) -> EngineResult<EpochInfo>;

    async fn get_slot(&self) -> EngineResult<u64>;

    async fn request_airdrop(&self, address: &Pubkey, lamports: u64) -> EngineResult<Signature>;
}

/// `LedgerRpc` over a real JSON-RPC endpoint.
pub struct SolanaRpc {
    client: RpcClient,
    commitment: CommitmentConfig,
}

impl std::fmt::Debug for SolanaRpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolanaRpc")
            .field("url", &self.client.url())
            .field("commitment", &self.commitment)
            .finish()
    }
}

impl SolanaRpc {
    pub fn new(url: impl Into<String>, commitment: CommitmentConfig) -> Self {
        Self {
            client: RpcClient::new_with_commitment(url.into(), commitment),
            commitment,
        }
    }

    pub fn with_timeout(
        url: impl Into<String>,
        commitment: CommitmentConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            client: RpcClient::new_with_timeout_and_commitment(url.into(), timeout, commitment),
            commitment,
        }
    }
}

fn parse_loaded(keys: &[String]) -> EngineResult<Vec<Pubkey>> {
    keys.iter()
        .map(|key| {
            Pubkey::from_str(key).map_err(|e| EngineError::decode(format!("loaded address {key}"), e))
        })
        .collect()
}

/// Convert RPC meta. Every inner instruction and loaded address must
/// decode: dropping one would shift the account indices `parse` relies on.
fn convert_meta(meta: UiTransactionStatusMeta) -> EngineResult<FetchedMeta> {
    let log_messages = match meta.log_messages {
        OptionSerializer::Some(logs) => logs,
        _ => Vec::new(),
    };

    let inner_instructions = match meta.inner_instructions {
        OptionSerializer::Some(sets) => sets
            .into_iter()
            .map(|set| {
                let instructions = set
                    .instructions
                    .into_iter()
                    .map(|ix| match ix {
                        UiInstruction::Compiled(compiled) => {
                            let data = bs58::decode(&compiled.data).into_vec().map_err(|e| {
                                EngineError::decode(
                                    format!("inner instruction data (set {})", set.index),
                                    e,
                                )
                            })?;
                            Ok(CompiledInstruction {
                                program_id_index: compiled.program_id_index,
                                accounts: compiled.accounts,
                                data,
                            })
                        }
                        UiInstruction::Parsed(_) => Err(EngineError::decode(
                            "inner instruction",
                            "parsed instructions are not supported",
                        )),
                    })
                    .collect::<EngineResult<Vec<_>>>()?;
                Ok(InnerInstructionSet {
                    index: set.index,
                    instructions,
                })
            })
            .collect::<EngineResult<Vec<_>>>()?,
        _ => Vec::new(),
    };

    let loaded_addresses = match meta.loaded_addresses {
        OptionSerializer::Some(loaded) => Some(LoadedAddresses {
            writable: parse_loaded(&loaded.writable)?,
            readonly: parse_loaded(&loaded.readonly)?,
        }),
        _ => None,
    };

    let compute_units_consumed = match meta.compute_units_consumed {
        OptionSerializer::Some(units) => Some(units),
        _ => None,
    };

    Ok(FetchedMeta {
        err: meta.err.map(|e| format!("{e:?}")),
        fee: meta.fee,
        log_messages,
        compute_units_consumed,
        inner_instructions,
        loaded_addresses,
    })
}

fn convert_transaction(
    raw: EncodedConfirmedTransactionWithStatusMeta,
) -> EngineResult<FetchedTransaction> {
    let transaction = raw
        .transaction
        .transaction
        .decode()
        .ok_or_else(|| EngineError::decode("transaction", "unsupported transaction encoding"))?;
    Ok(FetchedTransaction {
        slot: raw.slot,
        transaction,
        meta: raw.transaction.meta.map(convert_meta).transpose()?,
    })
}

#[async_trait]
impl LedgerRpc for SolanaRpc {
    #[instrument(skip(self), level = "debug")]
    async fn get_account(&self, address: &Pubkey) -> EngineResult<Option<Account>> {
        Ok(self
            .client
            .get_account_with_commitment(address, self.commitment)
            .await?
            .value)
    }

    #[instrument(skip(self, addresses), fields(count = addresses.len()), level = "debug")]
    async fn get_multiple_accounts(
        &self,
        addresses: &[Pubkey],
    ) -> EngineResult<Vec<Option<Account>>> {
        Ok(self
            .client
            .get_multiple_accounts_with_commitment(addresses, self.commitment)
            .await?
            .value)
    }

    async fn get_latest_blockhash(&self) -> EngineResult<LatestBlockhash> {
        let (blockhash, last_valid_block_height) = self
            .client
            .get_latest_blockhash_with_commitment(self.commitment)
            .await?;
        Ok(LatestBlockhash {
            blockhash,
            last_valid_block_height,
        })
    }

    async fn get_block_height(&self) -> EngineResult<u64> {
        Ok(self
            .client
            .get_block_height_with_commitment(self.commitment)
            .await?)
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_transaction(
        &self,
        signature: &Signature,
    ) -> EngineResult<Option<FetchedTransaction>> {
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Base64),
            commitment: Some(self.commitment),
            max_supported_transaction_version: Some(0),
        };
        let raw: Option<EncodedConfirmedTransactionWithStatusMeta> = self
            .client
            .send(
                RpcRequest::GetTransaction,
                json!([signature.to_string(), config]),
            )
            .await?;
        raw.map(convert_transaction).transpose()
    }

    async fn simulate_transaction(
        &self,
        transaction: &VersionedTransaction,
    ) -> EngineResult<SimulationOutcome> {
        let config = RpcSimulateTransactionConfig {
            sig_verify: false,
            replace_recent_blockhash: false,
            commitment: Some(self.commitment),
            encoding: Some(UiTransactionEncoding::Base64),
            ..RpcSimulateTransactionConfig::default()
        };
        let result = self
            .client
            .simulate_transaction_with_config(transaction, config)
            .await?
            .value;
        Ok(SimulationOutcome {
            err: result.err.map(|e| format!("{e:?}")),
            logs: result.logs.unwrap_or_default(),
            units_consumed: result.units_consumed,
        })
    }

    async fn send_transaction(
        &self,
        transaction: &VersionedTransaction,
        skip_preflight: bool,
    ) -> EngineResult<Signature> {
        let config = RpcSendTransactionConfig {
            skip_preflight,
            preflight_commitment: Some(self.commitment.commitment),
            encoding: Some(UiTransactionEncoding::Base64),
            max_retries: None,
            min_context_slot: None,
        };
        let signature = self
            .client
            .send_transaction_with_config(transaction, config)
            .await?;
        debug!(%signature, skip_preflight, "transaction submitted");
        Ok(signature)
    }

    async fn get_signature_statuses(
        &self,
        signatures: &[Signature],
    ) -> EngineResult<Vec<Option<SignatureStatus>>> {
        let statuses = self.client.get_signature_statuses(signatures).await?.value;
        Ok(statuses
            .into_iter()
            .map(|status| {
                status.map(|s| SignatureStatus {
                    slot: s.slot,
                    confirmed: s.satisfies_commitment(self.commitment),
                    err: s.err.map(|e| e.to_string()),
                })
            })
            .collect())
    }

    async fn get_epoch_info(&self) -> EngineResult<EpochInfo> {
        Ok(self
            .client
            .get_epoch_info_with_commitment(self.commitment)
            .await?)
    }

    async fn get_slot(&self) -> EngineResult<u64> {
        Ok(self.client.get_slot_with_commitment(self.commitment).await?)
    }

    async fn request_airdrop(&self, address: &Pubkey, lamports: u64) -> EngineResult<Signature> {
        Ok(self.client.request_airdrop(address, lamports).await?)
    }
}
