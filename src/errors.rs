//! Error types for the context graph and transaction engine
//!
//! A single taxonomy covers account resolution, RPC access, blueprint
//! assembly, signing, execution and result decoding. Errors are:
//! - Cloneable: they flow through shared (deduplicated) futures
//! - Classifiable: `is_retryable()`, `category()` and the narrow
//!   `is_stale_ledger_view()` predicate used by `execute`
//! - Observable: `Reported` carries an explicit "already reported" flag

use once_cell::sync::Lazy;
use regex::Regex;
use solana_client::client_error::ClientError;
use solana_rpc_client_api::client_error::ErrorKind as ClientErrorKind;
use solana_rpc_client_api::request::{RpcError, RpcResponseErrorData};
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

/// Messages that indicate the client saw a stale view of the ledger.
///
/// Only these are retried by `TransactionExecutor::execute`; every match is a
/// case where the ledger's blockhash/nonce replay protection guarantees that a
/// resubmission cannot apply the same transaction twice.
static STALE_LEDGER_VIEW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(network has progressed|blockhash ?not ?found|already ?(been )?processed)")
        .expect("static regex")
});

static NONCE_INVALID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(nonce (is )?(invalid|advanced)|invalid nonce|nonce has been advanced)")
        .expect("static regex")
});

/// Comprehensive error type for all engine operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The configured address resolver failed
    #[error("Address resolution failed for {context}: {reason}")]
    AddressUnresolved { context: String, reason: String },

    /// An account required by an operation does not exist on the ledger
    #[error("Account not found: {0}")]
    AccountAbsent(Pubkey),

    /// An external codec rejected the payload
    #[error("Decode error ({what}): {reason}")]
    Decode { what: String, reason: String },

    /// Serialization was requested without `allow_partial` and some
    /// required signers did not sign
    #[error("Missing signatures for: {}", format_addresses(.addresses))]
    MissingSignatures { addresses: Vec<Pubkey> },

    /// Dry-run rejected the transaction
    #[error("Simulation failed: {message}")]
    SimulationFailed { message: String, logs: Vec<String> },

    /// Transient error caused by a stale view of the ledger
    #[error("Stale ledger view: {0}")]
    StaleLedgerView(String),

    /// Durable nonce was advanced before the transaction landed
    #[error("Nonce invalid: {0}")]
    NonceInvalid(String),

    /// RPC server returned an error response
    #[error("RPC error: {0}")]
    Rpc(String),

    /// Transport-level failure (HTTP, connection, timeout)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The owning RuntimeAccess cancelled pending calls
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Caller supplied arguments failed validation
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Fee payer could not be resolved from any source
    #[error("failed to resolve fee payer")]
    FeePayerUnresolved,

    /// Durable nonce account could not be fetched or decoded
    #[error("failed to resolve nonce account: {0}")]
    NonceAccountUnresolved(String),

    /// Recent blockhash could not be fetched
    #[error("failed to resolve recent blockhash: {0}")]
    BlockhashUnresolved(String),

    /// Failed to compile the message or sign the transaction
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Off-chain metadata loader failure
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

fn format_addresses(addresses: &[Pubkey]) -> String {
    addresses
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Check if this error is potentially retryable by a generic caller.
    ///
    /// `execute` uses the narrower `is_stale_ledger_view` instead.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::StaleLedgerView(_) => true,
            Self::Transport(_) => true,
            Self::BlockhashUnresolved(_) => true,
            Self::Rpc(msg) => STALE_LEDGER_VIEW.is_match(msg),

            Self::AddressUnresolved { .. }
            | Self::AccountAbsent(_)
            | Self::Decode { .. }
            | Self::MissingSignatures { .. }
            | Self::SimulationFailed { .. }
            | Self::NonceInvalid(_)
            | Self::Cancelled
            | Self::Configuration(_)
            | Self::InvalidArguments(_)
            | Self::FeePayerUnresolved
            | Self::NonceAccountUnresolved(_)
            | Self::Signing(_)
            | Self::Metadata(_)
            | Self::Internal(_) => false,
        }
    }

    /// Whether the error text matches the stale-ledger-view pattern.
    pub fn is_stale_ledger_view(&self) -> bool {
        match self {
            Self::StaleLedgerView(_) => true,
            Self::Rpc(msg) | Self::Transport(msg) => STALE_LEDGER_VIEW.is_match(msg),
            Self::SimulationFailed { message, .. } => STALE_LEDGER_VIEW.is_match(message),
            _ => false,
        }
    }

    /// Whether the error reports an advanced/invalid durable nonce.
    pub fn is_nonce_invalid(&self) -> bool {
        match self {
            Self::NonceInvalid(_) => true,
            Self::Rpc(msg) | Self::Transport(msg) => NONCE_INVALID.is_match(msg),
            Self::SimulationFailed { message, .. } => NONCE_INVALID.is_match(message),
            _ => false,
        }
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            Self::AddressUnresolved { .. } => "address",
            Self::AccountAbsent(_) => "account",
            Self::Decode { .. } => "decode",
            Self::MissingSignatures { .. } | Self::Signing(_) => "signing",
            Self::SimulationFailed { .. } => "simulation",
            Self::StaleLedgerView(_) => "stale",
            Self::NonceInvalid(_) | Self::NonceAccountUnresolved(_) => "nonce",
            Self::Rpc(_) => "rpc",
            Self::Transport(_) => "transport",
            Self::Cancelled => "cancelled",
            Self::Configuration(_) => "config",
            Self::InvalidArguments(_) => "arguments",
            Self::FeePayerUnresolved | Self::BlockhashUnresolved(_) => "blueprint",
            Self::Metadata(_) => "metadata",
            Self::Internal(_) => "internal",
        }
    }

    pub fn decode(what: impl Into<String>, reason: impl ToString) -> Self {
        Self::Decode {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal(reason.into())
    }

    /// Classify a solana-client error.
    ///
    /// Preflight failures keep their simulation logs; everything else is
    /// classified by its message.
    pub fn from_client_error(err: ClientError) -> Self {
        let msg = err.to_string();
        if let ClientErrorKind::RpcError(RpcError::RpcResponseError {
            data: RpcResponseErrorData::SendTransactionPreflightFailure(result),
            ..
        }) = err.kind()
        {
            return Self::SimulationFailed {
                message: msg,
                logs: result.logs.clone().unwrap_or_default(),
            };
        }
        if STALE_LEDGER_VIEW.is_match(&msg) {
            Self::StaleLedgerView(msg)
        } else if NONCE_INVALID.is_match(&msg) {
            Self::NonceInvalid(msg)
        } else if err.get_transaction_error().is_some() || msg.contains("RPC response error") {
            Self::Rpc(msg)
        } else {
            Self::Transport(msg)
        }
    }
}

impl From<ClientError> for EngineError {
    fn from(err: ClientError) -> Self {
        Self::from_client_error(err)
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// An error that already went through the hook chain (or not).
///
/// Calling code can check `already_reported` to avoid reporting the same
/// failure twice.
#[derive(Error, Debug, Clone)]
#[error("{error}")]
pub struct Reported {
    #[source]
    pub error: EngineError,
    pub already_reported: bool,
}

impl Reported {
    pub fn unreported(error: EngineError) -> Self {
        Self {
            error,
            already_reported: false,
        }
    }

    pub fn reported(error: EngineError) -> Self {
        Self {
            error,
            already_reported: true,
        }
    }
}

impl From<EngineError> for Reported {
    fn from(error: EngineError) -> Self {
        Self::unreported(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::BlockhashUnresolved("timeout".to_string());
        assert_eq!(err.to_string(), "failed to resolve recent blockhash: timeout");

        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        let err = EngineError::MissingSignatures {
            addresses: vec![a, b],
        };
        assert_eq!(err.to_string(), format!("Missing signatures for: {}, {}", a, b));
    }

    #[test]
    fn test_stale_ledger_view_predicate() {
        assert!(EngineError::Rpc("Blockhash not found".into()).is_stale_ledger_view());
        assert!(EngineError::Rpc(
            "Transaction simulation failed: This transaction has already been processed".into()
        )
        .is_stale_ledger_view());
        assert!(EngineError::Transport("the network has progressed".into()).is_stale_ledger_view());
        assert!(EngineError::StaleLedgerView("x".into()).is_stale_ledger_view());

        assert!(!EngineError::Rpc("insufficient funds for rent".into()).is_stale_ledger_view());
        assert!(!EngineError::Transport("connection reset".into()).is_stale_ledger_view());
        assert!(!EngineError::Signing("blockhash not found".into()).is_stale_ledger_view());
    }

    fn preflight_failure(message: &str, logs: &[&str]) -> ClientError {
        let result = serde_json::from_value(serde_json::json!({
            "err": null,
            "logs": logs,
            "accounts": null,
            "unitsConsumed": 1_200,
            "returnData": null
        }))
        .unwrap();
        ClientError::from(ClientErrorKind::RpcError(RpcError::RpcResponseError {
            code: -32002,
            message: message.to_string(),
            data: RpcResponseErrorData::SendTransactionPreflightFailure(result),
        }))
    }

    #[test]
    fn test_preflight_failure_keeps_logs() {
        let err = EngineError::from(preflight_failure(
            "Transaction simulation failed: Error processing Instruction 0: custom program error: 0x1771",
            &["Program log: insufficient shares"],
        ));
        match &err {
            EngineError::SimulationFailed { message, logs } => {
                assert!(message.contains("0x1771"));
                assert_eq!(logs, &vec!["Program log: insufficient shares".to_string()]);
            }
            other => panic!("expected simulation failure, got {other:?}"),
        }
        assert!(!err.is_stale_ledger_view());

        let stale = EngineError::from(preflight_failure(
            "Transaction simulation failed: Blockhash not found",
            &[],
        ));
        assert!(matches!(stale, EngineError::SimulationFailed { .. }));
        assert!(stale.is_stale_ledger_view());
    }

    #[test]
    fn test_nonce_invalid_predicate() {
        assert!(EngineError::Rpc("Transaction nonce is invalid".into()).is_nonce_invalid());
        assert!(EngineError::NonceInvalid("x".into()).is_nonce_invalid());
        assert!(!EngineError::Rpc("blockhash not found".into()).is_nonce_invalid());
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(EngineError::FeePayerUnresolved.category(), "blueprint");
        assert_eq!(EngineError::Cancelled.category(), "cancelled");
        assert_eq!(
            EngineError::NonceAccountUnresolved("x".into()).category(),
            "nonce"
        );
    }

    #[test]
    fn test_reported_wrapper() {
        let reported = Reported::reported(EngineError::Rpc("boom".into()));
        assert!(reported.already_reported);
        assert_eq!(reported.to_string(), "RPC error: boom");

        let fresh: Reported = EngineError::Cancelled.into();
        assert!(!fresh.already_reported);
    }
}
