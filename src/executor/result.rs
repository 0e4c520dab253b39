//! Execution outcome record.

use super::events::{DecodedEvents, UnknownEvent};
use crate::errors::{EngineError, EngineResult, Reported};
use crate::runtime::FetchedMeta;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use solana_sdk::{instruction::Instruction, signature::Signature};
use std::sync::Arc;

/// A follow-up execution produced by a chaining callback.
pub trait ResumableStep: Send + Sync {
    fn label(&self) -> &str;

    fn resume(&self) -> BoxFuture<'static, Result<TransactionResult, Reported>>;
}

/// Immutable outcome of one execution.
#[derive(Clone)]
pub struct TransactionResult {
    pub signature: Signature,
    pub slot: u64,
    pub succeeded: bool,
    pub meta: FetchedMeta,
    /// Decompiled top-level instructions, lookup tables resolved.
    pub instructions: Vec<Instruction>,
    pub events: DecodedEvents,
    pub next: Option<Arc<dyn ResumableStep>>,
}

impl std::fmt::Debug for TransactionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionResult")
            .field("signature", &self.signature)
            .field("slot", &self.slot)
            .field("succeeded", &self.succeeded)
            .field("meta", &self.meta)
            .field("instructions", &self.instructions.len())
            .field("events", &self.events)
            .field("next", &self.next.as_ref().map(|s| s.label().to_string()))
            .finish()
    }
}

impl TransactionResult {
    pub fn logs(&self) -> &[String] {
        &self.meta.log_messages
    }

    pub fn compute_units_consumed(&self) -> Option<u64> {
        self.meta.compute_units_consumed
    }

    pub fn fee(&self) -> u64 {
        self.meta.fee
    }

    pub fn events_named(&self, name: &str) -> &[Value] {
        self.events
            .named
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// First event called `name`, deserialized into `T`.
    pub fn event<T: DeserializeOwned>(&self, name: &str) -> Option<EngineResult<T>> {
        self.events_named(name).first().map(|value| {
            serde_json::from_value(value.clone()).map_err(|e| EngineError::decode(name, e))
        })
    }

    pub fn unknown_events(&self) -> &[UnknownEvent] {
        &self.events.unknown
    }

    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }
}
