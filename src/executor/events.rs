//! Program event decoding
//!
//! Programs emit events through a self-invocation signed by a per-program
//! "event authority" PDA. The inner instruction data is:
//!
//! ```text
//! [EVENT_IX_TAG: 8 bytes][event discriminator: 8 bytes][payload]
//! ```
//!
//! where the event discriminator is `sha256("event:<Name>")[..8]`.

use crate::errors::{EngineError, EngineResult};
use crate::runtime::InnerInstructionSet;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use solana_sdk::pubkey::Pubkey;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::trace;

/// Instruction-level prefix of every event self-invocation.
pub const EVENT_IX_TAG: [u8; 8] = [0xe4, 0x45, 0xa5, 0x2e, 0x51, 0xcb, 0x9a, 0x1d];

pub const EVENT_AUTHORITY_SEED: &[u8] = b"__event_authority";

pub fn event_discriminator(name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("event:{name}").as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

pub fn event_authority(program_id: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(&[EVENT_AUTHORITY_SEED], program_id).0
}

/// Decoder for one named event type.
pub trait EventDecoder: Send + Sync {
    fn name(&self) -> &str;

    fn discriminator(&self) -> [u8; 8] {
        event_discriminator(self.name())
    }

    /// Decode the payload that follows the event discriminator.
    fn decode(&self, payload: &[u8]) -> EngineResult<Value>;
}

/// Decodes fixed-layout little-endian payloads into `T` with bincode.
pub struct BincodeEvent<T> {
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> BincodeEvent<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _marker: PhantomData,
        }
    }

    pub fn shared(name: impl Into<String>) -> Arc<dyn EventDecoder>
    where
        T: DeserializeOwned + Serialize + 'static,
    {
        Arc::new(Self::new(name))
    }
}

impl<T: DeserializeOwned + Serialize> EventDecoder for BincodeEvent<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn decode(&self, payload: &[u8]) -> EngineResult<Value> {
        let event: T =
            bincode::deserialize(payload).map_err(|e| EngineError::decode(&self.name, e))?;
        serde_json::to_value(event).map_err(|e| EngineError::decode(&self.name, e))
    }
}

/// Event payload no decoder accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEvent {
    pub discriminator: Option<[u8; 8]>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedEvents {
    pub named: BTreeMap<String, Vec<Value>>,
    pub unknown: Vec<UnknownEvent>,
}

/// Scan inner instructions for events of `program_id`.
///
/// Only instructions invoked by the program whose account list includes the
/// event authority are considered. Unmatched discriminators and payloads a
/// decoder rejects land in `unknown`.
pub fn decode_events(
    program_id: &Pubkey,
    account_keys: &[Pubkey],
    inner: &[InnerInstructionSet],
    decoders: &[Arc<dyn EventDecoder>],
) -> DecodedEvents {
    let mut events = DecodedEvents::default();
    if decoders.is_empty() {
        return events;
    }

    let authority = event_authority(program_id);
    let (Some(program_index), Some(authority_index)) = (
        account_keys.iter().position(|k| k == program_id),
        account_keys.iter().position(|k| *k == authority),
    ) else {
        return events;
    };

    for ix in inner.iter().flat_map(|set| &set.instructions) {
        if ix.program_id_index as usize != program_index
            || !ix.accounts.iter().any(|&a| a as usize == authority_index)
        {
            continue;
        }
        let Some(body) = ix.data.strip_prefix(&EVENT_IX_TAG[..]) else {
            continue;
        };
        if body.len() < 8 {
            events.unknown.push(UnknownEvent {
                discriminator: None,
                data: body.to_vec(),
            });
            continue;
        }

        let (disc, payload) = body.split_at(8);
        let mut discriminator = [0u8; 8];
        discriminator.copy_from_slice(disc);

        let decoded = decoders
            .iter()
            .find(|d| d.discriminator() == discriminator)
            .and_then(|decoder| match decoder.decode(payload) {
                Ok(value) => Some((decoder.name().to_string(), value)),
                Err(err) => {
                    trace!(event = decoder.name(), error = %err, "event decode failed");
                    None
                }
            });
        match decoded {
            Some((name, value)) => events.named.entry(name).or_default().push(value),
            None => events.unknown.push(UnknownEvent {
                discriminator: Some(discriminator),
                data: payload.to_vec(),
            }),
        }
    }
    events
}

/// Inner instruction data for `event` as the program would emit it.
pub fn encode_event_instruction_data<T: Serialize>(name: &str, event: &T) -> EngineResult<Vec<u8>> {
    let mut data = EVENT_IX_TAG.to_vec();
    data.extend_from_slice(&event_discriminator(name));
    data.extend(
        bincode::serialize(event).map_err(|e| EngineError::internal(format!("encode event: {e}")))?,
    );
    Ok(data)
}
