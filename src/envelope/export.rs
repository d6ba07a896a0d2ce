//! Envelope export to the flat state dict.
//!
//! The state dict is the persistence/wire contract: one flat JSON object with
//! every envelope field present, timestamps in the fixed RFC 3339 form.

use serde_json::{Map, Value};

use super::Envelope;
use crate::types::{Error, Result};

/// Flat key → value mapping produced by [`to_state_dict`].
pub type StateDict = Map<String, Value>;

/// Export envelope to a state dict.
pub fn to_state_dict(envelope: &Envelope) -> Result<StateDict> {
    match serde_json::to_value(envelope)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::internal(format!(
            "envelope serialized to non-object value: {}",
            other
        ))),
    }
}

/// Export envelope to JSON bytes.
pub fn to_json(envelope: &Envelope) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&to_state_dict(envelope)?)?)
}
