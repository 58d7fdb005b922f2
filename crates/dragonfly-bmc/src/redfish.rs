//! Redfish response interpretation
//!
//! A Redfish `ComputerSystem` resource reports its power state in the
//! `PowerState` property. This module turns a raw response body into a
//! [`PowerState`], or classifies why it could not.

use serde_json::Value;
use thiserror::Error;

use crate::types::PowerState;

/// Property holding the power state in a `ComputerSystem` resource
pub const POWER_STATE_FIELD: &str = "PowerState";

/// Why a response body did not yield a power state
///
/// The display strings are the result words reported to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterpretError {
    /// No bytes were received
    #[error("no output error")]
    EmptyResponse,

    /// Body is not valid JSON
    #[error("parse error")]
    MalformedPayload(String),

    /// Body is valid JSON but has no `PowerState`
    #[error("no powerstate")]
    MissingField,
}

/// Interpret a status response body
///
/// Matching of the `PowerState` value is case-insensitive; any other
/// value (including non-strings) is [`PowerState::Unknown`].
pub fn interpret(body: &[u8]) -> Result<PowerState, InterpretError> {
    if body.is_empty() {
        return Err(InterpretError::EmptyResponse);
    }

    let value: Value = serde_json::from_slice(body)
        .map_err(|e| InterpretError::MalformedPayload(e.to_string()))?;

    let state = value
        .get(POWER_STATE_FIELD)
        .ok_or(InterpretError::MissingField)?;

    Ok(match state.as_str() {
        Some(s) if s.eq_ignore_ascii_case("on") => PowerState::On,
        Some(s) if s.eq_ignore_ascii_case("off") => PowerState::Off,
        _ => PowerState::Unknown,
    })
}
