//! Renderer wire format.
//!
//! The renderer receives a flat JSON object of non-neutral `{"name": weight}` pairs.
//! An all-neutral face serialises to `{}`.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::{ParameterMap, Regime};

/// Serialise the non-neutral part of `params` for the renderer.
pub fn encode_state(params: &ParameterMap, regime: &Regime) -> Result<String, WireError> {
    let compact: BTreeMap<&str, f32> = params
        .iter()
        .filter(|(_, value)| !regime.is_neutral(*value))
        .collect();
    let json = serde_json::to_string(&compact)?;
    tracing::trace!(entries = compact.len(), "encoded renderer payload");
    Ok(json)
}

/// Strictly decode a renderer payload (e.g. state echoed back by the view).
///
/// Unlike model output this must be well-formed: every value numeric and, once the
/// regime has a whitelist, every key known. Values are clamped.
pub fn decode_state(payload: &str, regime: &Regime) -> Result<ParameterMap, WireError> {
    let object: Map<String, Value> = serde_json::from_str(payload)?;
    let mut pairs = Vec::with_capacity(object.len());
    for (key, value) in object {
        let number = value
            .as_f64()
            .ok_or_else(|| WireError::NonNumeric { key: key.clone() })?;
        let name = match regime.whitelist() {
            Some(list) => list
                .resolve(&key)
                .ok_or_else(|| WireError::UnknownParameter { key: key.clone() })?
                .to_string(),
            None => key,
        };
        pairs.push((name, regime.bounds.clamp_f64(number)));
    }
    Ok(ParameterMap::bounded(pairs, regime.bounds))
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("payload is not a JSON object: {0}")]
    Json(#[from] serde_json::Error),

    #[error("value for '{key}' is not a number")]
    NonNumeric { key: String },

    #[error("unknown parameter '{key}'")]
    UnknownParameter { key: String },
}
