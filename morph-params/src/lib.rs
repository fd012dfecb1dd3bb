//! morph-params: bounded facial morph parameters and the cumulative state they fold into.
//!
//! Design rules:
//! - Every stored value is clamped to the active regime's bounds.
//! - Which names are valid, and what "neutral" means, is data (a `Regime`), not code.
//! - AI output never writes state directly; it goes through `ParameterStateStore::commit`.
//! - Maps are ordered, so iteration and serialisation are deterministic.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Values closer than this to neutral count as neutral.
pub const NEUTRAL_EPSILON: f32 = 1e-4;

/// Inclusive value range of a regime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f32,
    pub max: f32,
}

impl Bounds {
    pub fn new(min: f32, max: f32) -> Result<Self, ParamError> {
        let bounds = Self { min, max };
        bounds.validate()?;
        Ok(bounds)
    }

    pub fn validate(&self) -> Result<(), ParamError> {
        if !(self.min.is_finite() && self.max.is_finite() && self.min < self.max) {
            return Err(ParamError::InvalidBounds {
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }

    pub fn clamp(&self, value: f32) -> f32 {
        if value < self.min {
            self.min
        } else if value > self.max {
            self.max
        } else {
            value
        }
    }

    /// Clamp a wide value before narrowing it, so huge model outputs saturate instead of
    /// overflowing to infinity.
    pub fn clamp_f64(&self, value: f64) -> f32 {
        value.max(self.min as f64).min(self.max as f64) as f32
    }

    pub fn contains(&self, value: f32) -> bool {
        (self.min..=self.max).contains(&value)
    }

    pub fn span(&self) -> f32 {
        self.max - self.min
    }
}

/// The set of parameter names a loaded face asset understands.
///
/// Keeps declaration order (prompts list candidates in that order) and resolves
/// lookups exactly first, then case-insensitively. When two valid names fold to the
/// same lowercase form, a case-insensitive hit resolves to the earliest declared one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Whitelist {
    names: Vec<String>,
    exact: HashMap<String, usize>,
    folded: HashMap<String, usize>,
}

impl Whitelist {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list = Self::default();
        for name in names {
            let name = name.into();
            let name = name.trim();
            if name.is_empty() || list.exact.contains_key(name) {
                continue;
            }
            let index = list.names.len();
            list.exact.insert(name.to_string(), index);
            list.folded.entry(name.to_lowercase()).or_insert(index);
            list.names.push(name.to_string());
        }
        list
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Map a raw key onto its canonical valid name.
    pub fn resolve(&self, key: &str) -> Option<&str> {
        let key = key.trim();
        let index = self
            .exact
            .get(key)
            .or_else(|| self.folded.get(&key.to_lowercase()))?;
        Some(self.names[*index].as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.resolve(key).is_some()
    }
}

impl From<Vec<String>> for Whitelist {
    fn from(names: Vec<String>) -> Self {
        Whitelist::new(names)
    }
}

impl From<Whitelist> for Vec<String> {
    fn from(list: Whitelist) -> Self {
        list.names
    }
}

/// An immutable name -> weight map whose values were clamped on construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ParameterMap(BTreeMap<String, f32>);

impl ParameterMap {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a map from pairs in source order; later duplicates win.
    /// Non-finite values are dropped, everything else is clamped to `bounds`.
    pub fn bounded<I, K>(pairs: I, bounds: Bounds) -> Self
    where
        I: IntoIterator<Item = (K, f32)>,
        K: Into<String>,
    {
        let mut values = BTreeMap::new();
        for (name, value) in pairs {
            let name = name.into();
            if !value.is_finite() {
                tracing::warn!(name = %name, "dropping non-finite parameter value");
                continue;
            }
            values.insert(name, bounds.clamp(value));
        }
        Self(values)
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.0.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> + '_ {
        self.0.iter().map(|(name, value)| (name.as_str(), *value))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.0.keys().map(String::as_str)
    }

    pub fn as_map(&self) -> &BTreeMap<String, f32> {
        &self.0
    }

    pub fn into_inner(self) -> BTreeMap<String, f32> {
        self.0
    }

    /// Same key set and every value within `tolerance`.
    pub fn approx_eq(&self, other: &ParameterMap, tolerance: f32) -> bool {
        self.len() == other.len()
            && self.iter().all(|(name, value)| {
                other
                    .get(name)
                    .is_some_and(|theirs| (theirs - value).abs() <= tolerance)
            })
    }

    pub(crate) fn from_clamped(values: BTreeMap<String, f32>) -> Self {
        Self(values)
    }
}

/// Errors related to parameter schema and validation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamError {
    #[error("invalid bounds: min={min} max={max}")]
    InvalidBounds { min: f32, max: f32 },

    #[error("neutral value {neutral} lies outside [{min}, {max}]")]
    NeutralOutOfBounds { neutral: f32, min: f32, max: f32 },

    #[error("unknown face region: {0}")]
    UnknownRegion(String),
}

pub mod regime;
pub mod region;
pub mod session;
pub mod state;
pub mod wire;

pub use regime::{Regime, SLIDER_NAMES};
pub use region::FaceRegion;
pub use session::{IntentEntry, MorphSession, SessionError};
pub use state::ParameterStateStore;
pub use wire::{decode_state, encode_state, WireError};
