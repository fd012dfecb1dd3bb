//! Parameter regimes.
//!
//! A regime is the (valid names, neutral value, range) triple in effect for the loaded
//! face asset. The slider rig uses named sliders centred on 1.0; blend-shape assets
//! expose arbitrary morph targets resting at 0.0.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{Bounds, ParamError, ParameterMap, Whitelist, NEUTRAL_EPSILON};

/// The fixed slider rig.
pub const SLIDER_NAMES: [&str; 32] = [
    "eyeSize",
    "eyeSpacing",
    "eyeHeight",
    "eyeTilt",
    "eyeDepth",
    "browHeight",
    "browAngle",
    "browThickness",
    "noseWidth",
    "noseLength",
    "noseBridge",
    "noseTip",
    "nostrilWidth",
    "jawWidth",
    "jawLength",
    "chinHeight",
    "chinWidth",
    "chinProtrusion",
    "cheekboneHeight",
    "cheekboneWidth",
    "cheekFullness",
    "mouthWidth",
    "mouthHeight",
    "lipFullness",
    "upperLipThickness",
    "lowerLipThickness",
    "foreheadHeight",
    "foreheadWidth",
    "templeWidth",
    "faceWidth",
    "faceLength",
    "headSize",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Regime {
    /// Value meaning "no deformation".
    pub neutral: f32,
    pub bounds: Bounds,
    /// Empty until an asset has been inspected; extraction is then open-world.
    #[serde(default)]
    pub valid_names: Whitelist,
}

impl Regime {
    pub fn new(neutral: f32, bounds: Bounds, valid_names: Whitelist) -> Result<Self, ParamError> {
        let regime = Self {
            neutral,
            bounds,
            valid_names,
        };
        regime.validate()?;
        Ok(regime)
    }

    /// Slider rig: 32 named sliders, neutral 1.0, range [0, 2].
    pub fn sliders() -> Self {
        Self {
            neutral: 1.0,
            bounds: Bounds { min: 0.0, max: 2.0 },
            valid_names: Whitelist::new(SLIDER_NAMES),
        }
    }

    /// Blend shapes discovered on a loaded asset: neutral 0.0, range [0, 1].
    pub fn blendshapes<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            neutral: 0.0,
            bounds: Bounds { min: 0.0, max: 1.0 },
            valid_names: Whitelist::new(names),
        }
    }

    /// Blend-shape scale before any asset has been inspected.
    pub fn open_blendshapes() -> Self {
        Self::blendshapes(Vec::<String>::new())
    }

    pub fn validate(&self) -> Result<(), ParamError> {
        self.bounds.validate()?;
        if !self.bounds.contains(self.neutral) {
            tracing::error!(
                neutral = self.neutral,
                min = self.bounds.min,
                max = self.bounds.max,
                "regime neutral value out of range"
            );
            return Err(ParamError::NeutralOutOfBounds {
                neutral: self.neutral,
                min: self.bounds.min,
                max: self.bounds.max,
            });
        }
        Ok(())
    }

    /// The whitelist, or `None` in open-world mode.
    pub fn whitelist(&self) -> Option<&Whitelist> {
        (!self.valid_names.is_empty()).then_some(&self.valid_names)
    }

    pub fn is_neutral(&self, value: f32) -> bool {
        (value - self.neutral).abs() <= NEUTRAL_EPSILON
    }

    pub fn deviation(&self, value: f32) -> f32 {
        value - self.neutral
    }

    /// Same neutral and range, so values carry over between the two.
    pub fn same_scale(&self, other: &Regime) -> bool {
        self.neutral == other.neutral && self.bounds == other.bounds
    }

    pub fn with_valid_names(&self, valid_names: Whitelist) -> Self {
        Self {
            valid_names,
            ..self.clone()
        }
    }

    /// Every known name at its neutral value (empty in open-world mode).
    pub fn neutral_map(&self) -> ParameterMap {
        let neutral = self.bounds.clamp(self.neutral);
        let values: BTreeMap<String, f32> = self
            .valid_names
            .names()
            .iter()
            .map(|name| (name.clone(), neutral))
            .collect();
        ParameterMap::from_clamped(values)
    }
}

impl Default for Regime {
    fn default() -> Self {
        Self::open_blendshapes()
    }
}
