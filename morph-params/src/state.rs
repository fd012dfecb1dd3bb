//! Cumulative parameter state.
//!
//! The store owns the one current `ParameterMap` for a face. New results are overlaid
//! with `commit`, so a prompt only moves the parameters it mentions.

use std::collections::BTreeMap;

use crate::{ParameterMap, Regime};

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterStateStore {
    regime: Regime,
    current: ParameterMap,
}

impl ParameterStateStore {
    pub fn new(regime: Regime) -> Self {
        let current = regime.neutral_map();
        Self { regime, current }
    }

    pub fn regime(&self) -> &Regime {
        &self.regime
    }

    pub fn current(&self) -> &ParameterMap {
        &self.current
    }

    /// Right-biased overlay: incoming non-neutral values overwrite, everything else in
    /// `current` survives untouched.
    pub fn merge_with(&self, current: &ParameterMap, incoming: &ParameterMap) -> ParameterMap {
        let mut merged = current.as_map().clone();
        for (name, value) in incoming.iter() {
            if self.regime.is_neutral(value) {
                tracing::trace!(name, "incoming value is neutral, keeping current");
                continue;
            }
            merged.insert(name.to_string(), self.regime.bounds.clamp(value));
        }
        ParameterMap::from_clamped(merged)
    }

    /// Scale each value's deviation from neutral, then re-clamp.
    ///
    /// `1.0` hands the map straight back. Non-finite intensities are ignored and
    /// negative ones are treated as zero.
    pub fn apply_intensity(&self, params: ParameterMap, intensity: f32) -> ParameterMap {
        if intensity == 1.0 {
            return params;
        }
        if !intensity.is_finite() {
            tracing::warn!(intensity, "ignoring non-finite intensity");
            return params;
        }
        let intensity = intensity.max(0.0);
        let neutral = self.regime.neutral;
        let scaled: BTreeMap<String, f32> = params
            .into_inner()
            .into_iter()
            .map(|(name, value)| {
                let value = neutral + self.regime.deviation(value) * intensity;
                (name, self.regime.bounds.clamp(value))
            })
            .collect();
        ParameterMap::from_clamped(scaled)
    }

    /// The regime's all-neutral map. Does not touch the stored state.
    pub fn reset(&self) -> ParameterMap {
        self.regime.neutral_map()
    }

    pub fn non_neutral_entries(&self, params: &ParameterMap) -> ParameterMap {
        let kept: BTreeMap<String, f32> = params
            .iter()
            .filter(|(_, value)| !self.regime.is_neutral(*value))
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        ParameterMap::from_clamped(kept)
    }

    /// Merge a successful extraction into the stored state.
    pub fn commit(&mut self, incoming: &ParameterMap) -> &ParameterMap {
        let merged = self.merge_with(&self.current, incoming);
        tracing::debug!(
            incoming = incoming.len(),
            total = merged.len(),
            "committed parameters to state"
        );
        self.current = merged;
        &self.current
    }

    pub fn reset_to_neutral(&mut self) {
        tracing::info!("resetting parameter state to neutral");
        self.current = self.regime.neutral_map();
    }

    /// Switch to another asset's regime.
    ///
    /// With the same neutral and range, values for names the new asset still knows
    /// are kept. Otherwise old values mean nothing on the new scale and the state
    /// starts neutral.
    pub fn switch_regime(&mut self, regime: Regime) {
        if !self.regime.same_scale(&regime) {
            tracing::info!(
                neutral = regime.neutral,
                min = regime.bounds.min,
                max = regime.bounds.max,
                "regime scale changed, state reset to neutral"
            );
            self.current = regime.neutral_map();
            self.regime = regime;
            return;
        }

        let mut values = regime.neutral_map().into_inner();
        let mut dropped = 0usize;
        for (name, value) in self.current.iter() {
            match regime.whitelist() {
                Some(list) => match list.resolve(name) {
                    Some(canonical) => {
                        values.insert(canonical.to_string(), regime.bounds.clamp(value));
                    }
                    None => dropped += 1,
                },
                None => {
                    values.insert(name.to_string(), regime.bounds.clamp(value));
                }
            }
        }
        tracing::info!(
            valid_names = regime.valid_names.len(),
            kept = values.len(),
            dropped,
            "switched parameter regime"
        );
        self.current = ParameterMap::from_clamped(values);
        self.regime = regime;
    }
}
