// Builds the compact prompt sent to the local model
// Small models do better with a short candidate list and a short state summary

use morph_params::{FaceRegion, ParameterStateStore, Regime};

use crate::config::PromptConfig;
use crate::MorphRequest;

/// Valid names for the region, in whitelist order, capped at `limit`.
pub fn candidate_names(region: FaceRegion, regime: &Regime, limit: usize) -> Vec<&str> {
    let mut names = region.candidates(regime.valid_names.names());
    names.truncate(limit);
    names
}

/// The most-deviated current values as compact JSON, e.g. `{"eyeSize":1.30}`.
pub fn render_current_state(store: &ParameterStateStore, limit: usize) -> String {
    let regime = store.regime();
    let compact = store.non_neutral_entries(store.current());
    let mut entries: Vec<(&str, f32)> = compact.iter().collect();
    entries.sort_by(|a, b| {
        regime
            .deviation(b.1)
            .abs()
            .total_cmp(&regime.deviation(a.1).abs())
            .then_with(|| a.0.cmp(b.0))
    });
    entries.truncate(limit);
    let body: Vec<String> = entries
        .iter()
        .map(|(name, value)| format!("\"{name}\":{value:.2}"))
        .collect();
    format!("{{{}}}", body.join(","))
}

pub fn build_prompt(
    request: &MorphRequest,
    store: &ParameterStateStore,
    config: &PromptConfig,
) -> String {
    let regime = store.regime();
    let mut prompt = format!(
        "You edit a 3D face. Reply with one JSON object mapping parameter names to numbers \
         between {min} and {max}; {neutral} means unchanged. No explanation.\n",
        min = regime.bounds.min,
        max = regime.bounds.max,
        neutral = regime.neutral,
    );

    let candidates = candidate_names(request.region, regime, config.max_candidates);
    if candidates.is_empty() {
        prompt.push_str("Parameters: use standard blend shape names.\n");
    } else {
        prompt.push_str(&format!("Parameters: {}\n", candidates.join(", ")));
    }

    if config.max_shown_params > 0 {
        let current = render_current_state(store, config.max_shown_params);
        if current != "{}" {
            prompt.push_str(&format!("Current: {current}\n"));
        }
    }

    prompt.push_str(&format!(
        "Region: {}\nRequest: {}\nJSON:",
        request.region,
        request.prompt.trim()
    ));

    tracing::trace!(
        chars = prompt.len(),
        candidates = candidates.len(),
        "built prompt"
    );
    prompt
}
