//! Offline keyword stub.
//!
//! Used when no model is loaded (or the core is configured offline). It reads the
//! direction of the request from a few words and nudges the region's first candidate
//! parameters by a fixed step. Deterministic and never fails, so demos always have
//! something to render.

use morph_params::{FaceRegion, ParameterMap, Regime};

use crate::prompt::candidate_names;
use crate::MorphRequest;

const INCREASE_WORDS: [&str; 16] = [
    "bigger", "larger", "wider", "longer", "taller", "more", "increase", "raise", "higher",
    "fuller", "thicker", "enlarge", "grow", "open", "widen", "up",
];

const DECREASE_WORDS: [&str; 14] = [
    "smaller", "narrower", "shorter", "thinner", "less", "decrease", "lower", "reduce",
    "shrink", "slimmer", "close", "narrow", "down", "flatter",
];

const STRONG_WORDS: [&str; 6] = ["much", "very", "extremely", "really", "way", "lot"];

/// Parameters the stub touches per request.
pub const STUB_PARAMS: usize = 3;

/// Fraction of the regime's range moved per request (doubled for strong wording).
const STEP_FRACTION: f32 = 0.15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Increase,
    Decrease,
}

fn count_words<'a>(words: &[&'a str], list: &[&'a str]) -> usize {
    words.iter().filter(|word| list.contains(*word)).count()
}

fn read_direction(prompt: &str) -> (Direction, bool) {
    let lower = prompt.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect();
    let up = count_words(&words, &INCREASE_WORDS);
    let down = count_words(&words, &DECREASE_WORDS);
    let strong = count_words(&words, &STRONG_WORDS) > 0;
    // A request with no direction word still asks for a change; default to increase.
    let direction = if down > up {
        Direction::Decrease
    } else {
        Direction::Increase
    };
    (direction, strong)
}

/// Heuristic parameters for `request`. Empty when the regime knows no names yet.
pub fn keyword_stub(request: &MorphRequest, regime: &Regime) -> ParameterMap {
    let region = match request.region {
        FaceRegion::All => FaceRegion::detect(&request.prompt).unwrap_or(FaceRegion::All),
        region => region,
    };
    let names = candidate_names(region, regime, STUB_PARAMS);
    let (direction, strong) = read_direction(&request.prompt);

    let mut step = regime.bounds.span() * STEP_FRACTION;
    if strong {
        step *= 2.0;
    }
    let signed = match direction {
        Direction::Increase => step,
        Direction::Decrease => -step,
    };
    let mut value = regime.bounds.clamp(regime.neutral + signed);
    if regime.is_neutral(value) {
        // Neutral sits at the edge of the range (blend shapes), so only upward moves
        // deform anything.
        value = regime.bounds.clamp(regime.neutral + step);
    }

    tracing::info!(
        region = %region,
        direction = ?direction,
        strong,
        value,
        params = names.len(),
        "using keyword fallback"
    );
    ParameterMap::bounded(names.into_iter().map(|name| (name, value)), regime.bounds)
}
