//! Recover a parameter map from unreliable model text.
//!
//! Small local models wrap JSON in prose and code fences, single-quote or forget to
//! quote keys, leave trailing commas and comments, or answer in plain English.
//! Extraction is a cascade of increasingly loose strategies, each tried only when the
//! previous one produced nothing usable:
//!
//! 1. isolate the text between the first `{` and the last `}`
//! 2. split it into balanced top-level objects, first one first
//! 3. parse each strictly, then again after syntax repair
//! 4. scan the whole text for `key: number` pairs
//! 5. with a whitelist, look for each valid name followed closely by a number
//!
//! Malformed syntax is an input, not an error.

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use thiserror::Error;

use morph_params::{Bounds, ParameterMap, Regime, Whitelist};

use crate::config::ExtractionConfig;

static BARE_KEY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"([{,]\s*)([A-Za-z_][A-Za-z0-9_.\-]*)\s*:").ok());

static TRAILING_COMMA: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r",(\s*[}\]])").ok());

static KEY_NUMBER: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r#"(?:"([A-Za-z_][A-Za-z0-9_.\-]*)"|'([A-Za-z_][A-Za-z0-9_.\-]*)'|\b([A-Za-z_][A-Za-z0-9_.\-]*))\s*:\s*(-?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][-+]?\d+)?)"#,
    )
    .ok()
});

static NUMBER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"-?(?:\d+(?:\.\d+)?|\.\d+)").ok());

/// Wrapper fields models like to add. Never parameters in open-world mode.
const ENVELOPE_KEYS: [&str; 7] = [
    "confidence",
    "notes",
    "note",
    "explanation",
    "reasoning",
    "intensity",
    "comment",
];

const MAX_KEY_LEN: usize = 64;

/// Which strategy produced the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStage {
    Structured,
    KeyValueScan,
    NameProximity,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("no JSON object or parameter mention found in model output")]
    NoJsonFound,

    #[error("model output contained no usable parameters")]
    EmptyResult,
}

#[derive(Debug, Clone)]
pub struct ResponseExtractor {
    bounds: Bounds,
    proximity_window: usize,
    max_nesting: usize,
}

impl ResponseExtractor {
    pub fn new(bounds: Bounds, config: &ExtractionConfig) -> Self {
        Self {
            bounds,
            proximity_window: config.proximity_window.max(1),
            max_nesting: config.max_nesting,
        }
    }

    pub fn for_regime(regime: &Regime, config: &ExtractionConfig) -> Self {
        Self::new(regime.bounds, config)
    }

    /// Extract clamped parameters from `raw`.
    ///
    /// `valid_names` of `None` (or an empty list) accepts any plausible key; otherwise
    /// keys resolve exactly, then case-insensitively, and unknown keys are dropped.
    pub fn extract(
        &self,
        raw: &str,
        valid_names: Option<&Whitelist>,
    ) -> Result<ParameterMap, ExtractionError> {
        self.extract_with_stage(raw, valid_names)
            .map(|(params, _)| params)
    }

    pub fn extract_with_stage(
        &self,
        raw: &str,
        valid_names: Option<&Whitelist>,
    ) -> Result<(ParameterMap, ExtractionStage), ExtractionError> {
        let whitelist = valid_names.filter(|list| !list.is_empty());
        let boundary = json_boundary(raw);

        if let Some(slice) = boundary {
            let mut objects = balanced_objects(slice);
            if objects.is_empty() {
                tracing::debug!("braces never balance, parsing boundary as-is");
                objects.push(slice);
            }
            for (index, object) in objects.iter().enumerate() {
                let Some(map) = parse_object(object) else {
                    tracing::debug!(index, "object did not parse after repair");
                    continue;
                };
                let mut pairs = Vec::new();
                self.flatten(&map, 0, &mut pairs);
                let accepted = self.accept(pairs, whitelist);
                if !accepted.is_empty() {
                    tracing::debug!(index, count = accepted.len(), "structured extraction");
                    return Ok((self.finish(accepted), ExtractionStage::Structured));
                }
            }
        }

        let scanned = self.accept(scan_key_numbers(raw), whitelist);
        if !scanned.is_empty() {
            tracing::debug!(count = scanned.len(), "key:number scan extraction");
            return Ok((self.finish(scanned), ExtractionStage::KeyValueScan));
        }

        if let Some(list) = whitelist {
            let near = self.accept(self.scan_name_proximity(raw, list), whitelist);
            if !near.is_empty() {
                tracing::debug!(count = near.len(), "name proximity extraction");
                return Ok((self.finish(near), ExtractionStage::NameProximity));
            }
        }

        if boundary.is_some() {
            Err(ExtractionError::EmptyResult)
        } else {
            Err(ExtractionError::NoJsonFound)
        }
    }

    fn flatten(&self, map: &Map<String, Value>, depth: usize, out: &mut Vec<(String, f64)>) {
        for (key, value) in map {
            match value {
                Value::Object(inner) if depth < self.max_nesting => {
                    self.flatten(inner, depth + 1, out)
                }
                Value::Object(_) => {
                    tracing::debug!(key = %key, depth, "object nested too deep, skipping")
                }
                other => match coerce_number(other) {
                    Some(number) => out.push((key.clone(), number)),
                    None => tracing::debug!(key = %key, "skipping non-numeric value"),
                },
            }
        }
    }

    /// Resolve keys against the whitelist and clamp values, keeping source order.
    fn accept(
        &self,
        pairs: Vec<(String, f64)>,
        whitelist: Option<&Whitelist>,
    ) -> Vec<(String, f32)> {
        let mut accepted = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            if value.is_nan() {
                tracing::debug!(key = %key, "skipping NaN value");
                continue;
            }
            let name = match whitelist {
                Some(list) => match list.resolve(&key) {
                    Some(canonical) => canonical.to_string(),
                    None => {
                        tracing::warn!(key = %key, "dropping parameter not in whitelist");
                        continue;
                    }
                },
                None => {
                    let key = key.trim();
                    if !is_plausible_name(key) || is_envelope_key(key) {
                        tracing::debug!(key, "ignoring non-parameter key");
                        continue;
                    }
                    key.to_string()
                }
            };
            accepted.push((name, self.bounds.clamp_f64(value)));
        }
        accepted
    }

    fn finish(&self, pairs: Vec<(String, f32)>) -> ParameterMap {
        ParameterMap::bounded(pairs, self.bounds)
    }

    /// "set eyeBlink_L to 0.6": each valid name followed by a number within the
    /// window. Case-insensitive, whole-name matches only. Results are in source order.
    fn scan_name_proximity(&self, raw: &str, whitelist: &Whitelist) -> Vec<(String, f64)> {
        let Some(number) = NUMBER.as_ref() else {
            return Vec::new();
        };
        let haystack = raw.to_ascii_lowercase();
        let mut hits: Vec<(usize, String, f64)> = Vec::new();

        for name in whitelist.names() {
            let needle = name.to_ascii_lowercase();
            let mut from = 0;
            while let Some(offset) = haystack[from..].find(&needle) {
                let start = from + offset;
                let end = start + needle.len();
                from = end;
                if !is_whole_name(&haystack, start, end) {
                    continue;
                }
                let rest = &haystack[end..];
                let window_end = rest
                    .char_indices()
                    .nth(self.proximity_window)
                    .map_or(rest.len(), |(index, _)| index);
                let Some(found) = number.find(rest) else {
                    continue;
                };
                if found.start() >= window_end {
                    continue;
                }
                if let Ok(value) = found.as_str().parse::<f64>() {
                    hits.push((start, name.clone(), value));
                }
            }
        }

        hits.sort_by_key(|(position, _, _)| *position);
        hits.into_iter()
            .map(|(_, name, value)| (name, value))
            .collect()
    }
}

fn json_boundary(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Top-level balanced `{...}` objects, in order. Braces inside quoted strings do not
/// count; quotes are only tracked inside an object so apostrophes in prose are harmless.
fn balanced_objects(text: &str) -> Vec<&str> {
    let mut objects = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (index, c) in text.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' if depth > 0 => quote = Some(c),
            '{' => {
                if depth == 0 {
                    start = Some(index);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(begin) = start.take() {
                        objects.push(&text[begin..=index]);
                    }
                }
            }
            _ => {}
        }
    }
    objects
}

/// Strict parse, then parse after repair.
fn parse_object(candidate: &str) -> Option<Map<String, Value>> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(candidate) {
        return Some(map);
    }
    let repaired = repair_json(candidate);
    tracing::trace!(repaired = %repaired, "repaired candidate object");
    match serde_json::from_str::<Value>(&repaired) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn repair_json(candidate: &str) -> String {
    let mut text = strip_comments_and_requote(candidate);
    if let Some(pattern) = BARE_KEY.as_ref() {
        text = pattern.replace_all(&text, r#"${1}"${2}":"#).into_owned();
    }
    if let Some(pattern) = TRAILING_COMMA.as_ref() {
        text = pattern.replace_all(&text, "${1}").into_owned();
    }
    text
}

/// Drop `//` and `/* */` comments outside strings and turn single-quoted strings into
/// double-quoted ones.
fn strip_comments_and_requote(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let mut chars = src.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            if c == '\\' {
                match chars.next() {
                    Some('\'') if q == '\'' => out.push('\''),
                    Some(next) => {
                        out.push('\\');
                        out.push(next);
                    }
                    None => out.push('\\'),
                }
            } else if c == q {
                out.push('"');
                quote = None;
            } else if c == '"' {
                // a bare double quote inside a single-quoted string
                out.push_str("\\\"");
            } else {
                out.push(c);
            }
            continue;
        }

        match c {
            '"' | '\'' => {
                quote = Some(c);
                out.push('"');
            }
            '/' if chars.peek() == Some(&'/') => {
                while chars.peek().is_some_and(|next| *next != '\n') {
                    chars.next();
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut previous = '\0';
                for next in chars.by_ref() {
                    if previous == '*' && next == '/' {
                        break;
                    }
                    previous = next;
                }
            }
            _ => out.push(c),
        }
    }
    out
}

fn scan_key_numbers(raw: &str) -> Vec<(String, f64)> {
    let Some(pattern) = KEY_NUMBER.as_ref() else {
        return Vec::new();
    };
    pattern
        .captures_iter(raw)
        .filter_map(|caps| {
            let key = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3))?;
            let value = caps.get(4)?.as_str().parse::<f64>().ok()?;
            Some((key.as_str().to_string(), value))
        })
        .collect()
}

fn coerce_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    (!number.is_nan()).then_some(number)
}

fn is_plausible_name(key: &str) -> bool {
    let mut chars = key.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    key.len() <= MAX_KEY_LEN
        && (first.is_alphabetic() || first == '_')
        && chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '-' | ' '))
}

fn is_envelope_key(key: &str) -> bool {
    ENVELOPE_KEYS
        .iter()
        .any(|envelope| envelope.eq_ignore_ascii_case(key))
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_whole_name(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.is_some_and(is_ident_char) && !after.is_some_and(is_ident_char)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sliders() -> Regime {
        Regime::sliders()
    }

    fn extractor(regime: &Regime) -> ResponseExtractor {
        ResponseExtractor::for_regime(regime, &ExtractionConfig::default())
    }

    #[test]
    fn test_prose_wrapped_object() {
        let regime = sliders();
        let raw = "Here's the result: {\"eyeSize\":1.3} Hope that helps!";
        let params = extractor(&regime).extract(raw, None).unwrap();
        assert_eq!(params.get("eyeSize"), Some(1.3));
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_fenced_single_quoted_key() {
        let regime = sliders();
        let raw = "```json\n{'noseWidth':0.8}\n```";
        let (params, stage) = extractor(&regime)
            .extract_with_stage(raw, regime.whitelist())
            .unwrap();
        assert_eq!(params.get("noseWidth"), Some(0.8));
        assert_eq!(stage, ExtractionStage::Structured);
    }

    #[test]
    fn test_unquoted_key_trailing_comma() {
        let regime = sliders();
        let params = extractor(&regime).extract("{eyeSize:1.5,}", None).unwrap();
        assert_eq!(params.get("eyeSize"), Some(1.5));
    }

    #[test]
    fn test_name_proximity_without_braces() {
        let regime = Regime::blendshapes(["eyeBlink_L"]);
        let (params, stage) = extractor(&regime)
            .extract_with_stage("set eyeBlink_L to 0.6 please", regime.whitelist())
            .unwrap();
        assert_eq!(params.get("eyeBlink_L"), Some(0.6));
        assert_eq!(stage, ExtractionStage::NameProximity);
    }

    #[test]
    fn test_refusal_is_no_json_found() {
        let regime = sliders();
        let raw = "I cannot process this request.";
        assert_eq!(
            extractor(&regime).extract(raw, None),
            Err(ExtractionError::NoJsonFound)
        );
        assert_eq!(
            extractor(&regime).extract(raw, regime.whitelist()),
            Err(ExtractionError::NoJsonFound)
        );
    }

    #[test]
    fn test_whitelist_filters_keys() {
        let regime = sliders();
        let list = Whitelist::new(["eyeSize"]);
        let params = extractor(&regime)
            .extract(r#"{"eyeSize":0.5,"noseWidth":0.9}"#, Some(&list))
            .unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params.get("eyeSize"), Some(0.5));
    }

    #[test]
    fn test_braces_with_nothing_whitelisted_is_empty_result() {
        let regime = sliders();
        assert_eq!(
            extractor(&regime).extract(r#"{"elbowAngle": 0.5}"#, regime.whitelist()),
            Err(ExtractionError::EmptyResult)
        );
    }

    #[test]
    fn test_out_of_range_values_clamp() {
        let regime = sliders();
        let params = extractor(&regime)
            .extract(r#"{"eyeSize": 999, "noseWidth": -5, "jawWidth": 1e400}"#, None)
            .unwrap();
        assert_eq!(params.get("eyeSize"), Some(2.0));
        assert_eq!(params.get("noseWidth"), Some(0.0));
        assert_eq!(params.get("jawWidth"), Some(2.0));
    }

    #[test]
    fn test_case_insensitive_keys_resolve_to_canonical() {
        let regime = sliders();
        let params = extractor(&regime)
            .extract(r#"{"EYESIZE": 1.2, "nosewidth": 0.9}"#, regime.whitelist())
            .unwrap();
        assert_eq!(params.get("eyeSize"), Some(1.2));
        assert_eq!(params.get("noseWidth"), Some(0.9));
    }

    #[test]
    fn test_duplicates_last_write_wins() {
        let regime = sliders();
        let params = extractor(&regime)
            .extract(r#"{"eyeSize": 1.2, "EyeSize": 1.4}"#, regime.whitelist())
            .unwrap();
        assert_eq!(params.get("eyeSize"), Some(1.4));

        let scanned = extractor(&regime)
            .extract("eyeSize: 1.2 then eyeSize: 1.7", regime.whitelist())
            .unwrap();
        assert_eq!(scanned.get("eyeSize"), Some(1.7));
    }

    #[test]
    fn test_comments_and_nested_objects() {
        let regime = Regime::open_blendshapes();
        let raw = r#"{
            // widen the smile
            "blendshapes": {"mouthSmile_L": 0.7, /* left only */ "jawOpen": "0.3"},
            "confidence": 0.9,
            "notes": "looks good"
        }"#;
        let params = extractor(&regime).extract(raw, None).unwrap();
        assert_eq!(params.get("mouthSmile_L"), Some(0.7));
        assert_eq!(params.get("jawOpen"), Some(0.3));
        assert!(!params.contains("confidence"));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_first_usable_object_wins() {
        let regime = sliders();
        let raw = r#"Template: {} Answer: {"eyeSize": 1.2} Also: {"noseWidth": 0.3}"#;
        let params = extractor(&regime).extract(raw, regime.whitelist()).unwrap();
        assert_eq!(params.get("eyeSize"), Some(1.2));
        assert!(!params.contains("noseWidth"));
    }

    #[test]
    fn test_key_value_scan_when_json_is_hopeless() {
        let regime = sliders();
        let raw = r#"{"eyeSize": 1.3, "mode": wide-ish, "jawWidth": 0.8"#;
        let (params, stage) = extractor(&regime)
            .extract_with_stage(raw, regime.whitelist())
            .unwrap();
        assert_eq!(stage, ExtractionStage::KeyValueScan);
        assert_eq!(params.get("eyeSize"), Some(1.3));
        assert_eq!(params.get("jawWidth"), Some(0.8));
    }

    #[test]
    fn test_sdk_debug_rendering_is_just_text() {
        let regime = Regime::blendshapes(["jawOpen"]);
        let raw = r#"GenerateResult(text={"jawOpen": 0.4}, tokens=12, finish=Stop)"#;
        let params = extractor(&regime).extract(raw, regime.whitelist()).unwrap();
        assert_eq!(params.get("jawOpen"), Some(0.4));
    }

    #[test]
    fn test_proximity_respects_name_boundaries_and_window() {
        let regime = Regime::blendshapes(["eyeBlink", "eyeBlink_L", "eyeBlink_R"]);
        let params = extractor(&regime)
            .extract("close eyeBlink_L and eyeBlink_R to 0.6", regime.whitelist())
            .unwrap();
        assert_eq!(params.get("eyeBlink_L"), Some(0.6));
        assert_eq!(params.get("eyeBlink_R"), Some(0.6));
        assert!(!params.contains("eyeBlink"));

        let far = "eyeBlink_L is something I would love to change a lot, maybe 0.5";
        assert_eq!(
            extractor(&regime).extract(far, regime.whitelist()),
            Err(ExtractionError::NoJsonFound)
        );
    }

    #[test]
    fn test_open_world_ignores_implausible_keys() {
        let regime = Regime::open_blendshapes();
        assert_eq!(
            extractor(&regime).extract(r#"{"": 0.4, "9lives": 0.2}"#, None),
            Err(ExtractionError::EmptyResult)
        );
    }

    #[test]
    fn test_repair_keeps_urls_in_strings() {
        let repaired = strip_comments_and_requote(r#"{'src': "http://x/y", 'a': 1} // done"#);
        assert_eq!(repaired, r#"{"src": "http://x/y", "a": 1} "#);
    }

    #[test]
    fn test_balanced_objects_ignore_braces_in_strings() {
        let objects = balanced_objects(r#"{"a": "}"} {"b": 2}"#);
        assert_eq!(objects, vec![r#"{"a": "}"}"#, r#"{"b": 2}"#]);
    }
}
