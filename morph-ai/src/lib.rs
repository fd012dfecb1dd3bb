// Turns free-text model output into bounded morph parameters
// Drive one request through the model with retries and an offline fallback
// Hand the renderer the full cumulative state afterwards

use morph_params::{FaceRegion, ParameterMap};
use serde::Serialize;
use std::time::Duration;

pub mod config;
pub mod engine;
pub mod extract;
pub mod facade;
pub mod fallback;
pub mod observe;
pub mod orchestrator;
pub mod prompt;
pub mod telemetry;

pub use config::{load_config, ConfigError, CoreConfig, ExtractionConfig, PromptConfig, RetryPolicy};
pub use engine::{Completion, InferenceEngine, InferenceError};
pub use extract::{ExtractionError, ExtractionStage, ResponseExtractor};
pub use facade::FaceMorphCore;
pub use observe::{AttemptRecord, MemorySink, NullSink, ObservabilitySink, TracingSink};
pub use orchestrator::GenerationOrchestrator;
pub use telemetry::init_tracing;

/// One user request: where on the face, what they typed, how strongly.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MorphRequest {
    pub region: FaceRegion,
    pub prompt: String,
    pub intensity: f32,
}

impl MorphRequest {
    pub fn new(region: FaceRegion, prompt: impl Into<String>) -> Self {
        Self {
            region,
            prompt: prompt.into(),
            intensity: 1.0,
        }
    }

    pub fn with_intensity(mut self, intensity: f32) -> Self {
        self.intensity = intensity;
        self
    }
}

/// Where a set of parameters came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeSource {
    Model,
    Fallback,
}

/// Result of one request. `state` is always the full cumulative state: the new one on
/// success, the untouched previous one on failure.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutcome {
    pub state: ParameterMap,
    pub elapsed: Duration,
    pub tokens_used: usize,
    pub chars_consumed: usize,
    pub attempts: u32,
    pub source: OutcomeSource,
    pub success: bool,
    pub error: Option<String>,
}
