//! Drives one request through the model with bounded retries.
//!
//! The state store is borrowed mutably for the whole request, so a state owner can
//! never have two generations in flight and merges cannot race. Failed attempts never
//! touch the store; only a fully successful extraction is merged.

use std::sync::Arc;
use std::time::Instant;

use morph_params::ParameterStateStore;

use crate::config::CoreConfig;
use crate::engine::{InferenceEngine, InferenceError};
use crate::extract::ResponseExtractor;
use crate::fallback::keyword_stub;
use crate::observe::{AttemptRecord, ObservabilitySink, TracingSink};
use crate::prompt::build_prompt;
use crate::{GenerationOutcome, MorphRequest, OutcomeSource};

pub struct GenerationOrchestrator {
    engine: Arc<dyn InferenceEngine>,
    sink: Arc<dyn ObservabilitySink>,
    config: CoreConfig,
}

impl GenerationOrchestrator {
    pub fn new(engine: Arc<dyn InferenceEngine>, config: CoreConfig) -> Self {
        Self {
            engine,
            sink: Arc::new(TracingSink),
            config,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ObservabilitySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// A handle the UI can keep to call `stop()` while a request is pending.
    pub fn engine(&self) -> Arc<dyn InferenceEngine> {
        Arc::clone(&self.engine)
    }

    pub fn stop(&self) {
        tracing::info!("stop requested");
        self.engine.stop();
    }

    pub async fn run(
        &self,
        request: &MorphRequest,
        store: &mut ParameterStateStore,
    ) -> GenerationOutcome {
        let started = Instant::now();
        tracing::info!(
            region = %request.region,
            intensity = request.intensity,
            "morph request received"
        );

        if self.config.offline || !self.engine.is_ready() {
            tracing::info!(offline = self.config.offline, "inference unavailable");
            return self.run_fallback(request, store, started, 0);
        }

        let prompt = build_prompt(request, store, &self.config.prompt);
        let extractor = ResponseExtractor::for_regime(store.regime(), &self.config.extraction);
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut tokens_used = 0usize;
        let mut chars_consumed = 0usize;
        let mut attempts = 0u32;
        let mut last_error: Option<String> = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                tracing::debug!(
                    attempt,
                    delay_ms = self.config.retry.retry_delay_ms,
                    "waiting before retry"
                );
                tokio::time::sleep(self.config.retry.retry_delay()).await;
            }
            attempts = attempt;
            let attempt_started = Instant::now();
            let mut record = AttemptRecord::new(attempt, OutcomeSource::Model, &prompt);

            let completion = match self.engine.generate(&prompt, self.config.max_tokens).await {
                Ok(completion) => completion,
                Err(InferenceError::NotLoaded) => {
                    record.error = Some(InferenceError::NotLoaded.to_string());
                    record.latency = attempt_started.elapsed();
                    self.sink.record(&record);
                    tracing::warn!(attempt, "engine unloaded mid-request, falling back");
                    return self.run_fallback(request, store, started, attempts);
                }
                Err(err) => {
                    let cancelled = err == InferenceError::Cancelled;
                    record.error = Some(err.to_string());
                    record.latency = attempt_started.elapsed();
                    self.sink.record(&record);
                    last_error = Some(err.to_string());
                    if cancelled {
                        tracing::info!(attempt, "generation cancelled, not retrying");
                        break;
                    }
                    continue;
                }
            };

            tokens_used += completion.token_count;
            chars_consumed += completion.text.chars().count();

            let extracted =
                extractor.extract_with_stage(&completion.text, store.regime().whitelist());
            record.raw_output = Some(completion.text);
            record.latency = attempt_started.elapsed();

            match extracted {
                Ok((params, stage)) => {
                    let scaled = store.apply_intensity(params, request.intensity);
                    store.commit(&scaled);
                    record.success = true;
                    record.stage = Some(stage);
                    self.sink.record(&record);
                    tracing::info!(
                        attempt,
                        stage = ?stage,
                        changed = scaled.len(),
                        "morph request applied"
                    );
                    return GenerationOutcome {
                        state: store.current().clone(),
                        elapsed: started.elapsed(),
                        tokens_used,
                        chars_consumed,
                        attempts,
                        source: OutcomeSource::Model,
                        success: true,
                        error: None,
                    };
                }
                Err(err) => {
                    record.error = Some(err.to_string());
                    self.sink.record(&record);
                    last_error = Some(err.to_string());
                }
            }
        }

        let error = last_error.unwrap_or_else(|| "generation failed".to_string());
        tracing::error!(attempts, error = %error, "morph request failed");
        GenerationOutcome {
            state: store.current().clone(),
            elapsed: started.elapsed(),
            tokens_used,
            chars_consumed,
            attempts,
            source: OutcomeSource::Model,
            success: false,
            error: Some(error),
        }
    }

    fn run_fallback(
        &self,
        request: &MorphRequest,
        store: &mut ParameterStateStore,
        started: Instant,
        attempts_so_far: u32,
    ) -> GenerationOutcome {
        let attempt = attempts_so_far + 1;
        let params = keyword_stub(request, store.regime());
        let scaled = store.apply_intensity(params, request.intensity);
        store.commit(&scaled);

        let mut record = AttemptRecord::new(attempt, OutcomeSource::Fallback, &request.prompt);
        record.success = true;
        record.latency = started.elapsed();
        self.sink.record(&record);

        GenerationOutcome {
            state: store.current().clone(),
            elapsed: started.elapsed(),
            tokens_used: 0,
            chars_consumed: 0,
            attempts: attempt,
            source: OutcomeSource::Fallback,
            success: true,
            error: None,
        }
    }
}
