//! The surface the UI layer talks to.
//!
//! Owns one morph session and one orchestrator. The app's composition root builds a
//! single instance with the engine handle it created.

use std::sync::Arc;

use morph_params::{encode_state, MorphSession, ParameterMap, Regime, Whitelist, WireError};

use crate::config::CoreConfig;
use crate::engine::InferenceEngine;
use crate::observe::ObservabilitySink;
use crate::orchestrator::GenerationOrchestrator;
use crate::{GenerationOutcome, MorphRequest};

pub struct FaceMorphCore {
    orchestrator: GenerationOrchestrator,
    session: MorphSession,
}

impl FaceMorphCore {
    pub fn new(engine: Arc<dyn InferenceEngine>, regime: Regime, config: CoreConfig) -> Self {
        Self {
            orchestrator: GenerationOrchestrator::new(engine, config),
            session: MorphSession::new(regime),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ObservabilitySink>) -> Self {
        self.orchestrator = self.orchestrator.with_sink(sink);
        self
    }

    pub fn current_state(&self) -> &ParameterMap {
        self.session.store().current()
    }

    pub fn regime(&self) -> &Regime {
        self.session.store().regime()
    }

    pub fn session(&self) -> &MorphSession {
        &self.session
    }

    pub fn reset(&mut self) {
        self.session.reset();
    }

    /// New whitelist from a freshly loaded asset; neutral and range stay as they are.
    pub fn update_valid_names<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let regime = self.regime().with_valid_names(Whitelist::new(names));
        self.switch_regime(regime);
    }

    pub fn switch_regime(&mut self, regime: Regime) {
        self.session.store_mut().switch_regime(regime);
    }

    /// Run one request. Requests are serialised by `&mut self`.
    pub async fn generate(&mut self, request: MorphRequest) -> GenerationOutcome {
        let iteration =
            self.session
                .push_intent(request.region, request.prompt.clone(), request.intensity);
        let outcome = self
            .orchestrator
            .run(&request, self.session.store_mut())
            .await;
        if outcome.success {
            if let Err(err) = self.session.mark_applied(iteration) {
                tracing::warn!(error = %err, "could not mark intent applied");
            }
        }
        outcome
    }

    /// Non-neutral state as the renderer's flat JSON object.
    pub fn render_payload(&self) -> Result<String, WireError> {
        encode_state(self.current_state(), self.regime())
    }

    pub fn stop(&self) {
        self.orchestrator.stop();
    }
}
