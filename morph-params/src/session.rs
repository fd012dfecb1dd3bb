//! Morph session model.
//!
//! A session is one sculpting run on one face. It stores:
//! - the cumulative parameter state (through `ParameterStateStore`)
//! - the history of requests, and whether each one changed the face

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{FaceRegion, ParameterStateStore, Regime};

/// What the user asked for at a given iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentEntry {
    pub iteration: u32,
    pub region: FaceRegion,
    pub text: String,
    pub intensity: f32,
    pub applied: bool,
}

#[derive(Debug, Clone)]
pub struct MorphSession {
    session_id: Uuid,
    store: ParameterStateStore,
    history: Vec<IntentEntry>,
}

impl MorphSession {
    pub fn new(regime: Regime) -> Self {
        let session_id = Uuid::new_v4();
        tracing::info!(
            session_id = %session_id,
            valid_names = regime.valid_names.len(),
            "starting morph session"
        );
        Self {
            session_id,
            store: ParameterStateStore::new(regime),
            history: vec![],
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn store(&self) -> &ParameterStateStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ParameterStateStore {
        &mut self.store
    }

    pub fn history(&self) -> &[IntentEntry] {
        &self.history
    }

    /// Record a request. Returns its iteration number.
    pub fn push_intent(
        &mut self,
        region: FaceRegion,
        text: impl Into<String>,
        intensity: f32,
    ) -> u32 {
        let iteration = self.history.len() as u32;
        self.history.push(IntentEntry {
            iteration,
            region,
            text: text.into(),
            intensity,
            applied: false,
        });
        iteration
    }

    pub fn mark_applied(&mut self, iteration: u32) -> Result<(), SessionError> {
        let entry = self
            .history
            .iter_mut()
            .find(|entry| entry.iteration == iteration)
            .ok_or(SessionError::UnknownIteration { iteration })?;
        entry.applied = true;
        Ok(())
    }

    /// Back to a neutral face. History is kept.
    pub fn reset(&mut self) {
        self.store.reset_to_neutral();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("unknown iteration: {iteration}")]
    UnknownIteration { iteration: u32 },
}
