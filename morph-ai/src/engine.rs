//! The inference capability the core consumes.
//!
//! Implementations wrap whatever local runtime hosts the model. Loading, unloading,
//! and process-wide uniqueness are the implementation's and the composition root's
//! business; the core only asks whether it is ready, asks for text, and asks it to stop.

use async_trait::async_trait;
use thiserror::Error;

/// Raw model output. `text` may be anything, including an SDK object's debug
/// rendering; it all goes through the same extraction cascade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub token_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InferenceError {
    #[error("inference engine is not loaded")]
    NotLoaded,

    #[error("generation was cancelled")]
    Cancelled,

    #[error("generation failed: {0}")]
    Generation(String),
}

#[async_trait]
pub trait InferenceEngine: Send + Sync {
    fn is_ready(&self) -> bool;

    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<Completion, InferenceError>;

    /// Best-effort request to abandon the generation in flight.
    fn stop(&self);
}
