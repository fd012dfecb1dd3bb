//! Per-attempt telemetry.
//!
//! Every model call (and every fallback) produces an `AttemptRecord`. Sinks are side
//! channels for tooling; nothing in the core reads them back.

use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use crate::{ExtractionStage, OutcomeSource};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub attempt_id: Uuid,
    /// 1-based attempt number within the request.
    pub attempt: u32,
    pub source: OutcomeSource,
    pub prompt: String,
    pub raw_output: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub stage: Option<ExtractionStage>,
    pub latency: Duration,
}

impl AttemptRecord {
    pub fn new(attempt: u32, source: OutcomeSource, prompt: &str) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            attempt,
            source,
            prompt: prompt.to_string(),
            raw_output: None,
            success: false,
            error: None,
            stage: None,
            latency: Duration::ZERO,
        }
    }
}

pub trait ObservabilitySink: Send + Sync {
    fn record(&self, record: &AttemptRecord);
}

/// Logs each attempt as a structured event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ObservabilitySink for TracingSink {
    fn record(&self, record: &AttemptRecord) {
        if record.success {
            tracing::info!(
                attempt_id = %record.attempt_id,
                attempt = record.attempt,
                source = ?record.source,
                stage = ?record.stage,
                latency_ms = record.latency.as_millis() as u64,
                "generation attempt succeeded"
            );
        } else {
            tracing::warn!(
                attempt_id = %record.attempt_id,
                attempt = record.attempt,
                source = ?record.source,
                error = record.error.as_deref().unwrap_or("unknown"),
                raw_chars = record.raw_output.as_ref().map_or(0, |raw| raw.len()),
                latency_ms = record.latency.as_millis() as u64,
                "generation attempt failed"
            );
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ObservabilitySink for NullSink {
    fn record(&self, _record: &AttemptRecord) {}
}

/// Keeps every record in memory, for tests and debug overlays.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<AttemptRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AttemptRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ObservabilitySink for MemorySink {
    fn record(&self, record: &AttemptRecord) {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record.clone());
    }
}
