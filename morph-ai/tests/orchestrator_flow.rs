use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use morph_ai::{
    Completion, CoreConfig, FaceMorphCore, GenerationOrchestrator, InferenceEngine,
    InferenceError, MemorySink, MorphRequest, OutcomeSource, RetryPolicy,
};
use morph_params::{FaceRegion, ParameterMap, ParameterStateStore, Regime};

/// Replays canned responses in order.
struct ScriptedEngine {
    ready: AtomicBool,
    stopped: AtomicBool,
    calls: AtomicUsize,
    script: Mutex<VecDeque<Result<Completion, InferenceError>>>,
}

impl ScriptedEngine {
    fn new(script: Vec<Result<&str, InferenceError>>) -> Arc<Self> {
        let script = script
            .into_iter()
            .map(|step| {
                step.map(|text| Completion {
                    text: text.to_string(),
                    token_count: text.split_whitespace().count(),
                })
            })
            .collect();
        Arc::new(Self {
            ready: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            script: Mutex::new(script),
        })
    }

    fn offline() -> Arc<Self> {
        let engine = Self::new(vec![]);
        engine.ready.store(false, Ordering::SeqCst);
        engine
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceEngine for ScriptedEngine {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn generate(&self, _prompt: &str, _max_tokens: u32) -> Result<Completion, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(InferenceError::Generation("script exhausted".into())))
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

fn config(max_attempts: u32) -> CoreConfig {
    CoreConfig {
        retry: RetryPolicy {
            max_attempts,
            retry_delay_ms: 500,
        },
        ..CoreConfig::default()
    }
}

fn slider_store_with(pairs: &[(&str, f32)]) -> ParameterStateStore {
    let mut store = ParameterStateStore::new(Regime::sliders());
    let bounds = store.regime().bounds;
    store.commit(&ParameterMap::bounded(pairs.iter().copied(), bounds));
    store
}

#[tokio::test(start_paused = true)]
async fn success_merges_into_cumulative_state() {
    let engine = ScriptedEngine::new(vec![Ok(
        "Sure! {\"eyeSize\": 1.0, \"noseWidth\": 0.8} Enjoy.",
    )]);
    let sink = Arc::new(MemorySink::new());
    let orchestrator =
        GenerationOrchestrator::new(engine.clone(), config(2)).with_sink(sink.clone());
    let mut store = slider_store_with(&[("eyeSize", 1.3)]);

    let request = MorphRequest::new(FaceRegion::Nose, "narrower nose");
    let outcome = orchestrator.run(&request, &mut store).await;

    assert!(outcome.success);
    assert_eq!(outcome.source, OutcomeSource::Model);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.state.get("eyeSize"), Some(1.3));
    assert_eq!(outcome.state.get("noseWidth"), Some(0.8));
    assert_eq!(outcome.state.len(), 32);
    assert_eq!(&outcome.state, store.current());
    assert!(outcome.chars_consumed > 0);
    assert_eq!(engine.calls(), 1);

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert!(records[0].success);
    assert!(records[0].raw_output.as_deref().unwrap().contains("noseWidth"));
}

#[tokio::test(start_paused = true)]
async fn parse_failure_is_retried_like_generation_failure() {
    let engine = ScriptedEngine::new(vec![
        Ok("I cannot process this request."),
        Ok("{eyeSize: 1.5,}"),
    ]);
    let sink = Arc::new(MemorySink::new());
    let orchestrator =
        GenerationOrchestrator::new(engine.clone(), config(2)).with_sink(sink.clone());
    let mut store = ParameterStateStore::new(Regime::sliders());

    let outcome = orchestrator
        .run(&MorphRequest::new(FaceRegion::Eyes, "bigger eyes"), &mut store)
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(store.current().get("eyeSize"), Some(1.5));
    let records = sink.records();
    assert_eq!(records.len(), 2);
    assert!(!records[0].success);
    assert!(records[1].success);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_leave_state_untouched() {
    let engine = ScriptedEngine::new(vec![
        Err(InferenceError::Generation("model busy".into())),
        Ok("{\"elbowAngle\": 0.4}"),
    ]);
    let orchestrator = GenerationOrchestrator::new(engine.clone(), config(2));
    let mut store = slider_store_with(&[("jawWidth", 0.7)]);
    let before = store.current().clone();

    let outcome = orchestrator
        .run(&MorphRequest::new(FaceRegion::Jaw, "wider jaw"), &mut store)
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(
        outcome.error.as_deref(),
        Some("model output contained no usable parameters")
    );
    assert_eq!(store.current(), &before);
    assert_eq!(outcome.state, before);
    assert_eq!(engine.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn retries_wait_between_attempts() {
    let engine = ScriptedEngine::new(vec![
        Err(InferenceError::Generation("warming up".into())),
        Err(InferenceError::Generation("warming up".into())),
        Err(InferenceError::Generation("still warming".into())),
    ]);
    let orchestrator = GenerationOrchestrator::new(engine.clone(), config(3));
    let mut store = ParameterStateStore::new(Regime::sliders());

    let started = tokio::time::Instant::now();
    let outcome = orchestrator
        .run(&MorphRequest::new(FaceRegion::Eyes, "bigger"), &mut store)
        .await;

    assert!(!outcome.success);
    assert_eq!(
        outcome.error.as_deref(),
        Some("generation failed: still warming")
    );
    assert!(started.elapsed() >= std::time::Duration::from_millis(1000));
    assert_eq!(engine.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_retrying() {
    let engine = ScriptedEngine::new(vec![
        Err(InferenceError::Cancelled),
        Ok("{\"eyeSize\": 1.4}"),
    ]);
    let orchestrator = GenerationOrchestrator::new(engine.clone(), config(3));
    let mut store = ParameterStateStore::new(Regime::sliders());

    let outcome = orchestrator
        .run(&MorphRequest::new(FaceRegion::Eyes, "bigger"), &mut store)
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(engine.calls(), 1);
    assert_eq!(store.current().get("eyeSize"), Some(1.0));
}

#[tokio::test(start_paused = true)]
async fn unavailable_engine_uses_keyword_fallback() {
    let engine = ScriptedEngine::offline();
    let sink = Arc::new(MemorySink::new());
    let orchestrator =
        GenerationOrchestrator::new(engine.clone(), config(2)).with_sink(sink.clone());
    let mut store = ParameterStateStore::new(Regime::sliders());

    let outcome = orchestrator
        .run(
            &MorphRequest::new(FaceRegion::Eyes, "make the eyes bigger"),
            &mut store,
        )
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.source, OutcomeSource::Fallback);
    assert_eq!(engine.calls(), 0);
    assert!((store.current().get("eyeSize").unwrap() - 1.3).abs() < 1e-5);
    assert_eq!(sink.records()[0].source, OutcomeSource::Fallback);
}

#[tokio::test(start_paused = true)]
async fn engine_unloading_mid_request_falls_back() {
    let engine = ScriptedEngine::new(vec![Err(InferenceError::NotLoaded)]);
    let orchestrator = GenerationOrchestrator::new(engine.clone(), config(2));
    let mut store = ParameterStateStore::new(Regime::sliders());

    let outcome = orchestrator
        .run(&MorphRequest::new(FaceRegion::Nose, "smaller nose"), &mut store)
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.source, OutcomeSource::Fallback);
    assert_eq!(outcome.attempts, 2);
    assert!((store.current().get("noseWidth").unwrap() - 0.7).abs() < 1e-5);
}

#[tokio::test(start_paused = true)]
async fn intensity_scales_before_merge() {
    let engine = ScriptedEngine::new(vec![Ok("{\"eyeSize\": 1.2}")]);
    let orchestrator = GenerationOrchestrator::new(engine, config(1));
    let mut store = ParameterStateStore::new(Regime::sliders());

    let request = MorphRequest::new(FaceRegion::Eyes, "bigger eyes").with_intensity(2.0);
    let outcome = orchestrator.run(&request, &mut store).await;

    assert!(outcome.success);
    assert!((store.current().get("eyeSize").unwrap() - 1.4).abs() < 1e-5);
}

#[tokio::test(start_paused = true)]
async fn facade_tracks_history_and_payload() {
    let engine = ScriptedEngine::new(vec![
        Ok("```json\n{'jawOpen': 0.5}\n```"),
        Err(InferenceError::Generation("oom".into())),
    ]);
    let sink = Arc::new(MemorySink::new());
    let mut core = FaceMorphCore::new(
        engine.clone(),
        Regime::open_blendshapes(),
        config(1),
    )
    .with_sink(sink.clone());
    core.update_valid_names(["jawOpen", "eyeBlink_L"]);

    let first = core
        .generate(MorphRequest::new(FaceRegion::Jaw, "open the mouth"))
        .await;
    assert!(first.success);
    assert_eq!(core.render_payload().unwrap(), r#"{"jawOpen":0.5}"#);

    let second = core
        .generate(MorphRequest::new(FaceRegion::Eyes, "blink"))
        .await;
    assert!(!second.success);
    assert_eq!(core.current_state().get("jawOpen"), Some(0.5));

    let history = core.session().history();
    assert_eq!(history.len(), 2);
    assert!(history[0].applied);
    assert!(!history[1].applied);

    core.reset();
    assert_eq!(core.render_payload().unwrap(), "{}");
    assert_eq!(core.session().history().len(), 2);

    core.stop();
    assert!(engine.stopped.load(Ordering::SeqCst));
    assert_eq!(sink.len(), 2);
}
