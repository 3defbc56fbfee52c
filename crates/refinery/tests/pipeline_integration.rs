//! End-to-end pipeline tests using in-process scripted doubles — no network,
//! no live model endpoint required.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use refinery::{
    ApiCredential, ModelCall, ModelClient, ModelId, ModelTransport, PipelineConfig,
    RefineryError, RefinementPipeline, RefinementRequest, RefinementResult, RetryPolicy,
    RetryingClient, RunContext, Sleeper,
};

// ── Helpers ──────────────────────────────────────────────────────────────────

fn judge_json(scores: [f64; 4]) -> String {
    let [novelty, clarity, feasibility, correctness] = scores;
    format!(
        r#"{{"scores": {{"novelty": {novelty}, "clarity": {clarity}, "feasibility": {feasibility}, "correctness": {correctness}}}}}"#
    )
}

/// Three responses for one full pass: judge, critique, refine.
fn pass(overall: f64, refined: &str) -> Vec<String> {
    vec![
        judge_json([overall; 4]),
        "IMPROVEMENTS:\n- sharpen the imagery\n- vary the rhythm\n".to_string(),
        refined.to_string(),
    ]
}

fn haiku_request(max_iterations: u32) -> RefinementRequest {
    RefinementRequest {
        original_prompt: "Write a haiku about the ocean".into(),
        initial_output: "Ocean waves crash.".into(),
        model_id: ModelId::TestModel,
        credential: ApiCredential::new("sk-test"),
        max_iterations,
    }
}

fn no_threshold_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.quality_threshold = None;
    config
}

// ── Scripted model client ────────────────────────────────────────────────────

/// Serves a fixed response script and counts invocations. Optionally trips a
/// run's cancellation token after a set number of calls, emulating a caller
/// cancelling while an iteration is in flight (observed at the next
/// iteration boundary).
struct ScriptedClient {
    script: Mutex<VecDeque<String>>,
    calls: AtomicU32,
    cancel_after: Option<(u32, RunContext)>,
}

impl ScriptedClient {
    fn new(script: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
            cancel_after: None,
        })
    }

    fn cancelling_after(script: Vec<String>, calls: u32, ctx: &RunContext) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
            cancel_after: Some((calls, ctx.clone())),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    async fn invoke(&self, _call: &ModelCall<'_>) -> Result<String, RefineryError> {
        let seen = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, ctx)) = &self.cancel_after {
            if seen == *after {
                ctx.cancel();
            }
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| RefineryError::TransientNetwork("script exhausted".into()))
    }
}

// ── Iteration-count and ordering properties ──────────────────────────────────

#[tokio::test]
async fn runs_exactly_max_iterations_without_threshold() {
    let mut script = Vec::new();
    for i in 1..=4 {
        script.extend(pass(5.0 + i as f64 * 0.5, &format!("refined v{i}")));
    }
    let client = ScriptedClient::new(script);
    let pipeline = RefinementPipeline::new(client.clone(), &no_threshold_config());

    let result = pipeline
        .run_refinement(&haiku_request(4), &RunContext::new())
        .await
        .unwrap();

    assert_eq!(result.iterations.len(), 4);
    for (i, record) in result.iterations.iter().enumerate() {
        assert_eq!(record.index as usize, i + 1);
    }
    // Three calls per iteration, none skipped.
    assert_eq!(client.calls(), 12);
}

#[tokio::test]
async fn every_report_overall_is_mean_of_details() {
    let mut script = Vec::new();
    script.extend(pass(4.0, "v1"));
    // Uneven criterion scores: mean is 6.5.
    script.push(judge_json([8.0, 6.0, 5.0, 7.0]));
    script.push("IMPROVEMENTS:\n- tighten\n".to_string());
    script.push("v2".to_string());
    let client = ScriptedClient::new(script);
    let pipeline = RefinementPipeline::new(client, &no_threshold_config());

    let result = pipeline
        .run_refinement(&haiku_request(2), &RunContext::new())
        .await
        .unwrap();

    for record in &result.iterations {
        let mean: f64 =
            record.score.details.values().sum::<f64>() / record.score.details.len() as f64;
        assert!((record.score.overall - mean).abs() < 1e-9, "iteration {}", record.index);
    }
    assert!((result.iterations[1].score.overall - 6.5).abs() < 1e-9);
}

// ── End-to-end scenario ──────────────────────────────────────────────────────

#[tokio::test]
async fn haiku_scenario_two_iterations() {
    let mut script = pass(6.0, "Salt wind over waves");
    script.extend(pass(7.5, "Salt wind over waves\nGulls wheel through the silver spray\nTide erases all"));
    let client = ScriptedClient::new(script);
    let pipeline = RefinementPipeline::new(client, &no_threshold_config());

    let result = pipeline
        .run_refinement(&haiku_request(2), &RunContext::new())
        .await
        .unwrap();

    assert_eq!(result.iterations.len(), 2);
    assert_eq!(result.refined_output, result.iterations[1].solution);
    assert!(
        (result.scores.overall - result.iterations[1].score.overall).abs() < f64::EPSILON
    );
}

#[tokio::test]
async fn result_shape_round_trips_through_json() {
    let mut script = pass(6.0, "v1");
    script.extend(pass(8.0, "v2"));
    let client = ScriptedClient::new(script);
    let pipeline = RefinementPipeline::new(client, &no_threshold_config());

    let result = pipeline
        .run_refinement(&haiku_request(2), &RunContext::new())
        .await
        .unwrap();

    let json = serde_json::to_string(&result).unwrap();
    let restored: RefinementResult = serde_json::from_str(&json).unwrap();
    assert_eq!(restored.refined_output, result.refined_output);
    assert_eq!(restored.iterations.len(), result.iterations.len());
    for (a, b) in restored.iterations.iter().zip(&result.iterations) {
        assert_eq!(a.index, b.index);
        assert_eq!(a.solution, b.solution);
        assert_eq!(a.critique, b.critique);
        assert_eq!(a.score, b.score);
    }
    assert_eq!(restored.scores, result.scores);
}

// ── Validation fails before any external call ────────────────────────────────

#[tokio::test]
async fn missing_initial_output_makes_no_calls() {
    let client = ScriptedClient::new(Vec::new());
    let pipeline = RefinementPipeline::new(client.clone(), &no_threshold_config());

    let mut request = haiku_request(2);
    request.initial_output = "   ".into();

    let err = pipeline
        .run_refinement(&request, &RunContext::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "invalid_request");
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn zero_max_iterations_makes_no_calls() {
    let client = ScriptedClient::new(Vec::new());
    let pipeline = RefinementPipeline::new(client.clone(), &no_threshold_config());

    let err = pipeline
        .run_refinement(&haiku_request(0), &RunContext::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "invalid_request");
    assert_eq!(client.calls(), 0);
}

// ── Cancellation returns the best record so far ──────────────────────────────

#[tokio::test]
async fn cancellation_returns_highest_scoring_record() {
    let ctx = RunContext::new();
    // Iteration 1 scores 7.0, iteration 2 scores 5.0; cancellation trips on
    // the last call of iteration 2, so it is observed before iteration 3.
    let mut script = pass(7.0, "strong draft");
    script.extend(pass(5.0, "weaker draft"));
    let client = ScriptedClient::cancelling_after(script, 6, &ctx);
    let pipeline = RefinementPipeline::new(client.clone(), &no_threshold_config());

    let result = pipeline
        .run_refinement(&haiku_request(4), &ctx)
        .await
        .unwrap();

    assert_eq!(result.iterations.len(), 2);
    assert_eq!(result.refined_output, "strong draft");
    assert!((result.scores.overall - 7.0).abs() < f64::EPSILON);
    // Iteration 3 never started.
    assert_eq!(client.calls(), 6);
}

#[tokio::test]
async fn cancellation_before_first_iteration_is_cancelled_error() {
    let ctx = RunContext::new();
    ctx.cancel();
    let client = ScriptedClient::new(Vec::new());
    let pipeline = RefinementPipeline::new(client.clone(), &no_threshold_config());

    let err = pipeline
        .run_refinement(&haiku_request(2), &ctx)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "cancelled");
    assert_eq!(client.calls(), 0);
}

// ── Failure aborts the whole run ─────────────────────────────────────────────

#[tokio::test]
async fn unrecovered_error_discards_history() {
    // One good pass, then the judge call of pass 2 fails and stays failed.
    let client = ScriptedClient::new(pass(6.0, "v1"));
    let pipeline = RefinementPipeline::new(client, &no_threshold_config());

    let err = pipeline
        .run_refinement(&haiku_request(2), &RunContext::new())
        .await
        .unwrap_err();

    // The caller gets a classified error, not a partial result.
    assert_eq!(err.kind(), "transient_network");
}

// ── Judge parse recovery through the full pipeline ───────────────────────────

#[tokio::test]
async fn malformed_judge_response_recovers_on_reask() {
    let script = vec![
        "I'd give this roughly an 8.".to_string(),
        judge_json([8.0; 4]),
        "IMPROVEMENTS:\n- minor polish\n".to_string(),
        "refined v1".to_string(),
    ];
    let client = ScriptedClient::new(script);
    let pipeline = RefinementPipeline::new(client.clone(), &no_threshold_config());

    let result = pipeline
        .run_refinement(&haiku_request(1), &RunContext::new())
        .await
        .unwrap();

    assert_eq!(result.iterations.len(), 1);
    // One extra judge call for the strict-format re-ask.
    assert_eq!(client.calls(), 4);
}

#[tokio::test]
async fn two_malformed_judge_responses_fail_the_run() {
    let script = vec!["not json".to_string(), "still not json".to_string()];
    let client = ScriptedClient::new(script);
    let pipeline = RefinementPipeline::new(client, &no_threshold_config());

    let err = pipeline
        .run_refinement(&haiku_request(1), &RunContext::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "evaluation_parse");
}

// ── Retry/backoff wired through the real client ──────────────────────────────

/// Transport double: errors first, then well-formed responses.
struct FlakyTransport {
    script: Mutex<VecDeque<Result<String, RefineryError>>>,
    sends: AtomicU32,
}

#[async_trait]
impl ModelTransport for FlakyTransport {
    async fn send(&self, _call: &ModelCall<'_>) -> Result<String, RefineryError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(RefineryError::TransientNetwork("script exhausted".into())))
    }
}

struct NoopSleeper;

#[async_trait]
impl Sleeper for NoopSleeper {
    async fn sleep(&self, _delay: Duration) {}
}

#[tokio::test]
async fn transient_judge_failures_are_retried_inside_the_client() {
    let script: VecDeque<Result<String, RefineryError>> = vec![
        Err(RefineryError::RateLimited("429".into())),
        Err(RefineryError::ModelUnavailable("502".into())),
        Ok(judge_json([6.0; 4])),
        Ok("IMPROVEMENTS:\n- polish\n".to_string()),
        Ok("refined v1".to_string()),
    ]
    .into();
    let transport = Arc::new(FlakyTransport {
        script: Mutex::new(script),
        sends: AtomicU32::new(0),
    });

    let policy = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(10),
    };
    let client = Arc::new(RetryingClient::new(
        transport.clone(),
        policy,
        Arc::new(NoopSleeper),
    ));
    let pipeline = RefinementPipeline::new(client, &no_threshold_config());

    let result = pipeline
        .run_refinement(&haiku_request(1), &RunContext::new())
        .await
        .unwrap();

    assert_eq!(result.refined_output, "refined v1");
    // Two failed sends + three successful ones.
    assert_eq!(transport.sends.load(Ordering::SeqCst), 5);
}
