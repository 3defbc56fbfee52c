//! Pipeline controller: drives the judge→critique→refine loop for one run.
//!
//! ## Lifecycle
//!
//! ```text
//! run_refinement(request, ctx)
//!   → validate request            — no external call before this passes
//!   → loop k = 1..=max_iterations:
//!       judge.evaluate            — score the current solution
//!       critic.critique           — feedback on the weakest criteria
//!       refiner.refine            — produce the next candidate
//!       append IterationRecord(k) — solution := refined output
//!       threshold check           — early Completed
//!   → Completed | Stopped | Failed
//! ```
//!
//! Cancellation is observed between iterations only, never mid-call. A run
//! either fully succeeds (or stops with usable history) or surfaces one
//! classified error — completed records are discarded on failure, never
//! returned as a degraded success.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::client::{HttpTransport, ModelClient, RetryPolicy, RetryingClient, TokioSleeper};
use crate::config::PipelineConfig;
use crate::critic::Critiquer;
use crate::errors::RefineryError;
use crate::judge::Judge;
use crate::prompts;
use crate::refiner::Refiner;
use crate::state::{RunState, RunStateMachine};
use crate::types::{IterationRecord, RefinementRequest, RefinementResult};

// ── Run context ──────────────────────────────────────────────────────────────

/// Per-run context: a correlation id for logs and the cancellation token the
/// caller may trip between iterations.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: String,
    cancel: CancellationToken,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: format!("refine-{}", Uuid::new_v4()),
            cancel: CancellationToken::new(),
        }
    }

    /// Token handle for the caller to cancel the run externally.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

/// Orchestrates one refinement run per `run_refinement` call. Stateless
/// between runs — safe to share behind `Arc` across concurrent callers.
pub struct RefinementPipeline {
    judge: Judge,
    critic: Critiquer,
    refiner: Refiner,
    quality_threshold: Option<f64>,
}

impl RefinementPipeline {
    /// Wire the pipeline onto any model client (real or double).
    pub fn new(client: Arc<dyn ModelClient>, config: &PipelineConfig) -> Self {
        Self {
            judge: Judge::new(client.clone(), config.critique_temperature),
            critic: Critiquer::new(client.clone(), config.critique_temperature),
            refiner: Refiner::new(client, config.solution_temperature),
            quality_threshold: config.quality_threshold,
        }
    }

    /// Wire the pipeline onto the real HTTP transport with retry/backoff.
    pub fn with_http(config: &PipelineConfig) -> Self {
        let transport = Arc::new(HttpTransport::new(config));
        let client = Arc::new(RetryingClient::new(
            transport,
            RetryPolicy::from_config(config),
            Arc::new(TokioSleeper),
        ));
        Self::new(client, config)
    }

    /// Execute one refinement run to completion, cancellation, or failure.
    ///
    /// # Errors
    ///
    /// - [`RefineryError::InvalidRequest`] before any external call when the
    ///   request fails validation.
    /// - [`RefineryError::Cancelled`] when cancellation arrives before the
    ///   first iteration completes (there is no best record to return).
    /// - Any component error, unchanged, after its internal retries.
    pub async fn run_refinement(
        &self,
        request: &RefinementRequest,
        ctx: &RunContext,
    ) -> Result<RefinementResult, RefineryError> {
        let mut machine = RunStateMachine::new();

        if let Err(err) = request.validate() {
            if let Err(illegal) = machine.fail(&err.to_string()) {
                warn!(error = %illegal, "state machine rejected transition");
            }
            error!(run_id = %ctx.run_id, error = %err, "request validation failed");
            return Err(err);
        }
        advance(&mut machine, RunState::Iterating, Some("request validated"));

        let started = Instant::now();
        info!(
            run_id = %ctx.run_id,
            model = %request.model_id,
            max_iterations = request.max_iterations,
            threshold = ?self.quality_threshold,
            prompt_version = prompts::PROMPT_VERSION,
            "refinement run starting"
        );

        let mut solution = request.initial_output.trim().to_string();
        let mut records: Vec<IterationRecord> =
            Vec::with_capacity(request.max_iterations as usize);
        let mut best_idx: usize = 0;
        let mut stagnant_passes: u32 = 0;

        for index in 1..=request.max_iterations {
            if ctx.is_cancelled() {
                return Self::finish_stopped(&mut machine, ctx, records, best_idx);
            }
            machine.set_iteration(index);
            let pass_started = Instant::now();
            info!(
                run_id = %ctx.run_id,
                iteration = index,
                total = request.max_iterations,
                "iteration starting"
            );

            let score = match self
                .judge
                .evaluate(
                    &request.original_prompt,
                    &solution,
                    request.model_id,
                    &request.credential,
                )
                .await
            {
                Ok(score) => score,
                Err(err) => return Self::abort(&mut machine, ctx, records.len(), err),
            };

            let critique = match self
                .critic
                .critique(
                    &request.original_prompt,
                    &solution,
                    &score,
                    request.model_id,
                    &request.credential,
                )
                .await
            {
                Ok(critique) => critique,
                Err(err) => return Self::abort(&mut machine, ctx, records.len(), err),
            };

            let refined = match self
                .refiner
                .refine(
                    &request.original_prompt,
                    &solution,
                    &critique,
                    request.model_id,
                    &request.credential,
                )
                .await
            {
                Ok(refined) => refined,
                Err(err) => return Self::abort(&mut machine, ctx, records.len(), err),
            };

            if refined == solution {
                stagnant_passes += 1;
                warn!(
                    run_id = %ctx.run_id,
                    iteration = index,
                    consecutive = stagnant_passes,
                    "refiner returned its input unchanged (stagnation)"
                );
            } else {
                stagnant_passes = 0;
            }

            records.push(IterationRecord {
                index,
                solution: refined.clone(),
                critique,
                score: score.clone(),
                timestamp: Utc::now(),
            });
            if score.overall > records[best_idx].score.overall {
                best_idx = records.len() - 1;
            }
            solution = refined;

            info!(
                run_id = %ctx.run_id,
                iteration = index,
                overall = score.overall,
                elapsed_ms = pass_started.elapsed().as_millis() as u64,
                "iteration complete"
            );

            if let Some(threshold) = self.quality_threshold {
                if score.overall >= threshold {
                    info!(
                        run_id = %ctx.run_id,
                        iteration = index,
                        overall = score.overall,
                        threshold,
                        "quality threshold reached, stopping early"
                    );
                    break;
                }
            }
        }

        advance(&mut machine, RunState::Completed, Some("iteration loop finished"));

        let last = records
            .last()
            .cloned()
            .expect("validated max_iterations >= 1 yields at least one record");
        info!(
            run_id = %ctx.run_id,
            iterations = records.len(),
            final_overall = last.score.overall,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "refinement run completed"
        );

        Ok(RefinementResult {
            refined_output: last.solution,
            scores: last.score,
            iterations: records,
        })
    }

    fn finish_stopped(
        machine: &mut RunStateMachine,
        ctx: &RunContext,
        records: Vec<IterationRecord>,
        best_idx: usize,
    ) -> Result<RefinementResult, RefineryError> {
        if records.is_empty() {
            let err =
                RefineryError::Cancelled("cancelled before the first iteration completed".into());
            if let Err(illegal) = machine.fail(&err.to_string()) {
                warn!(error = %illegal, "state machine rejected transition");
            }
            return Err(err);
        }

        advance(machine, RunState::Stopped, Some("cancelled by caller"));
        let best = records[best_idx].clone();
        info!(
            run_id = %ctx.run_id,
            completed = records.len(),
            best_iteration = best.index,
            best_overall = best.score.overall,
            "run cancelled, returning best record so far"
        );

        Ok(RefinementResult {
            refined_output: best.solution,
            scores: best.score,
            iterations: records,
        })
    }

    fn abort(
        machine: &mut RunStateMachine,
        ctx: &RunContext,
        completed_records: usize,
        err: RefineryError,
    ) -> Result<RefinementResult, RefineryError> {
        if let Err(illegal) = machine.fail(&err.to_string()) {
            warn!(error = %illegal, "state machine rejected transition");
        }
        error!(
            run_id = %ctx.run_id,
            kind = err.kind(),
            error = %err,
            discarded_records = completed_records,
            "refinement run failed"
        );
        Err(err)
    }
}

fn advance(machine: &mut RunStateMachine, to: RunState, reason: Option<&str>) {
    if let Err(err) = machine.advance(to, reason) {
        warn!(error = %err, "state machine rejected transition");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ModelCall;
    use crate::types::{ApiCredential, ModelId};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Client double consuming a fixed script; each iteration takes three
    /// responses in judge → critique → refine order.
    struct ScriptedClient {
        script: Mutex<VecDeque<String>>,
        calls: AtomicU32,
    }

    impl ScriptedClient {
        fn new(script: Vec<String>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedClient {
        async fn invoke(&self, _call: &ModelCall<'_>) -> Result<String, RefineryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| RefineryError::TransientNetwork("script exhausted".into()))
        }
    }

    fn judge_json(score: f64) -> String {
        format!(
            r#"{{"scores": {{"novelty": {score}, "clarity": {score}, "feasibility": {score}, "correctness": {score}}}}}"#
        )
    }

    fn iteration_script(score: f64, refined: &str) -> Vec<String> {
        vec![
            judge_json(score),
            "IMPROVEMENTS:\n- be more specific\n".to_string(),
            refined.to_string(),
        ]
    }

    fn request(max_iterations: u32) -> RefinementRequest {
        RefinementRequest {
            original_prompt: "Write a haiku about the ocean".into(),
            initial_output: "Ocean waves crash.".into(),
            model_id: ModelId::TestModel,
            credential: ApiCredential::new("sk-test"),
            max_iterations,
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig::default()
    }

    #[tokio::test]
    async fn threshold_stops_after_appending_the_record() {
        let mut script = iteration_script(9.0, "refined v1");
        script.extend(iteration_script(9.5, "refined v2"));
        let client = ScriptedClient::new(script);

        let mut cfg = config();
        cfg.quality_threshold = Some(8.5);
        let pipeline = RefinementPipeline::new(client.clone(), &cfg);

        let result = pipeline
            .run_refinement(&request(5), &RunContext::new())
            .await
            .unwrap();

        // First pass already meets the threshold: one record, three calls.
        assert_eq!(result.iterations.len(), 1);
        assert_eq!(result.refined_output, "refined v1");
        assert!((result.scores.overall - 9.0).abs() < f64::EPSILON);
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn below_threshold_runs_all_iterations() {
        let mut script = iteration_script(5.0, "refined v1");
        script.extend(iteration_script(6.0, "refined v2"));
        let client = ScriptedClient::new(script);

        let mut cfg = config();
        cfg.quality_threshold = Some(8.5);
        let pipeline = RefinementPipeline::new(client, &cfg);

        let result = pipeline
            .run_refinement(&request(2), &RunContext::new())
            .await
            .unwrap();

        assert_eq!(result.iterations.len(), 2);
        assert_eq!(result.refined_output, "refined v2");
    }

    #[tokio::test]
    async fn cancellation_before_start_is_an_error() {
        let client = ScriptedClient::new(Vec::new());
        let pipeline = RefinementPipeline::new(client.clone(), &config());

        let ctx = RunContext::new();
        ctx.cancel();

        let err = pipeline
            .run_refinement(&request(3), &ctx)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "cancelled");
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn stagnant_refiner_output_does_not_fail_the_run() {
        // Refiner echoes the input both passes; run still completes normally.
        let mut script = iteration_script(5.0, "Ocean waves crash.");
        script.extend(iteration_script(5.0, "Ocean waves crash."));
        let client = ScriptedClient::new(script);
        let pipeline = RefinementPipeline::new(client, &config());

        let result = pipeline
            .run_refinement(&request(2), &RunContext::new())
            .await
            .unwrap();

        assert_eq!(result.iterations.len(), 2);
        assert_eq!(result.refined_output, "Ocean waves crash.");
    }

    #[tokio::test]
    async fn component_error_discards_completed_records() {
        // One full pass, then the script runs dry → judge call of pass 2
        // fails with a transient error.
        let client = ScriptedClient::new(iteration_script(5.0, "refined v1"));
        let pipeline = RefinementPipeline::new(client, &config());

        let err = pipeline
            .run_refinement(&request(2), &RunContext::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "transient_network");
    }
}
