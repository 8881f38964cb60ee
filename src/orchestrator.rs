use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, warn};

use crate::audit::AuditLogger;
use crate::completion::CompletionService;
use crate::config::{
    DEFAULT_GENERATION_TIMEOUT_MS, DEFAULT_MAX_ITERATIONS, DEFAULT_REVIEW_TIMEOUT_MS,
};
use crate::generation::GenerationStage;
use crate::pipeline::{
    GenerationMetadata, IterationAction, PipelineIteration, PipelineRequest, PipelineResult,
    PipelineStatus, RawCode, ReviewedCode,
};
use crate::prompts::PromptEngine;
use crate::review::ReviewStage;
use crate::store::ResultStore;
use crate::verdict::Verdict;

const ORCHESTRATION: &str = "ORCHESTRATION";
const PERSISTENCE: &str = "PERSISTENCE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub max_iterations: u32,
    pub generation_timeout: Duration,
    pub review_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            generation_timeout: Duration::from_millis(DEFAULT_GENERATION_TIMEOUT_MS),
            review_timeout: Duration::from_millis(DEFAULT_REVIEW_TIMEOUT_MS),
        }
    }
}

/// Where a single request stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Working on the given 1-based iteration.
    Running(u32),
    Approved,
    /// Out of iterations, or rejected outright, with code in hand.
    Exhausted,
    /// Generation failed; nothing more can happen.
    Aborted,
}

impl PipelineState {
    /// State after iteration `n` of `max` received `verdict`.
    ///
    /// `REJECT` ends the run even when iterations remain.
    pub fn after_review(verdict: Verdict, n: u32, max: u32) -> Self {
        match verdict {
            Verdict::Approve => PipelineState::Approved,
            Verdict::NeedsRevision if n < max => PipelineState::Running(n + 1),
            Verdict::NeedsRevision | Verdict::Reject => PipelineState::Exhausted,
        }
    }

    /// Final status; `None` while still running.
    pub fn status(self) -> Option<PipelineStatus> {
        match self {
            PipelineState::Running(_) => None,
            PipelineState::Approved => Some(PipelineStatus::Success),
            PipelineState::Exhausted => Some(PipelineStatus::Partial),
            PipelineState::Aborted => Some(PipelineStatus::Failed),
        }
    }
}

/// Observer for pipeline progress.
pub trait PipelineReporter: Send + Sync {
    fn pipeline_started(&self, request: &PipelineRequest, max_iterations: u32);
    fn iteration_started(&self, request_id: &str, iteration: u32, max_iterations: u32);
    fn iteration_complete(&self, request_id: &str, iteration: &PipelineIteration);
    fn pipeline_finished(&self, result: &PipelineResult);
}

/// Default reporter that prints to stderr.
pub struct StderrReporter;

impl PipelineReporter for StderrReporter {
    fn pipeline_started(&self, request: &PipelineRequest, max_iterations: u32) {
        eprintln!(
            "[revloop] {} started (up to {max_iterations} iterations)",
            request.request_id
        );
    }

    fn iteration_started(&self, request_id: &str, iteration: u32, max_iterations: u32) {
        eprintln!("[revloop] {request_id} iteration {iteration}/{max_iterations}: generating");
    }

    fn iteration_complete(&self, request_id: &str, iteration: &PipelineIteration) {
        eprintln!(
            "[revloop] {request_id} iteration {}: {} (score {})",
            iteration.iteration_number, iteration.review.verdict, iteration.review.quality_score
        );
    }

    fn pipeline_finished(&self, result: &PipelineResult) {
        eprintln!(
            "[revloop] {} finished: {} after {} iteration(s) in {}ms",
            result.request_id,
            result.status,
            result.iterations.len(),
            result.total_time_ms
        );
    }
}

/// Drives generate → review → decide until approval, rejection, exhaustion
/// or a generation failure.
///
/// Requests are independent; one orchestrator may run many concurrently.
/// They share only the audit logger.
pub struct Orchestrator<G, R, S, P = StderrReporter> {
    generation: GenerationStage<G>,
    review: ReviewStage<R>,
    store: S,
    prompts: PromptEngine,
    logger: AuditLogger,
    settings: PipelineSettings,
    reporter: P,
}

impl<G: CompletionService, R: CompletionService, S: ResultStore> Orchestrator<G, R, S> {
    pub fn new(
        generator: G,
        reviewer: R,
        store: S,
        prompts: PromptEngine,
        logger: AuditLogger,
        settings: PipelineSettings,
    ) -> Self {
        Self::with_reporter(
            generator,
            reviewer,
            store,
            prompts,
            logger,
            settings,
            StderrReporter,
        )
    }
}

impl<G: CompletionService, R: CompletionService, S: ResultStore, P: PipelineReporter>
    Orchestrator<G, R, S, P>
{
    #[allow(clippy::too_many_arguments)]
    pub fn with_reporter(
        generator: G,
        reviewer: R,
        store: S,
        prompts: PromptEngine,
        logger: AuditLogger,
        settings: PipelineSettings,
        reporter: P,
    ) -> Self {
        Self {
            generation: GenerationStage::new(generator, settings.generation_timeout, logger.clone()),
            review: ReviewStage::new(reviewer, settings.review_timeout, logger.clone()),
            store,
            prompts,
            logger,
            settings,
            reporter,
        }
    }

    pub fn logger(&self) -> &AuditLogger {
        &self.logger
    }

    pub async fn run_pipeline(&self, request_id: &str, prompt: &str) -> PipelineResult {
        self.run(PipelineRequest::with_id(request_id, prompt)).await
    }

    /// Run one request to a terminal state and persist the result.
    ///
    /// Always returns a result; a generation failure shows up as
    /// `PipelineStatus::Failed` with the cause in `error_log`.
    pub async fn run(&self, request: PipelineRequest) -> PipelineResult {
        let started = Instant::now();
        let request_id = request.request_id.clone();
        let original_prompt = request.prompt.clone();
        let max = request
            .max_iterations
            .unwrap_or(self.settings.max_iterations)
            .max(1);

        self.logger.log_stage(
            &request_id,
            "PIPELINE_START",
            &request,
            None::<&()>,
            Duration::ZERO,
        );
        self.reporter.pipeline_started(&request, max);

        let mut iterations: Vec<PipelineIteration> = Vec::new();
        let mut current = request;
        let mut state = PipelineState::Running(1);

        while let PipelineState::Running(n) = state {
            self.logger.log_stage(
                &request_id,
                &format!("ITERATION_{n}_START"),
                &serde_json::json!({ "iteration": n, "prompt": current.prompt }),
                None::<&()>,
                Duration::ZERO,
            );
            self.reporter.iteration_started(&request_id, n, max);

            let previous_code = iterations.last().map(|it| it.raw_code.code.as_str());
            let raw = match self
                .generation
                .generate(&self.prompts, &current, previous_code)
                .await
            {
                Ok(raw) => raw,
                Err(e) => {
                    self.logger.error(
                        &request_id,
                        ORCHESTRATION,
                        &format!("Pipeline aborted at iteration {n}: {e}"),
                    );
                    state = PipelineState::Aborted;
                    break;
                }
            };

            let review = self.review.review(&self.prompts, &raw, &current).await;
            let verdict = review.verdict;
            let iteration = PipelineIteration {
                iteration_number: n,
                raw_code: raw,
                review,
                action: IterationAction::for_verdict(verdict, n, max),
                timestamp: Utc::now(),
            };

            self.logger.log_stage(
                &request_id,
                &format!("ITERATION_{n}_COMPLETE"),
                &iteration,
                None::<&()>,
                Duration::ZERO,
            );
            self.reporter.iteration_complete(&request_id, &iteration);

            state = PipelineState::after_review(verdict, n, max);
            if let PipelineState::Running(_) = state {
                // Each revision re-embeds the latest feedback on top of the
                // prompt that produced it.
                match self.prompts.with_feedback(&current.prompt, &iteration.review) {
                    Ok(prompt) => current = PipelineRequest { prompt, ..current },
                    Err(e) => {
                        self.logger.error(
                            &request_id,
                            ORCHESTRATION,
                            &format!("failed to build revision prompt: {e}"),
                        );
                        state = PipelineState::Aborted;
                    }
                }
            }
            iterations.push(iteration);
        }

        let status = state.status().unwrap_or(PipelineStatus::Failed);
        let total_time = started.elapsed();
        self.logger.log_stage(
            &request_id,
            "PIPELINE_COMPLETE",
            &serde_json::json!({ "status": status, "iterations": iterations.len() }),
            None::<&()>,
            total_time,
        );

        let result = PipelineResult {
            request_id: request_id.clone(),
            original_prompt,
            final_code: iterations
                .last()
                .map(|it| it.raw_code.code.clone())
                .unwrap_or_default(),
            iterations,
            status,
            total_time_ms: total_time.as_millis() as u64,
            timestamp: Utc::now(),
            error_log: self.logger.errors_for_request(&request_id),
        };

        info!(
            request_id = %result.request_id,
            status = %result.status,
            iterations = result.iterations.len(),
            total_ms = result.total_time_ms,
            "pipeline finished"
        );

        // The result is final; a storage failure is only reported.
        if let Err(e) = self.store.persist(&result).await {
            warn!(request_id = %request_id, error = %e, "failed to persist pipeline result");
            self.logger.error(
                &request_id,
                PERSISTENCE,
                &format!("failed to persist pipeline result: {e}"),
            );
        }

        self.reporter.pipeline_finished(&result);
        result
    }

    /// Review caller-supplied code once, without generating anything.
    pub async fn run_review_only(
        &self,
        request_id: &str,
        prompt: &str,
        code: &str,
    ) -> ReviewedCode {
        let request = PipelineRequest::with_id(request_id, prompt);
        let raw = RawCode {
            request_id: request.request_id.clone(),
            prompt: request.prompt.clone(),
            code: code.to_string(),
            metadata: GenerationMetadata {
                model: "external".to_string(),
                generation_time_ms: 0,
                token_count: None,
            },
            timestamp: Utc::now(),
        };
        self.review.review(&self.prompts, &raw, &request).await
    }
}
