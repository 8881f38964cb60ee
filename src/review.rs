use std::time::{Duration, Instant};

use chrono::Utc;

use crate::audit::AuditLogger;
use crate::completion::CompletionService;
use crate::error::{Error, Result};
use crate::pipeline::{PipelineRequest, RawCode, ReviewMetadata, ReviewedCode};
use crate::prompts::{PromptEngine, REVIEWER_SYSTEM};
use crate::verdict::{DEFAULT_QUALITY_SCORE, Verdict, find_verdict, parse_review};

pub const COMPONENT: &str = "REVIEW";
pub const REVIEW_UNAVAILABLE: &str = "Review system unavailable - manual review recommended";

/// Wraps the reviewer's completion call in a deadline and parses its answer.
///
/// Never fails. Any error becomes a conservative `NEEDS_REVISION` review so
/// the pipeline can keep going.
pub struct ReviewStage<S> {
    service: S,
    timeout: Duration,
    logger: AuditLogger,
}

impl<S: CompletionService> ReviewStage<S> {
    pub fn new(service: S, timeout: Duration, logger: AuditLogger) -> Self {
        Self {
            service,
            timeout,
            logger,
        }
    }

    pub async fn review(
        &self,
        prompts: &PromptEngine,
        raw: &RawCode,
        request: &PipelineRequest,
    ) -> ReviewedCode {
        let started = Instant::now();
        match self.run(prompts, raw, request, started).await {
            Ok(reviewed) => reviewed,
            Err(e) => {
                self.logger.error(
                    &request.request_id,
                    COMPONENT,
                    &format!("Code review failed: {e}"),
                );
                self.fallback(raw, &e, started.elapsed())
            }
        }
    }

    async fn run(
        &self,
        prompts: &PromptEngine,
        raw: &RawCode,
        request: &PipelineRequest,
        started: Instant,
    ) -> Result<ReviewedCode> {
        if raw.code.trim().is_empty() {
            return Err(Error::InvalidInput("no code to review".to_string()));
        }

        let review_prompt = prompts.review(&raw.prompt, &raw.code)?;

        self.logger.log_stage(
            &request.request_id,
            "REVIEW_START",
            &serde_json::json!({ "code": raw.code }),
            None::<&()>,
            Duration::ZERO,
        );

        let completion = tokio::time::timeout(
            self.timeout,
            self.service.complete(REVIEWER_SYSTEM, &review_prompt),
        )
        .await
        .map_err(|_| Error::Timeout {
            stage: "code review",
            after: self.timeout,
        })??;

        let text = completion.text;
        if find_verdict(&text).is_none() {
            self.logger.debug(
                &request.request_id,
                COMPONENT,
                "no verdict in review output, defaulting to NEEDS_REVISION",
            );
        }
        let parsed = parse_review(&text);
        let elapsed = started.elapsed();

        let reviewed = ReviewedCode {
            request_id: raw.request_id.clone(),
            prompt: raw.prompt.clone(),
            code: raw.code.clone(),
            review_notes: vec![text],
            quality_score: parsed.quality_score,
            security_issues: parsed.security_issues,
            performance_issues: parsed.performance_issues,
            verdict: parsed.verdict,
            suggested_fixes: parsed.suggested_fixes,
            metadata: ReviewMetadata {
                reviewer: self.service.model().to_string(),
                review_time_ms: elapsed.as_millis() as u64,
            },
            timestamp: Utc::now(),
        };

        self.logger.log_stage(
            &request.request_id,
            "REVIEW_COMPLETE",
            &raw.code,
            Some(&reviewed),
            elapsed,
        );

        Ok(reviewed)
    }

    fn fallback(&self, raw: &RawCode, error: &Error, elapsed: Duration) -> ReviewedCode {
        ReviewedCode {
            request_id: raw.request_id.clone(),
            prompt: raw.prompt.clone(),
            code: raw.code.clone(),
            review_notes: vec![format!("Review failed: {error}. Proceeding with caution.")],
            quality_score: DEFAULT_QUALITY_SCORE,
            security_issues: vec![REVIEW_UNAVAILABLE.to_string()],
            performance_issues: Vec::new(),
            verdict: Verdict::NeedsRevision,
            suggested_fixes: Vec::new(),
            metadata: ReviewMetadata {
                reviewer: self.service.model().to_string(),
                review_time_ms: elapsed.as_millis() as u64,
            },
            timestamp: Utc::now(),
        }
    }
}
