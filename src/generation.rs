use std::time::{Duration, Instant};

use chrono::Utc;

use crate::audit::AuditLogger;
use crate::completion::CompletionService;
use crate::error::{Error, Result};
use crate::pipeline::{GenerationMetadata, PipelineRequest, RawCode};
use crate::prompts::{GENERATOR_SYSTEM, PromptEngine};

pub const COMPONENT: &str = "CODE_GEN";

/// Wraps the generator's completion call in a deadline.
///
/// Every failure is recorded in the audit log and returned: without code
/// there is nothing to review, so the caller must stop.
pub struct GenerationStage<S> {
    service: S,
    timeout: Duration,
    logger: AuditLogger,
}

impl<S: CompletionService> GenerationStage<S> {
    pub fn new(service: S, timeout: Duration, logger: AuditLogger) -> Self {
        Self {
            service,
            timeout,
            logger,
        }
    }

    /// Generate code for `request`. With `previous_code`, the prompt becomes a
    /// revision request that embeds the earlier attempt.
    pub async fn generate(
        &self,
        prompts: &PromptEngine,
        request: &PipelineRequest,
        previous_code: Option<&str>,
    ) -> Result<RawCode> {
        let result = self.run(prompts, request, previous_code).await;
        if let Err(ref e) = result {
            self.logger.error(
                &request.request_id,
                COMPONENT,
                &format!("Code generation failed: {e}"),
            );
        }
        result
    }

    async fn run(
        &self,
        prompts: &PromptEngine,
        request: &PipelineRequest,
        previous_code: Option<&str>,
    ) -> Result<RawCode> {
        if request.prompt.trim().is_empty() {
            return Err(Error::InvalidInput("prompt is empty".to_string()));
        }

        let started = Instant::now();
        let body = match previous_code {
            Some(code) => prompts.revision(&request.prompt, code)?,
            None => request.prompt.clone(),
        };
        let full_prompt = prompts.generation(&body)?;

        self.logger.log_stage(
            &request.request_id,
            "CODE_GEN_START",
            &serde_json::json!({
                "prompt": body,
                "revision": previous_code.is_some(),
                "promptLength": full_prompt.len(),
            }),
            None::<&()>,
            Duration::ZERO,
        );

        let completion = tokio::time::timeout(
            self.timeout,
            self.service.complete(GENERATOR_SYSTEM, &full_prompt),
        )
        .await
        .map_err(|_| Error::Timeout {
            stage: "code generation",
            after: self.timeout,
        })??;

        if completion.text.trim().is_empty() {
            return Err(Error::Completion("generator returned no code".to_string()));
        }

        let elapsed = started.elapsed();
        let raw = RawCode {
            request_id: request.request_id.clone(),
            prompt: request.prompt.clone(),
            code: completion.text,
            metadata: GenerationMetadata {
                model: self.service.model().to_string(),
                generation_time_ms: elapsed.as_millis() as u64,
                token_count: completion.token_count,
            },
            timestamp: Utc::now(),
        };

        self.logger.log_stage(
            &request.request_id,
            "CODE_GEN_COMPLETE",
            &body,
            Some(&raw),
            elapsed,
        );

        Ok(raw)
    }
}
