use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::LogEntry;
use crate::verdict::Verdict;

/// One incoming job. Immutable: the orchestrator derives a new prompt value
/// per iteration instead of rewriting this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRequest {
    pub request_id: String,
    pub prompt: String,
    /// Per-request override of the configured iteration cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
}

impl PipelineRequest {
    /// Create a request with a freshly generated id.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), prompt)
    }

    pub fn with_id(request_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            prompt: prompt.into(),
            max_iterations: None,
        }
    }

    pub fn max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = Some(max);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationMetadata {
    pub model: String,
    pub generation_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u64>,
}

/// Output of one Generation Stage call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCode {
    pub request_id: String,
    /// The prompt value in force when this code was generated.
    pub prompt: String,
    pub code: String,
    pub metadata: GenerationMetadata,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewMetadata {
    pub reviewer: String,
    pub review_time_ms: u64,
}

/// Output of one Review Stage call, real or synthesized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewedCode {
    pub request_id: String,
    pub prompt: String,
    pub code: String,
    pub review_notes: Vec<String>,
    pub quality_score: u32,
    pub security_issues: Vec<String>,
    pub performance_issues: Vec<String>,
    pub verdict: Verdict,
    #[serde(default)]
    pub suggested_fixes: Vec<String>,
    pub metadata: ReviewMetadata,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IterationAction {
    Approved,
    Retry,
    Failed,
}

impl IterationAction {
    /// Action recorded for an iteration given its verdict and position.
    pub fn for_verdict(verdict: Verdict, iteration: u32, max_iterations: u32) -> Self {
        if verdict == Verdict::Approve {
            IterationAction::Approved
        } else if iteration < max_iterations {
            IterationAction::Retry
        } else {
            IterationAction::Failed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineIteration {
    pub iteration_number: u32,
    pub raw_code: RawCode,
    pub review: ReviewedCode,
    pub action: IterationAction,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStatus {
    Success,
    Failed,
    Partial,
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStatus::Success => write!(f, "SUCCESS"),
            PipelineStatus::Failed => write!(f, "FAILED"),
            PipelineStatus::Partial => write!(f, "PARTIAL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    pub request_id: String,
    pub original_prompt: String,
    pub final_code: String,
    pub iterations: Vec<PipelineIteration>,
    pub status: PipelineStatus,
    pub total_time_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub error_log: Vec<LogEntry>,
}
