#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use revloop::audit::AuditLogger;
use revloop::completion::{Completion, CompletionService};
use revloop::error::{Error, Result};
use revloop::orchestrator::{Orchestrator, PipelineSettings};
use revloop::prompts::PromptEngine;
use revloop::store::DiscardStore;

pub enum Reply {
    Text(String),
    Fail(String),
}

pub fn ok(text: impl Into<String>) -> Reply {
    Reply::Text(text.into())
}

pub fn fail(message: impl Into<String>) -> Reply {
    Reply::Fail(message.into())
}

/// A completion service that answers from a script, in order, and records
/// every prompt it was sent. Clones share the script and the record.
#[derive(Clone)]
pub struct Scripted {
    replies: Arc<Mutex<VecDeque<Reply>>>,
    prompts: Arc<Mutex<Vec<String>>>,
    fallback: Option<String>,
    delay: Duration,
    model: &'static str,
}

impl Scripted {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into())),
            prompts: Arc::new(Mutex::new(Vec::new())),
            fallback: None,
            delay: Duration::ZERO,
            model: "scripted",
        }
    }

    /// Answer with `text` forever.
    pub fn always(text: impl Into<String>) -> Self {
        let mut s = Self::new(vec![]);
        s.fallback = Some(text.into());
        s
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_model(mut self, model: &'static str) -> Self {
        self.model = model;
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

impl CompletionService for Scripted {
    async fn complete(&self, _system: &str, prompt: &str) -> Result<Completion> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Reply::Text(text)) => Ok(Completion::new(text)),
            Some(Reply::Fail(msg)) => Err(Error::Completion(msg)),
            None => match &self.fallback {
                Some(text) => Ok(Completion::new(text.clone())),
                None => Err(Error::Completion("script exhausted".to_string())),
            },
        }
    }

    fn model(&self) -> &str {
        self.model
    }
}

/// A reviewer answer in the structured format.
pub fn review_reply(verdict: &str, score: u32) -> String {
    format!(
        "QUALITY_SCORE: {score}\n\
         SECURITY_ISSUES: NONE\n\
         PERFORMANCE_ISSUES: NONE\n\
         REVIEW_NOTES: handle the empty input case\n\
         SUGGESTED_FIXES: add an early return\n\
         VERDICT: {verdict}"
    )
}

pub fn settings(max_iterations: u32) -> PipelineSettings {
    PipelineSettings {
        max_iterations,
        generation_timeout: Duration::from_secs(5),
        review_timeout: Duration::from_secs(5),
    }
}

pub fn orchestrator(
    generator: &Scripted,
    reviewer: &Scripted,
    max_iterations: u32,
) -> Orchestrator<Scripted, Scripted, DiscardStore> {
    Orchestrator::new(
        generator.clone(),
        reviewer.clone(),
        DiscardStore,
        PromptEngine::new(None).unwrap(),
        AuditLogger::new(1000),
        settings(max_iterations),
    )
}
