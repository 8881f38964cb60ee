use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};
use crate::pipeline::ReviewedCode;

pub const GENERATOR_SYSTEM: &str =
    "You are a code generation specialist. Output only clean, functional code.";
pub const REVIEWER_SYSTEM: &str =
    "You are a senior code reviewer. Provide structured, actionable code reviews.";

const DEFAULT_GENERATE: &str = include_str!("default_prompts/generate.md");
const DEFAULT_REVISE: &str = include_str!("default_prompts/revise.md");
const DEFAULT_REVIEW: &str = include_str!("default_prompts/review.md");
const DEFAULT_FEEDBACK: &str = include_str!("default_prompts/feedback.md");

const TEMPLATES: &[(&str, &str)] = &[
    ("generate", DEFAULT_GENERATE),
    ("revise", DEFAULT_REVISE),
    ("review", DEFAULT_REVIEW),
    ("feedback", DEFAULT_FEEDBACK),
];

/// Prompt templates for every stage, compiled once.
///
/// A file `<override_dir>/<name>.md` replaces the embedded default of the
/// same name.
pub struct PromptEngine {
    engine: upon::Engine<'static>,
}

impl PromptEngine {
    pub fn new(override_dir: Option<&Path>) -> Result<Self> {
        let mut engine = upon::Engine::new();
        for (name, default) in TEMPLATES {
            let source = match override_dir.map(|d| d.join(format!("{name}.md"))) {
                Some(path) if path.exists() => read_override(&path)?,
                _ => (*default).to_string(),
            };
            engine
                .add_template(*name, source)
                .map_err(|e| Error::Prompt(format!("invalid {name} template: {e}")))?;
        }
        Ok(Self { engine })
    }

    /// Render one template with string variables.
    pub fn render(&self, name: &str, vars: &HashMap<&str, &str>) -> Result<String> {
        let template = self
            .engine
            .get_template(name)
            .ok_or_else(|| Error::Prompt(format!("unknown prompt template: {name}")))?;
        template
            .render(vars)
            .to_string()
            .map_err(|e| Error::Prompt(format!("failed to render {name} template: {e}")))
    }

    /// The full generation prompt for `request` (a plain or revision prompt).
    pub fn generation(&self, request: &str) -> Result<String> {
        self.render("generate", &HashMap::from([("request", request)]))
    }

    /// Wrap the current prompt and the previous attempt into a revision request.
    pub fn revision(&self, prompt: &str, previous_code: &str) -> Result<String> {
        self.render(
            "revise",
            &HashMap::from([("prompt", prompt), ("previous_code", previous_code)]),
        )
    }

    pub fn review(&self, prompt: &str, code: &str) -> Result<String> {
        self.render("review", &HashMap::from([("prompt", prompt), ("code", code)]))
    }

    /// Append a review's findings to `prompt` as an "address this feedback" block.
    pub fn with_feedback(&self, prompt: &str, review: &ReviewedCode) -> Result<String> {
        let feedback = feedback_lines(review).join("\n");
        self.render(
            "feedback",
            &HashMap::from([("prompt", prompt), ("feedback", feedback.as_str())]),
        )
    }
}

fn read_override(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        Error::Prompt(format!(
            "failed to read override template {}: {e}",
            path.display()
        ))
    })
}

/// Notes, then security and performance issues, then suggested fixes.
pub fn feedback_lines(review: &ReviewedCode) -> Vec<String> {
    review
        .review_notes
        .iter()
        .cloned()
        .chain(review.security_issues.iter().map(|i| format!("Security: {i}")))
        .chain(
            review
                .performance_issues
                .iter()
                .map(|i| format!("Performance: {i}")),
        )
        .chain(review.suggested_fixes.iter().cloned())
        .collect()
}
