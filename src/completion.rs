use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{BackendConfig, BackendKind};
use crate::error::{Error, Result};
use crate::process::{ProcessConfig, spawn_and_stream};

const MAX_HTTP_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;

/// Generated text plus whatever usage the provider reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub token_count: Option<u64>,
}

impl Completion {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            token_count: None,
        }
    }
}

pub trait CompletionService {
    /// Produce text for `prompt` under the given system instruction.
    fn complete(
        &self,
        system: &str,
        prompt: &str,
    ) -> impl std::future::Future<Output = Result<Completion>> + Send;

    /// Model identifier recorded in stage metadata.
    fn model(&self) -> &str;
}

/// Claude CLI backend: `claude --print --output-format json`, prompt on stdin.
pub struct ClaudeCompletion {
    binary: String,
    model: Option<String>,
}

#[derive(Deserialize)]
struct ClaudeEnvelope {
    result: String,
    #[serde(default)]
    is_error: bool,
    usage: Option<ClaudeUsage>,
}

#[derive(Deserialize)]
struct ClaudeUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

impl ClaudeCompletion {
    pub fn new(binary: String, model: Option<String>) -> Self {
        Self { binary, model }
    }

    pub fn build_command(&self, system: &str) -> (String, Vec<String>) {
        let mut args = vec![
            "--print".to_string(),
            "--output-format".to_string(),
            "json".to_string(),
            "--system-prompt".to_string(),
            system.to_string(),
        ];

        if let Some(ref model) = self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        (self.binary.clone(), args)
    }
}

/// Read the JSON envelope; plain-text output is taken verbatim.
pub fn parse_claude_output(stdout: &str) -> Result<Completion> {
    match serde_json::from_str::<ClaudeEnvelope>(stdout.trim()) {
        Ok(envelope) if envelope.is_error => Err(Error::Completion(format!(
            "claude reported an error: {}",
            envelope.result
        ))),
        Ok(envelope) => Ok(Completion {
            text: envelope.result,
            token_count: envelope
                .usage
                .map(|u| u.input_tokens + u.output_tokens),
        }),
        Err(e) => {
            debug!(error = %e, "claude output is not a JSON envelope, using raw text");
            Ok(Completion::new(stdout))
        }
    }
}

impl CompletionService for ClaudeCompletion {
    async fn complete(&self, system: &str, prompt: &str) -> Result<Completion> {
        let (command, args) = self.build_command(system);
        let output = spawn_and_stream(ProcessConfig {
            command,
            args,
            working_dir: PathBuf::from("."),
            log_prefix: "claude".to_string(),
            stdin_data: Some(prompt.to_string()),
        })
        .await?;

        check_exit(&output)?;
        parse_claude_output(&output.stdout())
    }

    fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(&self.binary)
    }
}

/// Codex CLI backend: `codex exec`, instruction and prompt on stdin.
pub struct CodexCompletion {
    binary: String,
    model: Option<String>,
}

impl CodexCompletion {
    pub fn new(binary: String, model: Option<String>) -> Self {
        Self { binary, model }
    }

    pub fn build_command(&self) -> (String, Vec<String>) {
        let mut args = vec![
            "exec".to_string(),
            "--full-auto".to_string(),
            "--skip-git-repo-check".to_string(),
        ];

        if let Some(ref model) = self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args.push("-".to_string());

        (self.binary.clone(), args)
    }
}

impl CompletionService for CodexCompletion {
    async fn complete(&self, system: &str, prompt: &str) -> Result<Completion> {
        let (command, args) = self.build_command();
        let output = spawn_and_stream(ProcessConfig {
            command,
            args,
            working_dir: PathBuf::from("."),
            log_prefix: "codex".to_string(),
            stdin_data: Some(format!("{system}\n\n{prompt}")),
        })
        .await?;

        check_exit(&output)?;
        Ok(Completion::new(output.stdout()))
    }

    fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(&self.binary)
    }
}

fn check_exit(output: &crate::process::ProcessOutput) -> Result<()> {
    if let Some(sig) = output.signal {
        return Err(Error::Completion(format!(
            "completion process killed by signal {sig}"
        )));
    }
    if output.exit_code != 0 {
        let stderr = output.stderr_lines.join("\n");
        return Err(Error::Completion(format!(
            "completion process exited with code {}: {}",
            output.exit_code,
            stderr.trim()
        )));
    }
    Ok(())
}

/// OpenAI-compatible chat completions over HTTP.
pub struct HttpCompletion {
    api_base: String,
    api_key_env: String,
    model: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    total_tokens: Option<u64>,
}

impl HttpCompletion {
    pub fn new(api_base: String, api_key_env: String, model: String) -> Self {
        Self {
            api_base,
            api_key_env,
            model,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }

    /// Look up the API key now rather than at startup, so a missing key only
    /// fails the calls that need it.
    pub fn resolve_api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                Error::Completion(format!("API key not found in ${}", self.api_key_env))
            })
    }
}

/// Extract text and usage from a chat completions response body.
pub fn parse_chat_response(body: serde_json::Value) -> Result<Completion> {
    let response: ChatResponse = serde_json::from_value(body)
        .map_err(|e| Error::Completion(format!("unexpected completion response: {e}")))?;
    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| Error::Completion("completion response has no content".to_string()))?;
    Ok(Completion {
        text,
        token_count: response.usage.and_then(|u| u.total_tokens),
    })
}

fn post_chat(url: &str, api_key: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
    let mut backoff_ms = INITIAL_BACKOFF_MS;
    for attempt in 1..=MAX_HTTP_ATTEMPTS {
        match ureq::post(url)
            .set("Authorization", &format!("Bearer {api_key}"))
            .set("Content-Type", "application/json")
            .send_json(body)
        {
            Ok(response) => {
                return response.into_json().map_err(|e| {
                    Error::Completion(format!("failed to read completion response: {e}"))
                });
            }
            Err(ref e) if attempt < MAX_HTTP_ATTEMPTS && is_retryable(e) => {
                warn!(
                    attempt,
                    error = %e,
                    backoff_ms,
                    "retrying completion request after transient error"
                );
                thread::sleep(Duration::from_millis(backoff_ms));
                backoff_ms *= 2;
            }
            Err(e) => {
                return Err(Error::Completion(format!("completion request failed: {e}")));
            }
        }
    }
    Err(Error::Completion(format!(
        "completion request failed after {MAX_HTTP_ATTEMPTS} attempts"
    )))
}

/// Only retry rate-limits (429), server errors (5xx), and transport errors.
fn is_retryable(err: &ureq::Error) -> bool {
    match err {
        ureq::Error::Status(code, _) => *code == 429 || *code >= 500,
        ureq::Error::Transport(_) => true,
    }
}

impl CompletionService for HttpCompletion {
    async fn complete(&self, system: &str, prompt: &str) -> Result<Completion> {
        let api_key = self.resolve_api_key()?;
        let url = self.endpoint();
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt },
            ],
        });

        // ureq is blocking; a stage timeout abandons this thread rather than
        // interrupting it.
        let response = tokio::task::spawn_blocking(move || post_chat(&url, &api_key, &body))
            .await
            .map_err(|e| Error::Completion(format!("completion task failed: {e}")))??;

        parse_chat_response(response)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Enum dispatching to the configured backend.
pub enum AnyCompletion {
    Claude(ClaudeCompletion),
    Codex(CodexCompletion),
    Http(HttpCompletion),
}

impl CompletionService for AnyCompletion {
    async fn complete(&self, system: &str, prompt: &str) -> Result<Completion> {
        match self {
            AnyCompletion::Claude(c) => c.complete(system, prompt).await,
            AnyCompletion::Codex(c) => c.complete(system, prompt).await,
            AnyCompletion::Http(c) => c.complete(system, prompt).await,
        }
    }

    fn model(&self) -> &str {
        match self {
            AnyCompletion::Claude(c) => c.model(),
            AnyCompletion::Codex(c) => c.model(),
            AnyCompletion::Http(c) => c.model(),
        }
    }
}

pub fn build_completion(backend: &BackendConfig) -> AnyCompletion {
    match backend.backend {
        BackendKind::Claude => AnyCompletion::Claude(ClaudeCompletion::new(
            backend.binary.clone(),
            backend.model.clone(),
        )),
        BackendKind::Codex => AnyCompletion::Codex(CodexCompletion::new(
            backend.binary.clone(),
            backend.model.clone(),
        )),
        BackendKind::Http => AnyCompletion::Http(HttpCompletion::new(
            backend.api_base.clone(),
            backend.api_key_env.clone(),
            backend.model.clone().unwrap_or_default(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claude_build_command_defaults() {
        let c = ClaudeCompletion::new("claude".to_string(), None);
        let (cmd, args) = c.build_command("be terse");
        assert_eq!(cmd, "claude");
        assert!(args.contains(&"--print".to_string()));
        assert!(args.contains(&"json".to_string()));
        assert!(args.contains(&"--system-prompt".to_string()));
        assert!(args.contains(&"be terse".to_string()));
        assert!(!args.contains(&"--model".to_string()));
        assert_eq!(c.model(), "claude");
    }

    #[test]
    fn test_claude_build_command_with_model() {
        let c = ClaudeCompletion::new("claude".to_string(), Some("sonnet".to_string()));
        let (_cmd, args) = c.build_command("x");
        assert!(args.contains(&"--model".to_string()));
        assert!(args.contains(&"sonnet".to_string()));
        assert_eq!(c.model(), "sonnet");
    }

    #[test]
    fn test_codex_build_command_reads_stdin() {
        let c = CodexCompletion::new("/usr/local/bin/codex".to_string(), Some("o3".to_string()));
        let (cmd, args) = c.build_command();
        assert_eq!(cmd, "/usr/local/bin/codex");
        assert_eq!(args.first().map(String::as_str), Some("exec"));
        assert_eq!(args.last().map(String::as_str), Some("-"));
        assert!(args.contains(&"o3".to_string()));
    }

    #[test]
    fn test_parse_claude_envelope() {
        let out = r#"{"type":"result","result":"fn add() {}","is_error":false,"usage":{"input_tokens":10,"output_tokens":5}}"#;
        let c = parse_claude_output(out).unwrap();
        assert_eq!(c.text, "fn add() {}");
        assert_eq!(c.token_count, Some(15));
    }

    #[test]
    fn test_parse_claude_error_envelope() {
        let out = r#"{"result":"rate limited","is_error":true}"#;
        let err = parse_claude_output(out).unwrap_err();
        assert!(err.to_string().contains("rate limited"));
    }

    #[test]
    fn test_parse_claude_plain_text_fallback() {
        let c = parse_claude_output("just some code").unwrap();
        assert_eq!(c.text, "just some code");
        assert_eq!(c.token_count, None);
    }

    #[test]
    fn test_parse_chat_response() {
        let body = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "VERDICT: APPROVE" } }],
            "usage": { "total_tokens": 99 }
        });
        let c = parse_chat_response(body).unwrap();
        assert_eq!(c.text, "VERDICT: APPROVE");
        assert_eq!(c.token_count, Some(99));
    }

    #[test]
    fn test_parse_chat_response_without_choices_errors() {
        let body = serde_json::json!({ "choices": [] });
        assert!(parse_chat_response(body).is_err());
        assert!(parse_chat_response(serde_json::json!({"oops": 1})).is_err());
    }

    #[test]
    fn test_http_endpoint_trims_slash() {
        let c = HttpCompletion::new(
            "https://api.example.com/v1/".to_string(),
            "KEY".to_string(),
            "m".to_string(),
        );
        assert_eq!(c.endpoint(), "https://api.example.com/v1/chat/completions");
    }

    #[test]
    #[serial_test::serial]
    fn test_api_key_read_at_call_time() {
        let c = HttpCompletion::new(
            "https://api.example.com/v1".to_string(),
            "REVLOOP_TEST_API_KEY".to_string(),
            "m".to_string(),
        );
        unsafe { std::env::remove_var("REVLOOP_TEST_API_KEY") };
        let err = c.resolve_api_key().unwrap_err();
        assert!(err.to_string().contains("$REVLOOP_TEST_API_KEY"));

        unsafe { std::env::set_var("REVLOOP_TEST_API_KEY", "") };
        assert!(c.resolve_api_key().is_err());

        unsafe { std::env::set_var("REVLOOP_TEST_API_KEY", "sk-test") };
        assert_eq!(c.resolve_api_key().unwrap(), "sk-test");
        unsafe { std::env::remove_var("REVLOOP_TEST_API_KEY") };
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_http_missing_key_fails_without_network() {
        let c = HttpCompletion::new(
            "http://127.0.0.1:9".to_string(),
            "REVLOOP_TEST_MISSING_KEY".to_string(),
            "m".to_string(),
        );
        unsafe { std::env::remove_var("REVLOOP_TEST_MISSING_KEY") };
        let err = c.complete("sys", "prompt").await.unwrap_err();
        assert!(matches!(err, Error::Completion(_)));
    }

    #[test]
    fn test_build_completion_dispatch() {
        let mut backend = BackendConfig::default();
        backend.backend = BackendKind::Codex;
        backend.binary = "codex".to_string();
        assert!(matches!(build_completion(&backend), AnyCompletion::Codex(_)));

        backend.backend = BackendKind::Http;
        backend.model = Some("llama".to_string());
        let any = build_completion(&backend);
        assert!(matches!(any, AnyCompletion::Http(_)));
        assert_eq!(any.model(), "llama");
    }
}
