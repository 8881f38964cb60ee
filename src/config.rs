use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::cli::Cli;
use crate::error::{Error, Result};
use crate::orchestrator::PipelineSettings;

pub const DEFAULT_CONFIG_PATH: &str = "revloop.toml";
pub const DEFAULT_MAX_ITERATIONS: u32 = 3;
pub const DEFAULT_GENERATION_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_REVIEW_TIMEOUT_MS: u64 = 20_000;
pub const DEFAULT_MAX_LOG_BUFFER_SIZE: usize = 1000;
pub const DEFAULT_RESULTS_DIR: &str = ".revloop/results";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Claude,
    Codex,
    Http,
}

impl BackendKind {
    fn default_binary(self) -> &'static str {
        match self {
            BackendKind::Claude | BackendKind::Http => "claude",
            BackendKind::Codex => "codex",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BackendFile {
    pub backend: Option<BackendKind>,
    pub binary: Option<String>,
    pub model: Option<String>,
    pub api_base: Option<String>,
    pub api_key_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub max_iterations: Option<u32>,
    pub generation_timeout_ms: Option<u64>,
    pub review_timeout_ms: Option<u64>,
    pub max_log_buffer_size: Option<usize>,
    pub results_dir: Option<String>,
    pub prompts_dir: Option<String>,
    pub debug_log: Option<bool>,
    pub generator: Option<BackendFile>,
    pub reviewer: Option<BackendFile>,
}

/// One completion backend, fully resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    pub backend: BackendKind,
    pub binary: String,
    pub model: Option<String>,
    pub api_base: String,
    pub api_key_env: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::from_file(BackendFile::default())
    }
}

impl BackendConfig {
    pub fn from_file(file: BackendFile) -> Self {
        let backend = file.backend.unwrap_or_default();
        Self {
            backend,
            binary: file
                .binary
                .unwrap_or_else(|| backend.default_binary().to_string()),
            model: file.model,
            api_base: file
                .api_base
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key_env: file
                .api_key_env
                .unwrap_or_else(|| "OPENAI_API_KEY".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub max_iterations: u32,
    pub generation_timeout: Duration,
    pub review_timeout: Duration,
    pub max_log_buffer_size: usize,
    pub results_dir: PathBuf,
    pub prompts_dir: Option<PathBuf>,
    pub persist: bool,
    pub debug_log: bool,
    pub generator: BackendConfig,
    pub reviewer: BackendConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            generation_timeout: Duration::from_millis(DEFAULT_GENERATION_TIMEOUT_MS),
            review_timeout: Duration::from_millis(DEFAULT_REVIEW_TIMEOUT_MS),
            max_log_buffer_size: DEFAULT_MAX_LOG_BUFFER_SIZE,
            results_dir: PathBuf::from(DEFAULT_RESULTS_DIR),
            prompts_dir: None,
            persist: true,
            debug_log: false,
            generator: BackendConfig::default(),
            reviewer: BackendConfig::default(),
        }
    }
}

impl Config {
    /// Load the config file (explicit path, or `revloop.toml` if present)
    /// and apply CLI overrides.
    pub fn load(cli: &Cli) -> Result<Self> {
        let file_config = match cli.config {
            Some(ref path) => {
                let path = Path::new(path);
                if !path.exists() {
                    return Err(Error::ConfigNotFound(path.to_path_buf()));
                }
                parse_config(&std::fs::read_to_string(path)?)?
            }
            None => {
                let path = Path::new(DEFAULT_CONFIG_PATH);
                if path.exists() {
                    parse_config(&std::fs::read_to_string(path)?)?
                } else {
                    ConfigFile::default()
                }
            }
        };

        let config = merge(file_config, cli);
        validate_backends(&config)?;
        Ok(config)
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            max_iterations: self.max_iterations,
            generation_timeout: self.generation_timeout,
            review_timeout: self.review_timeout,
        }
    }
}

pub fn parse_config(content: &str) -> Result<ConfigFile> {
    let config: ConfigFile = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &ConfigFile) -> Result<()> {
    let positive = [
        ("max_iterations", config.max_iterations.map(u64::from)),
        ("generation_timeout_ms", config.generation_timeout_ms),
        ("review_timeout_ms", config.review_timeout_ms),
        (
            "max_log_buffer_size",
            config.max_log_buffer_size.map(|n| n as u64),
        ),
    ];
    for (name, value) in positive {
        if value == Some(0) {
            return Err(Error::ConfigValidation(format!("{name} must be > 0")));
        }
    }

    Ok(())
}

/// Checks that need the merged view, since CLI flags can fill in a model.
fn validate_backends(config: &Config) -> Result<()> {
    for (name, backend) in [("generator", &config.generator), ("reviewer", &config.reviewer)] {
        if backend.backend == BackendKind::Http && backend.model.is_none() {
            return Err(Error::ConfigValidation(format!(
                "{name}: http backend requires a model"
            )));
        }
    }
    Ok(())
}

pub fn merge(file: ConfigFile, cli: &Cli) -> Config {
    let mut generator = BackendConfig::from_file(file.generator.unwrap_or_default());
    let mut reviewer = BackendConfig::from_file(file.reviewer.unwrap_or_default());
    if let Some(ref model) = cli.generator_model {
        generator.model = Some(model.clone());
    }
    if let Some(ref model) = cli.reviewer_model {
        reviewer.model = Some(model.clone());
    }

    Config {
        max_iterations: cli
            .max_iterations
            .or(file.max_iterations)
            .unwrap_or(DEFAULT_MAX_ITERATIONS),
        generation_timeout: Duration::from_millis(
            cli.generation_timeout_ms
                .or(file.generation_timeout_ms)
                .unwrap_or(DEFAULT_GENERATION_TIMEOUT_MS),
        ),
        review_timeout: Duration::from_millis(
            cli.review_timeout_ms
                .or(file.review_timeout_ms)
                .unwrap_or(DEFAULT_REVIEW_TIMEOUT_MS),
        ),
        max_log_buffer_size: file
            .max_log_buffer_size
            .unwrap_or(DEFAULT_MAX_LOG_BUFFER_SIZE),
        results_dir: PathBuf::from(
            cli.results_dir
                .clone()
                .or(file.results_dir)
                .unwrap_or_else(|| DEFAULT_RESULTS_DIR.to_string()),
        ),
        prompts_dir: cli
            .prompts_dir
            .clone()
            .or(file.prompts_dir)
            .map(PathBuf::from),
        persist: !cli.no_persist,
        debug_log: cli.debug_log || file.debug_log.unwrap_or(false),
        generator,
        reviewer,
    }
}
