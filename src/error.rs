use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    ConfigValidation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("prompt error: {0}")]
    Prompt(String),

    #[error("process error: {0}")]
    Process(String),

    #[error("completion error: {0}")]
    Completion(String),

    #[error("{stage} timed out after {}ms", after.as_millis())]
    Timeout { stage: &'static str, after: Duration },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("persistence error: {0}")]
    Persistence(String),
}

pub type Result<T> = std::result::Result<T, Error>;
