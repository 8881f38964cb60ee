use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::pipeline::PipelineResult;

/// Where finished pipeline results go. Called once per request, best effort.
pub trait ResultStore {
    fn persist(
        &self,
        result: &PipelineResult,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Writes each result to `<dir>/<request_id>.json`.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path for a request id. Ids containing path separators are rejected.
    pub fn result_path(&self, request_id: &str) -> Result<PathBuf> {
        if request_id.is_empty()
            || request_id.contains(['/', '\\'])
            || request_id == "."
            || request_id == ".."
        {
            return Err(Error::Persistence(format!(
                "request id not usable as a file name: {request_id:?}"
            )));
        }
        Ok(self.dir.join(format!("{request_id}.json")))
    }

    pub fn load(&self, request_id: &str) -> Result<PipelineResult> {
        let path = self.result_path(request_id)?;
        let content = std::fs::read_to_string(&path).map_err(|e| {
            Error::Persistence(format!("failed to read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Persistence(format!("corrupted result {}: {e}", path.display())))
    }
}

impl ResultStore for JsonFileStore {
    async fn persist(&self, result: &PipelineResult) -> Result<()> {
        let path = self.result_path(&result.request_id)?;
        let content = serde_json::to_string_pretty(result)
            .map_err(|e| Error::Persistence(format!("failed to serialize result: {e}")))?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::Persistence(format!("failed to create results dir: {e}")))?;
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| Error::Persistence(format!("failed to write {}: {e}", path.display())))?;

        debug!(path = %path.display(), "persisted pipeline result");
        Ok(())
    }
}

/// Accepts results and keeps nothing.
pub struct DiscardStore;

impl ResultStore for DiscardStore {
    async fn persist(&self, _result: &PipelineResult) -> Result<()> {
        Ok(())
    }
}
