//! Per-run, per-stage storage of raw agent output.
//!
//! Layout: `<root>/<run_id>/<stage>/raw_output.jsonl`, one write-once file per
//! stage. The run directory itself doubles as the run-ID reservation.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};

pub const RAW_OUTPUT_FILE: &str = "raw_output.jsonl";
pub const STDERR_FILE: &str = "stderr.log";
pub const MANIFEST_FILE: &str = "run.json";
pub const EXECUTION_LOG_FILE: &str = "execution.log";
pub const PLAN_FILE: &str = "plan.md";
pub const POST_CHECK_FILE: &str = "post_check.log";

const MAX_ID_ATTEMPTS: usize = 16;

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

/// Short, filename- and URL-safe identifier: the first 8 hex digits of a v4 UUID.
pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }

    pub fn stage_dir(&self, run_id: &str, stage: &str) -> PathBuf {
        self.run_dir(run_id).join(stage)
    }

    pub fn contains_run(&self, run_id: &str) -> bool {
        self.run_dir(run_id).is_dir()
    }

    /// Reserve a fresh run ID by creating its directory.
    ///
    /// `create_dir` fails if the directory exists, so two processes sharing the
    /// same root can never end up with the same ID.
    pub async fn allocate_run_id(&self) -> Result<String> {
        self.allocate_run_id_with(new_run_id).await
    }

    pub async fn allocate_run_id_with(&self, mut generate: impl FnMut() -> String) -> Result<String> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            AppError::Artifact(format!(
                "Failed to create artifacts root {}: {e}",
                self.root.display()
            ))
        })?;

        for _ in 0..MAX_ID_ATTEMPTS {
            let run_id = generate();
            match tokio::fs::create_dir(self.run_dir(&run_id)).await {
                Ok(()) => {
                    tracing::debug!(run_id = %run_id, "Reserved run directory");
                    return Ok(run_id);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    tracing::warn!(run_id = %run_id, "Run ID collision, drawing another");
                }
                Err(e) => {
                    return Err(AppError::Artifact(format!(
                        "Failed to reserve run directory: {e}"
                    )));
                }
            }
        }

        Err(AppError::Artifact(format!(
            "Could not allocate a unique run ID after {MAX_ID_ATTEMPTS} attempts"
        )))
    }

    /// Write a stage file. Fails if the file already exists.
    pub async fn write_once(
        &self,
        run_id: &str,
        stage: &str,
        name: &str,
        contents: &[u8],
    ) -> Result<PathBuf> {
        let dir = self.stage_dir(run_id, stage);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            AppError::Artifact(format!("Failed to create {}: {e}", dir.display()))
        })?;

        let path = dir.join(name);
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| {
                if e.kind() == ErrorKind::AlreadyExists {
                    AppError::Artifact(format!("Artifact already written: {}", path.display()))
                } else {
                    AppError::Artifact(format!("Failed to create {}: {e}", path.display()))
                }
            })?;
        file.write_all(contents).await?;
        file.flush().await?;

        Ok(path)
    }

    pub async fn write_raw_output(&self, run_id: &str, stage: &str, raw: &str) -> Result<PathBuf> {
        self.write_once(run_id, stage, RAW_OUTPUT_FILE, raw.as_bytes())
            .await
    }

    /// Persist the terminal state of a run next to its stage directories.
    pub async fn write_manifest<T: serde::Serialize>(&self, run_id: &str, manifest: &T) -> Result<PathBuf> {
        let path = self.run_dir(run_id).join(MANIFEST_FILE);
        let json = serde_json::to_vec_pretty(manifest)?;
        tokio::fs::write(&path, json).await.map_err(|e| {
            AppError::Artifact(format!("Failed to write {}: {e}", path.display()))
        })?;
        Ok(path)
    }
}
