use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::agent::events::{self, StreamEvent};
use crate::agent::runner::{AgentRequest, AgentRunner};
use crate::agent::templates::{PromptTemplate, TemplateVars};
use crate::artifacts::{ArtifactStore, STDERR_FILE};
use crate::error::{AppError, Result};

/// Normalized result of one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentResult {
    pub success: bool,
    pub events: Vec<StreamEvent>,
    pub final_text: String,
    pub exit_code: Option<i32>,
    /// Where the raw stream was persisted.
    pub artifact: PathBuf,
    pub stderr: String,
}

impl AgentResult {
    /// Turn an unsuccessful invocation into an error naming the stage.
    pub fn require_success(self, stage: &str) -> Result<Self> {
        if self.success {
            return Ok(self);
        }
        let detail = if !self.final_text.trim().is_empty() {
            self.final_text.trim().to_string()
        } else if !self.stderr.trim().is_empty() {
            self.stderr.trim().to_string()
        } else {
            "no output".to_string()
        };
        Err(AppError::Agent(format!(
            "Agent reported failure in stage `{stage}` (exit code {:?}): {detail}",
            self.exit_code
        )))
    }
}

/// Binds the agent runner to one run: its ID, checkout and artifact store.
#[derive(Clone)]
pub struct AgentInvoker {
    runner: Arc<dyn AgentRunner>,
    store: ArtifactStore,
    run_id: String,
    workdir: PathBuf,
}

impl AgentInvoker {
    pub fn new(
        runner: Arc<dyn AgentRunner>,
        store: ArtifactStore,
        run_id: &str,
        workdir: PathBuf,
    ) -> Self {
        Self {
            runner,
            store,
            run_id: run_id.to_string(),
            workdir,
        }
    }

    pub async fn ensure_available(&self) -> Result<()> {
        self.runner.ensure_available().await
    }

    /// Render `template`, run the agent, and persist its raw output.
    ///
    /// The raw stream is written whatever the outcome, including a timeout.
    pub async fn invoke(
        &self,
        stage: &str,
        template: &PromptTemplate,
        vars: &TemplateVars,
        timeout: Duration,
    ) -> Result<AgentResult> {
        let instruction = template.render(vars)?;

        tracing::info!(
            stage,
            template = template.id(),
            timeout_secs = timeout.as_secs(),
            "Invoking agent"
        );

        let request = AgentRequest {
            stage: stage.to_string(),
            instruction,
            workdir: self.workdir.clone(),
            timeout,
        };
        let raw = self.runner.run(&request).await?;

        let mut stream = raw.lines.join("\n");
        if !stream.is_empty() {
            stream.push('\n');
        }
        let artifact = self
            .store
            .write_raw_output(&self.run_id, stage, &stream)
            .await?;
        if !raw.stderr.trim().is_empty() {
            self.store
                .write_once(&self.run_id, stage, STDERR_FILE, raw.stderr.as_bytes())
                .await?;
        }

        if raw.timed_out {
            return Err(AppError::Timeout {
                stage: stage.to_string(),
                timeout,
            });
        }

        let events: Vec<StreamEvent> = raw
            .lines
            .iter()
            .filter_map(|line| StreamEvent::parse_line(line))
            .collect();

        let success = raw.exit_code == Some(0) && events::reported_success(&events) == Some(true);
        let final_text = events::final_text(&events);

        tracing::info!(
            stage,
            success,
            events = events.len(),
            artifact = %artifact.display(),
            "Agent result"
        );

        Ok(AgentResult {
            success,
            events,
            final_text,
            exit_code: raw.exit_code,
            artifact,
            stderr: raw.stderr,
        })
    }
}
