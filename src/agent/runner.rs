use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::Instant;

use crate::agent::events::{self, StreamEvent};
use crate::config::AgentConfig;
use crate::error::{AppError, Result};

/// One request to the external agent.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub stage: String,
    pub instruction: String,
    pub workdir: PathBuf,
    pub timeout: Duration,
}

/// What came back from the process, before interpretation.
#[derive(Debug, Clone, Default)]
pub struct RawAgentOutput {
    pub lines: Vec<String>,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

/// The thing that actually runs the agent for a stage.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Fail with `ToolUnavailable` if the agent cannot be launched at all.
    async fn ensure_available(&self) -> Result<()>;

    async fn run(&self, request: &AgentRequest) -> Result<RawAgentOutput>;
}

/// Runs the agent CLI as a child process, instruction on stdin.
pub struct CliAgentRunner {
    command: String,
    args: Vec<String>,
}

impl CliAgentRunner {
    pub fn new(command: &str, args: Vec<String>) -> Self {
        Self {
            command: command.to_string(),
            args,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        let mut args = config.args.clone();
        if let Some(model) = &config.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        Self::new(&config.command, args)
    }
}

/// Resolve a command the way the shell would: as a path if it has a
/// separator, otherwise through `PATH`.
pub fn find_executable(command: &str) -> Option<PathBuf> {
    let candidate = Path::new(command);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(command))
        .find(|p| p.is_file())
}

#[async_trait]
impl AgentRunner for CliAgentRunner {
    async fn ensure_available(&self) -> Result<()> {
        match find_executable(&self.command) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "Agent tool found");
                Ok(())
            }
            None => Err(AppError::ToolUnavailable(format!(
                "`{}` was not found on PATH",
                self.command
            ))),
        }
    }

    async fn run(&self, request: &AgentRequest) -> Result<RawAgentOutput> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .current_dir(&request.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::ToolUnavailable(format!("`{}` could not be started: {e}", self.command))
            } else {
                AppError::Agent(format!("Failed to spawn `{}`: {e}", self.command))
            }
        })?;

        tracing::info!(stage = %request.stage, pid = ?child.id(), "Agent started");

        // Feed the instruction from a task so a child that never reads stdin
        // cannot block us on a full pipe.
        if let Some(mut stdin) = child.stdin.take() {
            let instruction = request.instruction.clone();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(instruction.as_bytes()).await {
                    tracing::debug!(error = %e, "Agent closed stdin early");
                }
            });
        }

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Agent("Agent stdout was not piped".to_string()))?;

        // One deadline covers stdout, the exit status and the stderr drain.
        let deadline = Instant::now() + request.timeout;
        let mut output = RawAgentOutput::default();
        let collected = tokio::time::timeout_at(
            deadline,
            collect_stdout(&mut child, stdout, &request.stage, &mut output.lines),
        )
        .await;

        match collected {
            Ok(Ok(code)) => {
                output.exit_code = code;
                if let Some(task) = stderr_task {
                    let abort = task.abort_handle();
                    match tokio::time::timeout_at(deadline, task).await {
                        Ok(stderr) => output.stderr = stderr.unwrap_or_default(),
                        Err(_) => {
                            // The agent exited but something it spawned still holds stderr.
                            tracing::warn!(
                                stage = %request.stage,
                                timeout_secs = request.timeout.as_secs(),
                                "Agent output still open at deadline"
                            );
                            abort.abort();
                            output.timed_out = true;
                        }
                    }
                }
            }
            Ok(Err(e)) => {
                return Err(AppError::Agent(format!("Failed reading agent output: {e}")));
            }
            Err(_) => {
                tracing::warn!(
                    stage = %request.stage,
                    timeout_secs = request.timeout.as_secs(),
                    "Agent timed out, killing"
                );
                output.timed_out = true;
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "Failed to kill agent process");
                }
                // Grandchildren may still hold stderr open.
                if let Some(task) = stderr_task {
                    task.abort();
                }
            }
        }

        tracing::info!(
            stage = %request.stage,
            exit_code = ?output.exit_code,
            lines = output.lines.len(),
            timed_out = output.timed_out,
            "Agent finished"
        );

        Ok(output)
    }
}

async fn collect_stdout(
    child: &mut Child,
    stdout: ChildStdout,
    stage: &str,
    lines: &mut Vec<String>,
) -> std::io::Result<Option<i32>> {
    let mut reader = BufReader::new(stdout).lines();
    while let Some(line) = reader.next_line().await? {
        if let Some(event) = StreamEvent::parse_line(&line) {
            tracing::debug!(stage, event = %events::describe(&event), "Agent event");
        }
        lines.push(line);
    }
    let status = child.wait().await?;
    Ok(status.code())
}
