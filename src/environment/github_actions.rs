use std::path::PathBuf;

use super::{append_line, Console, EnvMarkers, EnvironmentKind, ExecutionEnvironment};
use crate::error::Result;

/// GitHub Actions runner: workflow commands on stdout, outputs via `$GITHUB_OUTPUT`.
pub struct GitHubActions {
    repository: Option<String>,
    run_url: Option<String>,
    output_file: Option<PathBuf>,
    summary_file: Option<PathBuf>,
    console: Console,
}

impl GitHubActions {
    pub fn new(markers: &EnvMarkers, console: Console) -> Self {
        let repository = markers.get("GITHUB_REPOSITORY").map(str::to_string);
        let server = markers
            .get("GITHUB_SERVER_URL")
            .unwrap_or("https://github.com")
            .trim_end_matches('/');
        let run_url = match (&repository, markers.get("GITHUB_RUN_ID")) {
            (Some(repo), Some(run_id)) => Some(format!("{server}/{repo}/actions/runs/{run_id}")),
            _ => None,
        };

        Self {
            repository,
            run_url,
            output_file: markers.get("GITHUB_OUTPUT").map(PathBuf::from),
            summary_file: markers.get("GITHUB_STEP_SUMMARY").map(PathBuf::from),
            console,
        }
    }
}

/// Workflow command values must stay on one line.
fn escape_value(value: &str) -> String {
    value
        .replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

impl ExecutionEnvironment for GitHubActions {
    fn kind(&self) -> EnvironmentKind {
        EnvironmentKind::GitHubActions
    }

    fn repository(&self) -> Option<String> {
        self.repository.clone()
    }

    fn run_url(&self) -> Option<String> {
        self.run_url.clone()
    }

    fn set_output(&self, key: &str, value: &str) -> Result<()> {
        match &self.output_file {
            Some(path) => append_line(path, &format!("{key}={}", escape_value(value))),
            None => {
                tracing::debug!(key, "GITHUB_OUTPUT not set, dropping output");
                Ok(())
            }
        }
    }

    fn start_group(&self, name: &str) {
        self.console.line(format!("::group::{name}"));
    }

    fn end_group(&self) {
        self.console.line("::endgroup::");
    }

    fn warning(&self, message: &str) {
        self.console
            .line(format!("::warning::{}", escape_value(message)));
    }

    fn error(&self, message: &str) {
        self.console.line(format!("::error::{}", escape_value(message)));
    }

    fn write_summary(&self, markdown: &str) -> Result<()> {
        match &self.summary_file {
            Some(path) => append_line(path, markdown),
            None => Ok(()),
        }
    }
}
