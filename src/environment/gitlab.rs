use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{append_line, Console, EnvMarkers, EnvironmentKind, ExecutionEnvironment};
use crate::error::Result;

/// GitLab CI: collapsible sections, dotenv artifact for outputs.
pub struct GitLabCi {
    project_path: Option<String>,
    pipeline_url: Option<String>,
    dotenv_file: PathBuf,
    open_sections: Mutex<Vec<String>>,
    console: Console,
}

impl GitLabCi {
    pub fn new(markers: &EnvMarkers, workdir: &Path, console: Console) -> Self {
        Self {
            project_path: markers.get("CI_PROJECT_PATH").map(str::to_string),
            pipeline_url: markers.get("CI_PIPELINE_URL").map(str::to_string),
            dotenv_file: workdir.join("build.env"),
            open_sections: Mutex::new(Vec::new()),
            console,
        }
    }
}

fn section_id(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

impl ExecutionEnvironment for GitLabCi {
    fn kind(&self) -> EnvironmentKind {
        EnvironmentKind::GitLabCi
    }

    fn repository(&self) -> Option<String> {
        self.project_path.clone()
    }

    fn run_url(&self) -> Option<String> {
        self.pipeline_url.clone()
    }

    fn set_output(&self, key: &str, value: &str) -> Result<()> {
        append_line(&self.dotenv_file, &format!("{key}={}", value.replace('\n', " ")))
    }

    fn start_group(&self, name: &str) {
        let id = section_id(name);
        let now = chrono::Utc::now().timestamp();
        self.console
            .line(format!("\x1b[0Ksection_start:{now}:{id}\r\x1b[0K{name}"));
        if let Ok(mut open) = self.open_sections.lock() {
            open.push(id);
        }
    }

    fn end_group(&self) {
        let id = self
            .open_sections
            .lock()
            .ok()
            .and_then(|mut open| open.pop());
        if let Some(id) = id {
            let now = chrono::Utc::now().timestamp();
            self.console
                .line(format!("\x1b[0Ksection_end:{now}:{id}\r\x1b[0K"));
        }
    }

    fn warning(&self, message: &str) {
        self.console.line(format!("\x1b[33mWARNING: {message}\x1b[0m"));
    }

    fn error(&self, message: &str) {
        self.console.line(format!("\x1b[31mERROR: {message}\x1b[0m"));
    }
}
