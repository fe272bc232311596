use std::path::{Path, PathBuf};

use super::{append_line, parse_github_slug, Console, EnvMarkers, EnvironmentKind, ExecutionEnvironment};
use crate::error::Result;

const BANNER: &str = "============================================================";

pub struct Jenkins {
    repository: Option<String>,
    build_url: Option<String>,
    properties_file: PathBuf,
    console: Console,
}

impl Jenkins {
    pub fn new(markers: &EnvMarkers, workdir: &Path, console: Console) -> Self {
        let repository = markers
            .get("GIT_URL")
            .map(|url| parse_github_slug(url).unwrap_or_else(|| url.to_string()));

        Self {
            repository,
            build_url: markers.get("BUILD_URL").map(str::to_string),
            properties_file: workdir.join("output.properties"),
            console,
        }
    }
}

impl ExecutionEnvironment for Jenkins {
    fn kind(&self) -> EnvironmentKind {
        EnvironmentKind::Jenkins
    }

    fn repository(&self) -> Option<String> {
        self.repository.clone()
    }

    fn run_url(&self) -> Option<String> {
        self.build_url.clone()
    }

    fn set_output(&self, key: &str, value: &str) -> Result<()> {
        append_line(&self.properties_file, &format!("{key}={}", value.replace('\n', "\\n")))
    }

    fn start_group(&self, name: &str) {
        self.console.line(BANNER);
        self.console.line(format!("  {name}"));
        self.console.line(BANNER);
    }

    fn end_group(&self) {}

    fn warning(&self, message: &str) {
        self.console.line(format!("[WARNING] {message}"));
    }

    fn error(&self, message: &str) {
        self.console.line(format!("[ERROR] {message}"));
    }
}
