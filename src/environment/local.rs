use std::path::Path;

use git2::Repository;

use super::{parse_github_slug, Console, EnvironmentKind, ExecutionEnvironment};
use crate::error::Result;

const BANNER: &str = "============================================================";

/// Interactive or unknown environment. Outputs are dropped.
pub struct Local {
    repository: Option<String>,
    console: Console,
}

impl Local {
    pub fn new(workdir: &Path, console: Console) -> Self {
        Self {
            repository: origin_slug(workdir),
            console,
        }
    }
}

fn origin_slug(workdir: &Path) -> Option<String> {
    let repo = Repository::discover(workdir).ok()?;
    let remote = repo.find_remote("origin").ok()?;
    let url = remote.url()?;
    Some(parse_github_slug(url).unwrap_or_else(|| url.to_string()))
}

impl ExecutionEnvironment for Local {
    fn kind(&self) -> EnvironmentKind {
        EnvironmentKind::Local
    }

    fn repository(&self) -> Option<String> {
        self.repository.clone()
    }

    fn run_url(&self) -> Option<String> {
        None
    }

    fn set_output(&self, key: &str, value: &str) -> Result<()> {
        tracing::debug!(key, value, "Output");
        Ok(())
    }

    fn start_group(&self, name: &str) {
        self.console.line("");
        self.console.line(BANNER);
        self.console.line(format!("  {name}"));
        self.console.line(BANNER);
    }

    fn end_group(&self) {
        self.console.line(BANNER);
        self.console.line("");
    }

    fn warning(&self, message: &str) {
        self.console.line(format!("WARNING: {message}"));
    }

    fn error(&self, message: &str) {
        self.console.line(format!("ERROR: {message}"));
    }
}
