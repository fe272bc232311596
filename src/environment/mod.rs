pub mod console;
pub mod github_actions;
pub mod gitlab;
pub mod jenkins;
pub mod local;

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use crate::error::{AppError, Result};

pub use console::Console;

/// Environment variables that influence adapter selection and behaviour.
const MARKER_VARS: &[&str] = &[
    "GITHUB_ACTIONS",
    "GITHUB_REPOSITORY",
    "GITHUB_RUN_ID",
    "GITHUB_SERVER_URL",
    "GITHUB_OUTPUT",
    "GITHUB_STEP_SUMMARY",
    "JENKINS_HOME",
    "GIT_URL",
    "BUILD_URL",
    "GITLAB_CI",
    "CI_PROJECT_PATH",
    "CI_PIPELINE_URL",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentKind {
    GitHubActions,
    Jenkins,
    GitLabCi,
    Local,
}

impl std::fmt::Display for EnvironmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EnvironmentKind::GitHubActions => "github-actions",
            EnvironmentKind::Jenkins => "jenkins",
            EnvironmentKind::GitLabCi => "gitlab-ci",
            EnvironmentKind::Local => "local",
        };
        f.write_str(name)
    }
}

/// The capabilities the pipeline needs from whatever is running it.
pub trait ExecutionEnvironment: Send + Sync {
    fn kind(&self) -> EnvironmentKind;

    /// Durable repository identifier (`owner/repo`), if known.
    fn repository(&self) -> Option<String>;

    /// Link to the current CI run, if any.
    fn run_url(&self) -> Option<String>;

    /// Emit a keyed output value for downstream steps.
    fn set_output(&self, key: &str, value: &str) -> Result<()>;

    fn start_group(&self, name: &str);

    fn end_group(&self);

    fn warning(&self, message: &str);

    fn error(&self, message: &str);

    /// Append Markdown to the job summary, where the runner has one.
    fn write_summary(&self, _markdown: &str) -> Result<()> {
        Ok(())
    }
}

/// Closes its log group when dropped.
pub struct LogGroup<'a> {
    env: &'a dyn ExecutionEnvironment,
}

impl Drop for LogGroup<'_> {
    fn drop(&mut self) {
        self.env.end_group();
    }
}

pub fn group<'a>(env: &'a dyn ExecutionEnvironment, name: &str) -> LogGroup<'a> {
    env.start_group(name);
    LogGroup { env }
}

/// Snapshot of the environment markers, captured once at startup.
#[derive(Debug, Clone, Default)]
pub struct EnvMarkers {
    vars: HashMap<String, String>,
}

impl EnvMarkers {
    pub fn from_process() -> Self {
        Self::capture(|key| std::env::var(key).ok())
    }

    pub fn capture(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let vars = MARKER_VARS
            .iter()
            .filter_map(|key| lookup(key).map(|value| (key.to_string(), value)))
            .collect();
        Self { vars }
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

/// Select the adapter for this process. Called once; the result is shared.
pub fn detect(
    markers: &EnvMarkers,
    workdir: &Path,
    console: Console,
) -> Arc<dyn ExecutionEnvironment> {
    let env: Arc<dyn ExecutionEnvironment> = if markers.get("GITHUB_ACTIONS") == Some("true") {
        Arc::new(github_actions::GitHubActions::new(markers, console))
    } else if markers.get("JENKINS_HOME").is_some() {
        Arc::new(jenkins::Jenkins::new(markers, workdir, console))
    } else if markers.get("GITLAB_CI").is_some() {
        Arc::new(gitlab::GitLabCi::new(markers, workdir, console))
    } else {
        Arc::new(local::Local::new(workdir, console))
    };

    tracing::info!(environment = %env.kind(), "Detected execution environment");
    env
}

/// Extract `owner/repo` from an HTTPS or SSH GitHub remote URL.
pub fn parse_github_slug(url: &str) -> Option<String> {
    let (_, rest) = url.split_once("github.com")?;
    let rest = rest.trim_start_matches([':', '/']);
    let rest = rest.strip_suffix(".git").unwrap_or(rest);
    let rest = rest.trim_end_matches('/');
    let mut parts = rest.splitn(3, '/');
    let owner = parts.next().filter(|s| !s.is_empty())?;
    let repo = parts.next().filter(|s| !s.is_empty())?;
    Some(format!("{owner}/{repo}"))
}

/// Append `key=value` lines to a dotenv/properties style file.
pub(crate) fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| {
            AppError::Workspace(format!("Failed to open output file {}: {e}", path.display()))
        })?;
    writeln!(file, "{line}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_prefers_github_actions() {
        let markers = EnvMarkers::from_pairs([("GITHUB_ACTIONS", "true"), ("GITLAB_CI", "true")]);
        let env = detect(&markers, Path::new("."), Console::captured().0);
        assert_eq!(env.kind(), EnvironmentKind::GitHubActions);
    }

    #[test]
    fn test_detect_jenkins_and_gitlab() {
        let jenkins = EnvMarkers::from_pairs([("JENKINS_HOME", "/var/jenkins")]);
        assert_eq!(
            detect(&jenkins, Path::new("."), Console::captured().0).kind(),
            EnvironmentKind::Jenkins
        );

        let gitlab = EnvMarkers::from_pairs([("GITLAB_CI", "true")]);
        assert_eq!(
            detect(&gitlab, Path::new("."), Console::captured().0).kind(),
            EnvironmentKind::GitLabCi
        );
    }

    #[test]
    fn test_detect_falls_back_to_local() {
        let markers = EnvMarkers::from_pairs([("GITHUB_ACTIONS", "false")]);
        let env = detect(&markers, Path::new("."), Console::captured().0);
        assert_eq!(env.kind(), EnvironmentKind::Local);
    }

    #[test]
    fn test_capture_only_keeps_markers() {
        let markers = EnvMarkers::capture(|key| match key {
            "GITHUB_ACTIONS" => Some("true".into()),
            _ => None,
        });
        assert_eq!(markers.get("GITHUB_ACTIONS"), Some("true"));
        assert_eq!(markers.get("HOME"), None);
    }

    #[test]
    fn test_parse_github_slug() {
        assert_eq!(
            parse_github_slug("https://github.com/acme/widgets.git").as_deref(),
            Some("acme/widgets")
        );
        assert_eq!(
            parse_github_slug("git@github.com:acme/widgets.git").as_deref(),
            Some("acme/widgets")
        );
        assert_eq!(
            parse_github_slug("https://github.com/acme/widgets").as_deref(),
            Some("acme/widgets")
        );
        assert_eq!(parse_github_slug("https://gitlab.com/acme/widgets"), None);
    }

    #[test]
    fn test_group_guard_closes_group() {
        let (console, lines) = Console::captured();
        let env = github_actions::GitHubActions::new(&EnvMarkers::default(), console);
        {
            let _group = group(&env, "classify");
            env.warning("inside");
        }
        let lines = lines.lock().unwrap();
        assert_eq!(
            *lines,
            vec!["::group::classify", "::warning::inside", "::endgroup::"]
        );
    }
}
