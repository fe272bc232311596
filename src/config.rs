use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, Result};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Deserialize, Clone, Default)]
pub struct GitHubConfig {
    /// User-provided token, used when the platform does not provide one.
    pub token: Option<String>,
    /// `owner/repo`; defaults to what the execution environment reports.
    pub repository: Option<String>,
    /// Base branch for pull requests; defaults to the repository default branch.
    pub base_branch: Option<String>,
    /// GitHub Enterprise API root.
    pub api_url: Option<String>,
}

// Manual Debug impl to avoid leaking the token
impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("repository", &self.repository)
            .field("base_branch", &self.base_branch)
            .field("api_url", &self.api_url)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_agent_command")]
    pub command: String,
    #[serde(default = "default_agent_args")]
    pub args: Vec<String>,
    pub model: Option<String>,
    #[serde(default = "default_classify_timeout")]
    pub classify_timeout_secs: u64,
    #[serde(default = "default_plan_timeout")]
    pub plan_timeout_secs: u64,
    #[serde(default = "default_implement_timeout")]
    pub implement_timeout_secs: u64,
    /// Directory of `*.toml` template overrides.
    pub templates_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArtifactsConfig {
    #[serde(default = "default_artifacts_root")]
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Where the planning agent writes plan documents, relative to the checkout.
    #[serde(default = "default_plan_dir")]
    pub plan_dir: PathBuf,
    #[serde(default)]
    pub post_check: PostCheckConfig,
    /// Overall wall-clock budget for one run.
    pub max_runtime_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PostCheckConfig {
    /// Shell command run in the checkout after implementation.
    pub command: Option<String>,
    #[serde(default)]
    pub policy: PostCheckPolicy,
    #[serde(default = "default_post_check_timeout")]
    pub timeout_secs: u64,
}

/// What a failing post-implementation check does to the run.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PostCheckPolicy {
    /// Record the failure and keep going.
    #[default]
    Warn,
    /// Fail the run.
    Fail,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_agent_command() -> String {
    "claude".to_string()
}

fn default_agent_args() -> Vec<String> {
    [
        "-p",
        "--output-format",
        "stream-json",
        "--verbose",
        "--dangerously-skip-permissions",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_classify_timeout() -> u64 {
    120
}

fn default_plan_timeout() -> u64 {
    15 * 60
}

fn default_implement_timeout() -> u64 {
    45 * 60
}

fn default_artifacts_root() -> PathBuf {
    PathBuf::from(".hyphae/runs")
}

fn default_plan_dir() -> PathBuf {
    PathBuf::from("specs")
}

fn default_post_check_timeout() -> u64 {
    10 * 60
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: default_agent_command(),
            args: default_agent_args(),
            model: None,
            classify_timeout_secs: default_classify_timeout(),
            plan_timeout_secs: default_plan_timeout(),
            implement_timeout_secs: default_implement_timeout(),
            templates_dir: None,
        }
    }
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            root: default_artifacts_root(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            plan_dir: default_plan_dir(),
            post_check: PostCheckConfig::default(),
            max_runtime_secs: None,
        }
    }
}

impl Default for PostCheckConfig {
    fn default() -> Self {
        Self {
            command: None,
            policy: PostCheckPolicy::Warn,
            timeout_secs: default_post_check_timeout(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl AgentConfig {
    pub fn classify_timeout(&self) -> Duration {
        Duration::from_secs(self.classify_timeout_secs)
    }

    pub fn plan_timeout(&self) -> Duration {
        Duration::from_secs(self.plan_timeout_secs)
    }

    pub fn implement_timeout(&self) -> Duration {
        Duration::from_secs(self.implement_timeout_secs)
    }
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Load from file if specified
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            builder = builder.add_source(config::File::with_name("hyphae").required(false));
        }

        // Environment variable overrides with HYPHAE_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("HYPHAE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))
    }

    /// Artifacts root, resolved against the checkout when relative.
    pub fn artifacts_root(&self, workdir: &std::path::Path) -> PathBuf {
        if self.artifacts.root.is_absolute() {
            self.artifacts.root.clone()
        } else {
            workdir.join(&self.artifacts.root)
        }
    }
}
