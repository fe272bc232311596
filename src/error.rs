use std::time::Duration;

use thiserror::Error;

use crate::exit_codes;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Agent tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("Classification failed: {0}")]
    Classification(String),

    #[error("Plan document not found: {0}")]
    PlanNotFound(String),

    #[error("Stage `{stage}` timed out after {}s", timeout.as_secs())]
    Timeout { stage: String, timeout: Duration },

    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("GitHub API error: {0}")]
    GitHubApi(String),

    #[error("Git operation failed: {0}")]
    Git(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Post-implementation check failed: {0}")]
    PostCheckFailed(String),

    #[error("Artifact store error: {0}")]
    Artifact(String),

    #[error("Run cancelled: {0}")]
    Cancelled(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Only transient network failures against the ticket tracker are retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::TransientNetwork(_))
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Config(_) => exit_codes::CONFIG,
            AppError::ToolUnavailable(_) => exit_codes::TOOL_UNAVAILABLE,
            AppError::Cancelled(_) => exit_codes::CANCELLED,
            AppError::Classification(_)
            | AppError::PlanNotFound(_)
            | AppError::Timeout { .. }
            | AppError::TransientNetwork(_)
            | AppError::GitHubApi(_)
            | AppError::Git(_)
            | AppError::Workspace(_)
            | AppError::Agent(_)
            | AppError::Template(_)
            | AppError::PostCheckFailed(_)
            | AppError::Artifact(_) => exit_codes::STAGE_FAILED,
            AppError::Serialization(_) | AppError::Io(_) | AppError::Internal(_) => {
                exit_codes::INTERNAL
            }
        }
    }
}

impl From<octocrab::Error> for AppError {
    fn from(e: octocrab::Error) -> Self {
        match &e {
            octocrab::Error::GitHub { source, .. } => {
                let status = source.status_code.as_u16();
                let rate_limited = status == 403
                    && source.message.to_ascii_lowercase().contains("rate limit");
                if status == 429 || status >= 500 || rate_limited {
                    AppError::TransientNetwork(format!("GitHub returned {status}: {}", source.message))
                } else {
                    AppError::GitHubApi(format!("GitHub returned {status}: {}", source.message))
                }
            }
            octocrab::Error::Hyper { .. } | octocrab::Error::Service { .. } => {
                AppError::TransientNetwork(e.to_string())
            }
            _ => AppError::GitHubApi(e.to_string()),
        }
    }
}

impl From<git2::Error> for AppError {
    fn from(e: git2::Error) -> Self {
        AppError::Git(e.message().to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(e: toml::de::Error) -> Self {
        AppError::Template(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
