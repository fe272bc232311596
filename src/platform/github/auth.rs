use crate::error::{AppError, Result};

/// Pick the token used for the GitHub API and for pushing.
///
/// The token the CI platform injects (`GITHUB_TOKEN`) wins over one the user
/// configured explicitly; having neither is a configuration error.
pub fn resolve_token(platform_token: Option<&str>, explicit_token: Option<&str>) -> Result<String> {
    let usable = |t: &&str| !t.trim().is_empty();

    if let Some(token) = platform_token.filter(usable) {
        tracing::debug!("Using platform-provided GitHub token");
        return Ok(token.trim().to_string());
    }
    if let Some(token) = explicit_token.filter(usable) {
        tracing::debug!("Using configured GitHub token");
        return Ok(token.trim().to_string());
    }

    Err(AppError::Config(
        "No GitHub token: set GITHUB_TOKEN or github.token (HYPHAE_GITHUB__TOKEN)".to_string(),
    ))
}
