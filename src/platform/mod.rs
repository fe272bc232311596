pub mod github;
pub mod retry;
pub mod types;

use async_trait::async_trait;

use crate::error::Result;
use types::*;

/// The ticket tracker, scoped to one repository.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Fetch an issue's title, body and author.
    async fn fetch_ticket(&self, number: u64) -> Result<Ticket>;

    /// Post a new comment on an issue.
    async fn create_comment(&self, number: u64, body: &str) -> Result<CommentId>;

    /// Replace the body of an existing comment.
    async fn edit_comment(&self, comment_id: CommentId, body: &str) -> Result<()>;

    /// The repository's default branch.
    async fn default_branch(&self) -> Result<String>;

    /// Create a pull request.
    async fn open_pull_request(&self, pr: &CreatePullRequest) -> Result<PullRequest>;
}
