use async_trait::async_trait;
use octocrab::Octocrab;

use crate::error::{AppError, Result};
use crate::platform::retry::RetryPolicy;
use crate::platform::types::*;
use crate::platform::Platform;

use super::mapper;

pub struct GitHubPlatform {
    client: Octocrab,
    owner: String,
    repo: String,
    retry: RetryPolicy,
}

impl GitHubPlatform {
    pub fn new(
        token: &str,
        repo_full_name: &str,
        api_url: Option<&str>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let (owner, repo) = Self::parse_repo(repo_full_name)?;

        let mut builder = Octocrab::builder().personal_token(token.to_string());
        if let Some(url) = api_url {
            builder = builder
                .base_uri(url)
                .map_err(|e| AppError::Config(format!("Invalid GitHub API url {url}: {e}")))?;
        }
        let client = builder
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build octocrab client: {e}")))?;

        Ok(Self {
            client,
            owner: owner.to_string(),
            repo: repo.to_string(),
            retry,
        })
    }

    pub fn repo_full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    /// A comment on the issue whose headline matches `body`'s.
    async fn find_comment(&self, number: u64, body: &str) -> Result<Option<CommentId>> {
        let page = self
            .client
            .issues(&self.owner, &self.repo)
            .list_comments(number)
            .per_page(100)
            .send()
            .await?;
        let comments = self.client.all_pages(page).await?;
        Ok(comments
            .iter()
            .rev()
            .find(|c| same_headline(body, c.body.as_deref()))
            .map(mapper::map_comment_id))
    }

    /// The open pull request for `head_branch`, if one exists.
    async fn find_pull_request(&self, head_branch: &str) -> Result<Option<PullRequest>> {
        let page = self
            .client
            .pulls(&self.owner, &self.repo)
            .list()
            .state(octocrab::params::State::Open)
            .head(format!("{}:{head_branch}", self.owner))
            .send()
            .await?;
        Ok(page.items.first().map(mapper::map_pull_request))
    }

    fn parse_repo(repo_full_name: &str) -> Result<(&str, &str)> {
        match repo_full_name.split_once('/') {
            Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
                Ok((owner, repo))
            }
            _ => Err(AppError::Config(format!(
                "Invalid repository name: {repo_full_name} (expected owner/repo)"
            ))),
        }
    }
}

#[async_trait]
impl Platform for GitHubPlatform {
    async fn fetch_ticket(&self, number: u64) -> Result<Ticket> {
        self.retry
            .run("fetch_ticket", move || async move {
                let issue = self
                    .client
                    .issues(&self.owner, &self.repo)
                    .get(number)
                    .await?;
                Ok::<_, AppError>(mapper::map_ticket(&issue))
            })
            .await
    }

    async fn create_comment(&self, number: u64, body: &str) -> Result<CommentId> {
        self.retry
            .run_create(
                "create_comment",
                move || async move {
                    let comment = self
                        .client
                        .issues(&self.owner, &self.repo)
                        .create_comment(number, body)
                        .await?;
                    Ok::<_, AppError>(mapper::map_comment_id(&comment))
                },
                move || self.find_comment(number, body),
            )
            .await
    }

    async fn edit_comment(&self, comment_id: CommentId, body: &str) -> Result<()> {
        self.retry
            .run("edit_comment", move || async move {
                self.client
                    .issues(&self.owner, &self.repo)
                    .update_comment(comment_id.0.into(), body)
                    .await?;
                Ok::<_, AppError>(())
            })
            .await
    }

    async fn default_branch(&self) -> Result<String> {
        self.retry
            .run("default_branch", move || async move {
                let repo = self.client.repos(&self.owner, &self.repo).get().await?;
                repo.default_branch.ok_or_else(|| {
                    AppError::GitHubApi(format!(
                        "Repository {} reports no default branch",
                        self.repo_full_name()
                    ))
                })
            })
            .await
    }

    async fn open_pull_request(&self, pr: &CreatePullRequest) -> Result<PullRequest> {
        self.retry
            .run_create(
                "open_pull_request",
                move || async move {
                    let created = self
                        .client
                        .pulls(&self.owner, &self.repo)
                        .create(&pr.title, &pr.head_branch, &pr.base_branch)
                        .body(&pr.body)
                        .send()
                        .await?;
                    Ok::<_, AppError>(mapper::map_pull_request(&created))
                },
                move || self.find_pull_request(&pr.head_branch),
            )
            .await
    }
}

/// Progress comments carry the run ID in their first line.
fn same_headline(sent: &str, existing: Option<&str>) -> bool {
    let headline = |body: &str| body.lines().next().map(str::trim).unwrap_or_default().to_string();
    match existing {
        Some(existing) => !headline(sent).is_empty() && headline(sent) == headline(existing),
        None => false,
    }
}
