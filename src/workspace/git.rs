use std::path::{Path, PathBuf};

use git2::{
    Cred, IndexAddOption, PushOptions, Reference, RemoteCallbacks, Repository, Signature,
    StatusOptions,
};

use crate::error::{AppError, Result};

const BOT_NAME: &str = "Hyphae Bot";
const BOT_EMAIL: &str = "hyphae[bot]@users.noreply.github.com";

/// Validate a branch name to prevent argument injection and invalid refs.
pub fn validate_branch_name(name: &str) -> Result<()> {
    if name.starts_with('-') {
        return Err(AppError::Git(format!(
            "Invalid branch name (starts with '-'): {name}"
        )));
    }
    if !Reference::is_valid_name(&format!("refs/heads/{name}")) {
        return Err(AppError::Git(format!("Invalid branch name: {name}")));
    }
    Ok(())
}

/// Build `PushOptions` that authenticate via credential callback.
/// The token is captured by the closure and never written to disk.
fn make_push_options(token: &str) -> PushOptions<'_> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, _username_from_url, _allowed_types| {
        Cred::userpass_plaintext("x-access-token", token)
    });
    let mut opts = PushOptions::new();
    opts.remote_callbacks(callbacks);
    opts
}

fn signature(repo: &Repository) -> Result<Signature<'static>> {
    match repo.signature() {
        Ok(sig) => Ok(sig.to_owned()),
        Err(_) => Ok(Signature::now(BOT_NAME, BOT_EMAIL)?),
    }
}

/// Whether `path` (relative to the worktree) falls under any excluded prefix.
fn is_excluded(path: &Path, excluded: &[PathBuf]) -> bool {
    excluded.iter().any(|prefix| path.starts_with(prefix))
}

/// Create a branch at `HEAD` and check it out. Fails if the branch exists.
pub async fn create_branch(dir: &Path, branch_name: &str) -> Result<()> {
    validate_branch_name(branch_name)?;

    let dir = dir.to_path_buf();
    let branch_name = branch_name.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let head = repo.head()?;
        let commit = head.peel_to_commit()?;
        repo.branch(&branch_name, &commit, false)?;
        let obj = repo.revparse_single(&format!("refs/heads/{branch_name}"))?;
        repo.checkout_tree(&obj, None)?;
        repo.set_head(&format!("refs/heads/{branch_name}"))?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Create-branch task panicked: {e}")))?
}

/// Whether tracked files have staged or unstaged modifications.
pub async fn has_tracked_changes(dir: &Path) -> Result<bool> {
    let dir = dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let mut opts = StatusOptions::new();
        opts.include_untracked(false).include_ignored(false);
        let statuses = repo.statuses(Some(&mut opts))?;
        Ok(!statuses.is_empty())
    })
    .await
    .map_err(|e| AppError::Git(format!("Status task panicked: {e}")))?
}

/// Paths with any change (including untracked files), minus excluded prefixes.
pub async fn changed_paths(dir: &Path, excluded: &[PathBuf]) -> Result<Vec<String>> {
    let dir = dir.to_path_buf();
    let excluded = excluded.to_vec();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = repo.statuses(Some(&mut opts))?;
        Ok(statuses
            .iter()
            .filter_map(|entry| entry.path().map(str::to_string))
            .filter(|path| !is_excluded(Path::new(path), &excluded))
            .collect())
    })
    .await
    .map_err(|e| AppError::Git(format!("Status task panicked: {e}")))?
}

/// Stage everything except excluded prefixes.
pub async fn add_all(dir: &Path, excluded: &[PathBuf]) -> Result<()> {
    let dir = dir.to_path_buf();
    let excluded = excluded.to_vec();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let mut index = repo.index()?;
        let mut skip_excluded = |path: &Path, _spec: &[u8]| -> i32 {
            if is_excluded(path, &excluded) {
                1
            } else {
                0
            }
        };
        index.add_all(
            ["*"].iter(),
            IndexAddOption::DEFAULT,
            Some(&mut skip_excluded as &mut git2::IndexMatchedPath),
        )?;
        // Deleted files are not picked up by add_all.
        index.update_all(
            ["*"].iter(),
            Some(&mut skip_excluded as &mut git2::IndexMatchedPath),
        )?;
        index.write()?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Add-all task panicked: {e}")))?
}

/// Commit the index with a message.
pub async fn commit(dir: &Path, message: &str) -> Result<String> {
    let dir = dir.to_path_buf();
    let message = message.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let sig = signature(&repo)?;
        let mut index = repo.index()?;
        let tree_oid = index.write_tree()?;
        let tree = repo.find_tree(tree_oid)?;
        let head = repo.head()?;
        let parent = head.peel_to_commit()?;
        let oid = repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &[&parent])?;
        Ok(oid.to_string())
    })
    .await
    .map_err(|e| AppError::Git(format!("Commit task panicked: {e}")))?
}

/// The commit `HEAD` points to.
pub async fn head_commit(dir: &Path) -> Result<String> {
    let dir = dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let commit = repo.head()?.peel_to_commit()?;
        Ok(commit.id().to_string())
    })
    .await
    .map_err(|e| AppError::Git(format!("Head task panicked: {e}")))?
}

/// A commit on the branch, newest first.
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub id: String,
    pub message: String,
}

impl CommitInfo {
    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(7)]
    }
}

/// Commits reachable from `HEAD` but not from `base`.
pub async fn commits_since(dir: &Path, base: &str) -> Result<Vec<CommitInfo>> {
    let dir = dir.to_path_buf();
    let base = base.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let base = git2::Oid::from_str(&base)?;
        let mut walk = repo.revwalk()?;
        walk.push_head()?;
        walk.hide(base)?;
        let mut commits = Vec::new();
        for oid in walk {
            let commit = repo.find_commit(oid?)?;
            commits.push(CommitInfo {
                id: commit.id().to_string(),
                message: String::from_utf8_lossy(commit.message_bytes()).into_owned(),
            });
        }
        Ok(commits)
    })
    .await
    .map_err(|e| AppError::Git(format!("Revwalk task panicked: {e}")))?
}

/// Push the branch to origin.
pub async fn push(dir: &Path, branch_name: &str, token: &str) -> Result<()> {
    validate_branch_name(branch_name)?;

    let dir = dir.to_path_buf();
    let branch_name = branch_name.to_string();
    let token = token.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let mut remote = repo.find_remote("origin")?;
        let refspec = format!("refs/heads/{branch_name}:refs/heads/{branch_name}");
        let mut push_opts = make_push_options(&token);
        remote.push(&[&refspec], Some(&mut push_opts))?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Push task panicked: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::init_repo;
    use std::fs;

    #[test]
    fn test_validate_branch_name_rejects_dash_prefix() {
        assert!(validate_branch_name("-evil").is_err());
        assert!(validate_branch_name("--upload-pack").is_err());
    }

    #[test]
    fn test_validate_branch_name_rejects_invalid_refs() {
        assert!(validate_branch_name("has space").is_err());
        assert!(validate_branch_name("double..dot").is_err());
    }

    #[test]
    fn test_validate_branch_name_accepts_normal() {
        assert!(validate_branch_name("main").is_ok());
        assert!(validate_branch_name("feat-42-abcd1234-add-dark-mode-toggle").is_ok());
    }

    #[tokio::test]
    async fn test_create_branch_twice_fails() {
        let (tmp, _origin) = init_repo();
        create_branch(tmp.path(), "feat-1-abcd1234-x").await.unwrap();
        let again = create_branch(tmp.path(), "feat-1-abcd1234-x").await;
        assert!(matches!(again, Err(AppError::Git(_))));

        let repo = Repository::open(tmp.path()).unwrap();
        assert_eq!(
            repo.head().unwrap().shorthand(),
            Some("feat-1-abcd1234-x")
        );
    }

    #[tokio::test]
    async fn test_untracked_files_do_not_count_as_tracked_changes() {
        let (tmp, _origin) = init_repo();
        fs::write(tmp.path().join("new.txt"), "new").unwrap();
        assert!(!has_tracked_changes(tmp.path()).await.unwrap());

        fs::write(tmp.path().join("README.md"), "edited").unwrap();
        assert!(has_tracked_changes(tmp.path()).await.unwrap());
    }

    #[tokio::test]
    async fn test_commit_skips_excluded_paths() {
        let (tmp, _origin) = init_repo();
        let base = head_commit(tmp.path()).await.unwrap();
        fs::create_dir_all(tmp.path().join(".hyphae/runs/abcd1234")).unwrap();
        fs::write(tmp.path().join(".hyphae/runs/abcd1234/run.json"), "{}").unwrap();
        fs::write(tmp.path().join("feature.rs"), "fn main() {}").unwrap();

        let excluded = vec![PathBuf::from(".hyphae")];
        let changed = changed_paths(tmp.path(), &excluded).await.unwrap();
        assert_eq!(changed, vec!["feature.rs"]);

        add_all(tmp.path(), &excluded).await.unwrap();
        commit(tmp.path(), "feat: x for #1").await.unwrap();

        let commits = commits_since(tmp.path(), &base).await.unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].message, "feat: x for #1");
        assert_eq!(commits[0].short_id().len(), 7);
        assert!(changed_paths(tmp.path(), &excluded).await.unwrap().is_empty());
        let all = changed_paths(tmp.path(), &[]).await.unwrap();
        assert_eq!(all, vec![".hyphae/runs/abcd1234/run.json"]);
    }

    #[tokio::test]
    async fn test_push_to_local_origin() {
        let (tmp, origin) = init_repo();
        create_branch(tmp.path(), "chore-3-abcd1234-tidy").await.unwrap();
        push(tmp.path(), "chore-3-abcd1234-tidy", "unused").await.unwrap();

        let bare = Repository::open_bare(origin.path()).unwrap();
        assert!(bare
            .find_branch("chore-3-abcd1234-tidy", git2::BranchType::Local)
            .is_ok());
    }
}
