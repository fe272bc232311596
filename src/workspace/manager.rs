use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use git2::Repository;

use crate::error::{AppError, Result};
use crate::workspace::git;

const LOCK_FILE: &str = "hyphae.lock";

/// The single checkout a run works in, held under an exclusive lock.
///
/// The advisory lock lives in the repository's git dir so it never shows up
/// as a working-tree change; dropping the workspace releases it.
pub struct Workspace {
    path: PathBuf,
    excluded: Vec<PathBuf>,
    _lock: File,
}

impl Workspace {
    /// Open the checkout at `path` and take the exclusive lock.
    ///
    /// Fails immediately when another run already holds the lock.
    pub fn acquire(path: &Path) -> Result<Self> {
        let repo = Repository::open(path).map_err(|e| {
            AppError::Workspace(format!("{} is not a git checkout: {e}", path.display()))
        })?;
        let path = repo
            .workdir()
            .ok_or_else(|| AppError::Workspace(format!("{} is a bare repository", path.display())))?
            .to_path_buf();

        let lock_path = repo.path().join(LOCK_FILE);
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| AppError::Workspace(format!("Failed to open {}: {e}", lock_path.display())))?;
        lock.try_lock_exclusive().map_err(|_| {
            AppError::Workspace(format!(
                "Checkout {} is locked by another run",
                path.display()
            ))
        })?;

        tracing::debug!(checkout = %path.display(), "Acquired checkout lock");
        Ok(Self {
            path,
            excluded: Vec::new(),
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep `dir` out of status checks and commits when it lives inside the checkout.
    pub fn exclude(&mut self, dir: &Path) {
        let absolute = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.path.join(dir)
        };
        let relative = absolute
            .strip_prefix(&self.path)
            .map(Path::to_path_buf)
            .ok()
            .or_else(|| {
                let checkout = self.path.canonicalize().ok()?;
                let absolute = absolute.canonicalize().ok()?;
                absolute.strip_prefix(checkout).map(Path::to_path_buf).ok()
            });
        if let Some(relative) = relative.filter(|r| !r.as_os_str().is_empty()) {
            self.excluded.push(relative);
        }
    }

    /// Refuse to branch off a tree with uncommitted tracked modifications.
    pub async fn ensure_clean(&self) -> Result<()> {
        if git::has_tracked_changes(&self.path).await? {
            return Err(AppError::Workspace(
                "Working tree has uncommitted changes to tracked files".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn head_commit(&self) -> Result<String> {
        git::head_commit(&self.path).await
    }

    pub async fn create_branch(&self, name: &str) -> Result<()> {
        git::create_branch(&self.path, name).await
    }

    /// Commit whatever is left in the working tree. Returns whether a commit was made.
    pub async fn commit_pending(&self, message: &str) -> Result<bool> {
        if git::changed_paths(&self.path, &self.excluded)
            .await?
            .is_empty()
        {
            tracing::info!("No uncommitted changes left");
            return Ok(false);
        }

        git::add_all(&self.path, &self.excluded).await?;
        let oid = git::commit(&self.path, message).await?;
        tracing::info!(commit = %oid, "Committed remaining changes");
        Ok(true)
    }

    pub async fn commits_since(&self, base: &str) -> Result<Vec<git::CommitInfo>> {
        git::commits_since(&self.path, base).await
    }

    pub async fn push(&self, branch: &str, token: &str) -> Result<()> {
        git::push(&self.path, branch, token).await
    }
}
