//! Finding the plan document the planning agent wrote.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{AppError, Result};

/// Markdown files under the plan directory before the planning agent ran.
#[derive(Debug, Clone)]
pub struct PlanSnapshot {
    checkout: PathBuf,
    plan_dir: PathBuf,
    existing: BTreeSet<PathBuf>,
}

impl PlanSnapshot {
    /// Record the plan directory's current Markdown files. A missing directory
    /// is an empty snapshot.
    pub fn capture(checkout: &Path, plan_dir: &Path) -> Result<Self> {
        let existing = markdown_files(checkout, plan_dir)?;
        tracing::debug!(
            plan_dir = %plan_dir.display(),
            existing = existing.len(),
            "Captured plan directory snapshot"
        );
        Ok(Self {
            checkout: checkout.to_path_buf(),
            plan_dir: plan_dir.to_path_buf(),
            existing,
        })
    }

    /// Locate the one plan document created since the snapshot.
    ///
    /// A path named in the agent's reply wins if it is a new, non-empty
    /// Markdown file under the plan directory. Otherwise exactly one new
    /// Markdown file must exist. Returns the path relative to the checkout.
    pub fn resolve(&self, reply: &str) -> Result<PathBuf> {
        if let Some(reported) = self.reported_path(reply) {
            tracing::debug!(plan = %reported.display(), "Using plan path from agent reply");
            return Ok(reported);
        }

        let current = markdown_files(&self.checkout, &self.plan_dir)?;
        let created: Vec<&PathBuf> = current.difference(&self.existing).collect();

        match created.as_slice() {
            [] => Err(AppError::PlanNotFound(format!(
                "No new Markdown file under {}",
                self.plan_dir.display()
            ))),
            [single] => {
                if is_non_empty(&self.checkout.join(single)) {
                    Ok(single.to_path_buf())
                } else {
                    Err(AppError::PlanNotFound(format!(
                        "Plan document {} is empty",
                        single.display()
                    )))
                }
            }
            several => Err(AppError::PlanNotFound(format!(
                "Several new Markdown files under {}: {}",
                self.plan_dir.display(),
                several
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    fn reported_path(&self, reply: &str) -> Option<PathBuf> {
        reply
            .lines()
            .rev()
            .map(|line| line.trim().trim_matches(|c: char| c == '`' || c == '"' || c == '\''))
            .filter(|line| line.ends_with(".md"))
            .find_map(|line| {
                let candidate = Path::new(line);
                let relative = if candidate.is_absolute() {
                    candidate.strip_prefix(&self.checkout).ok()?.to_path_buf()
                } else {
                    normalize(candidate)?
                };
                let accepted = relative.starts_with(&self.plan_dir)
                    && !self.existing.contains(&relative)
                    && is_non_empty(&self.checkout.join(&relative));
                accepted.then_some(relative)
            })
    }
}

/// Drop `.` components and refuse anything that climbs out with `..`.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(out)
}

fn is_non_empty(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

fn markdown_files(checkout: &Path, plan_dir: &Path) -> Result<BTreeSet<PathBuf>> {
    let root = checkout.join(plan_dir);
    if !root.is_dir() {
        return Ok(BTreeSet::new());
    }

    let mut files = BTreeSet::new();
    for entry in WalkDir::new(&root).follow_links(false) {
        let entry = entry.map_err(|e| {
            AppError::Workspace(format!("Failed to scan {}: {e}", root.display()))
        })?;
        let is_markdown = entry.file_type().is_file()
            && entry.path().extension().and_then(|e| e.to_str()) == Some("md");
        if is_markdown {
            if let Ok(relative) = entry.path().strip_prefix(checkout) {
                files.insert(relative.to_path_buf());
            }
        }
    }
    Ok(files)
}
