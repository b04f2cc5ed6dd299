//! Git worktree lifecycle for isolated tasks.
//!
//! Each task with isolation enabled gets a dedicated branch/worktree:
//! branch `paw/<task>` checked out at `.paw/worktrees/<task>`.
//! Cleanup is merge-aware: the branch is only deleted once it is merged into
//! the base branch; unmerged work is retained.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, warn};

use crate::git::{self, run_git};
use crate::paths;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskWorktree {
    pub branch: String,
    pub path: PathBuf,
    pub base_commit: String,
}

/// A registered worktree as reported by `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    pub branch: Option<String>,
    pub prunable: bool,
}

pub fn branch_for_task(name: &str) -> String {
    format!("paw/{name}")
}

/// Create an isolated worktree for a task, cut from `base_branch`.
pub fn create_task_worktree(root: &Path, name: &str, base_branch: &str) -> Result<TaskWorktree> {
    let worktrees_root = paths::worktrees_dir(root);
    std::fs::create_dir_all(&worktrees_root).with_context(|| {
        format!(
            "failed to create worktrees directory {}",
            worktrees_root.display()
        )
    })?;

    let branch = branch_for_task(name);
    let path = worktrees_root.join(name);
    if path.exists() {
        bail!("worktree path already exists: {}", path.display());
    }
    if git::branch_exists(root, &branch)? {
        bail!("branch '{branch}' already exists; finish or remove the old task first");
    }

    let base_commit = git::rev_parse(root, base_branch)
        .with_context(|| format!("base branch '{base_branch}' not found"))?;

    let path_s = path.to_string_lossy().to_string();
    let add_output = run_git(
        root,
        [
            "worktree",
            "add",
            "-b",
            branch.as_str(),
            path_s.as_str(),
            base_branch,
        ],
    )?;
    if !add_output.status.success() {
        bail!(
            "git worktree add failed: {}",
            String::from_utf8_lossy(&add_output.stderr).trim()
        );
    }

    debug!(branch = %branch, path = %path.display(), "task worktree created");
    Ok(TaskWorktree {
        branch,
        path,
        base_commit,
    })
}

pub fn remove_task_worktree(root: &Path, path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    let path_s = path.to_string_lossy().to_string();
    let output = run_git(root, ["worktree", "remove", "--force", path_s.as_str()])?;
    if !output.status.success() {
        bail!(
            "failed to remove worktree '{}': {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

/// Drop registrations whose directories no longer exist.
pub fn prune_worktrees(root: &Path) -> Result<()> {
    let output = run_git(root, ["worktree", "prune"])?;
    if !output.status.success() {
        bail!(
            "git worktree prune failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

pub fn list_worktrees(root: &Path) -> Result<Vec<WorktreeEntry>> {
    let output = run_git(root, ["worktree", "list", "--porcelain"])?;
    if !output.status.success() {
        bail!(
            "git worktree list failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(parse_worktree_list(&String::from_utf8_lossy(&output.stdout)))
}

fn parse_worktree_list(porcelain: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut current: Option<WorktreeEntry> = None;

    for line in porcelain.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            current = Some(WorktreeEntry {
                path: PathBuf::from(path),
                branch: None,
                prunable: false,
            });
            continue;
        }

        let Some(entry) = current.as_mut() else {
            warn!(line = line, "worktree list line outside of an entry");
            continue;
        };
        if let Some(branch) = line.strip_prefix("branch ") {
            entry.branch = Some(
                branch
                    .strip_prefix("refs/heads/")
                    .unwrap_or(branch)
                    .to_string(),
            );
        } else if line.starts_with("prunable") {
            entry.prunable = true;
        }
    }

    if let Some(entry) = current {
        entries.push(entry);
    }
    entries
}
