use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

const PAW_DIR: &str = ".paw";

pub fn paw_dir(root: &Path) -> PathBuf {
    root.join(PAW_DIR)
}

pub fn agents_dir(root: &Path) -> PathBuf {
    paw_dir(root).join("agents")
}

pub fn worktrees_dir(root: &Path) -> PathBuf {
    paw_dir(root).join("worktrees")
}

pub fn history_dir(root: &Path) -> PathBuf {
    paw_dir(root).join("history")
}

pub fn logs_dir(root: &Path) -> PathBuf {
    paw_dir(root).join("logs")
}

pub fn reconcile_lock(root: &Path) -> PathBuf {
    paw_dir(root).join("reconcile.lock")
}

pub fn merge_lock(root: &Path) -> PathBuf {
    paw_dir(root).join("merge.lock")
}

/// Create `.paw/` with a `.gitignore` that hides it from `git status`, so
/// task state never makes the repository look dirty.
pub fn ensure_paw_dir(root: &Path) -> Result<PathBuf> {
    let dir = paw_dir(root);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let ignore = dir.join(".gitignore");
    if !ignore.exists() {
        std::fs::write(&ignore, "*\n")
            .with_context(|| format!("failed to write {}", ignore.display()))?;
    }
    Ok(dir)
}

/// Resolve the project root for a working directory.
///
/// Walks upward looking for an existing `.paw/` directory. When none is found,
/// the enclosing git repository root is used, and failing that `start` itself,
/// so a fresh project gets its `.paw/` next to the repository it lives in.
pub fn find_project_root(start: &Path) -> PathBuf {
    let mut dir = start.to_path_buf();
    loop {
        if dir.join(PAW_DIR).is_dir() {
            return dir;
        }
        if !dir.pop() {
            break;
        }
    }

    crate::git::repo_root(start).unwrap_or_else(|_| start.to_path_buf())
}

/// Convention for session names: `paw-<project dir>`.
pub fn session_name(root: &Path) -> String {
    let base = root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    // tmux target parsing treats '.' and ':' as separators.
    let sanitized: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if sanitized.is_empty() {
        "paw".to_string()
    } else {
        format!("paw-{sanitized}")
    }
}
