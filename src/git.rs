//! Thin wrapper over the `git` CLI.
//!
//! Every helper runs `git` in an explicit directory and turns a non-zero exit
//! into an error carrying git's stderr, except the predicates, which map the
//! documented exit codes (0 / 1) to booleans.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, bail};

pub(crate) fn run_git<I, S>(dir: &Path, args: I) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new("git")
        .current_dir(dir)
        .args(args)
        .output()
        .with_context(|| format!("failed to run git in {}", dir.display()))
}

fn git_stdout<I, S>(dir: &Path, args: I, what: &str) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_git(dir, args)?;
    if !output.status.success() {
        bail!(
            "failed to {what}: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn git_predicate<I, S>(dir: &Path, args: I, what: &str) -> Result<bool>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_git(dir, args)?;
    match output.status.code() {
        Some(0) => Ok(true),
        Some(1) => Ok(false),
        _ => bail!(
            "failed to check {what}: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ),
    }
}

pub fn repo_root(dir: &Path) -> Result<PathBuf> {
    let root = git_stdout(dir, ["rev-parse", "--show-toplevel"], "find repository root")
        .with_context(|| format!("not a git repository: {}", dir.display()))?;
    if root.is_empty() {
        bail!("git rev-parse returned empty repository root");
    }
    Ok(PathBuf::from(root))
}

fn git_dir(dir: &Path) -> Result<PathBuf> {
    let raw = git_stdout(dir, ["rev-parse", "--git-dir"], "resolve git dir")?;
    let path = PathBuf::from(raw);
    Ok(if path.is_absolute() {
        path
    } else {
        dir.join(path)
    })
}

pub fn status_porcelain(dir: &Path) -> Result<String> {
    git_stdout(dir, ["status", "--porcelain"], "read repository status")
}

pub fn is_dirty(dir: &Path) -> Result<bool> {
    Ok(!status_porcelain(dir)?.is_empty())
}

pub fn rebase_in_progress(dir: &Path) -> Result<bool> {
    let git_dir = git_dir(dir)?;
    Ok(git_dir.join("rebase-merge").exists() || git_dir.join("rebase-apply").exists())
}

pub fn merge_in_progress(dir: &Path) -> Result<bool> {
    Ok(git_dir(dir)?.join("MERGE_HEAD").exists())
}

pub fn fetch(dir: &Path, remote: &str) -> Result<()> {
    git_stdout(dir, ["fetch", "--quiet", remote], "fetch from remote")?;
    Ok(())
}

pub fn remote_exists(dir: &Path, remote: &str) -> Result<bool> {
    let remotes = git_stdout(dir, ["remote"], "list remotes")?;
    Ok(remotes.lines().any(|r| r.trim() == remote))
}

/// Commits `(ahead, behind)` of `local` relative to `upstream`.
pub fn ahead_behind(dir: &Path, local: &str, upstream: &str) -> Result<(u32, u32)> {
    let range = format!("{local}...{upstream}");
    let counts = git_stdout(
        dir,
        ["rev-list", "--left-right", "--count", range.as_str()],
        "count commits",
    )?;
    let mut parts = counts.split_whitespace();
    let ahead = parts
        .next()
        .and_then(|s| s.parse().ok())
        .with_context(|| format!("unexpected rev-list output: {counts}"))?;
    let behind = parts
        .next()
        .and_then(|s| s.parse().ok())
        .with_context(|| format!("unexpected rev-list output: {counts}"))?;
    Ok((ahead, behind))
}

/// Attempt a rebase; returns `false` (rebase left in progress) on failure.
pub fn rebase(dir: &Path, onto: &str) -> Result<bool> {
    Ok(run_git(dir, ["rebase", onto])?.status.success())
}

/// Attempt a `--no-ff` merge; returns `false` (merge left in progress) on failure.
pub fn merge_no_ff(dir: &Path, branch: &str, message: &str) -> Result<bool> {
    Ok(run_git(dir, ["merge", "--no-ff", "-m", message, branch])?
        .status
        .success())
}

pub fn stage_all(dir: &Path) -> Result<()> {
    git_stdout(dir, ["add", "-A"], "stage changes")?;
    Ok(())
}

pub fn is_staged(dir: &Path, path: &str) -> Result<bool> {
    let staged = git_stdout(
        dir,
        ["diff", "--cached", "--name-only", "--", path],
        "list staged paths",
    )?;
    Ok(!staged.is_empty())
}

pub fn unstage(dir: &Path, path: &str) -> Result<()> {
    git_stdout(
        dir,
        ["reset", "--quiet", "HEAD", "--", path],
        "unstage path",
    )?;
    Ok(())
}

pub fn has_staged_changes(dir: &Path) -> Result<bool> {
    // `diff --cached --quiet` exits 1 when something is staged.
    Ok(!git_predicate(
        dir,
        ["diff", "--cached", "--quiet"],
        "staged changes",
    )?)
}

pub fn commit(dir: &Path, message: &str) -> Result<()> {
    git_stdout(dir, ["commit", "-q", "-m", message], "commit")?;
    Ok(())
}

pub fn current_branch(dir: &Path) -> Result<String> {
    let branch = git_stdout(dir, ["branch", "--show-current"], "determine current branch")?;
    if branch.is_empty() {
        bail!("detached HEAD; checkout a branch first");
    }
    Ok(branch)
}

pub fn head_commit(dir: &Path) -> Result<String> {
    rev_parse(dir, "HEAD")
}

pub fn rev_parse(dir: &Path, rev: &str) -> Result<String> {
    let commit = git_stdout(dir, ["rev-parse", rev], "resolve revision")?;
    if commit.is_empty() {
        bail!("git rev-parse returned empty commit for '{rev}'");
    }
    Ok(commit)
}

/// `git diff --shortstat <base>...HEAD`, e.g. "3 files changed, 10 insertions(+)".
pub fn diff_summary(dir: &Path, base: &str) -> Result<String> {
    let range = format!("{base}...HEAD");
    git_stdout(dir, ["diff", "--shortstat", range.as_str()], "summarize diff")
}

pub fn conflicting_files(dir: &Path) -> Result<Vec<String>> {
    let files = git_stdout(
        dir,
        ["diff", "--name-only", "--diff-filter=U"],
        "list conflicting files",
    )?;
    Ok(files
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Whether any unmerged path remains or a tracked file still carries
/// `<<<<<<<`/`>>>>>>>` markers.
pub fn has_conflict_markers(dir: &Path) -> Result<bool> {
    if !conflicting_files(dir)?.is_empty() {
        return Ok(true);
    }
    // `grep` exits 0 on a match, 1 when nothing matched.
    git_predicate(
        dir,
        ["grep", "-q", "-E", "^(<<<<<<<|>>>>>>>) "],
        "conflict markers",
    )
}

pub fn stash_push(dir: &Path, message: &str) -> Result<()> {
    git_stdout(
        dir,
        ["stash", "push", "--include-untracked", "-m", message],
        "stash changes",
    )?;
    Ok(())
}

pub fn stash_pop(dir: &Path) -> Result<()> {
    git_stdout(dir, ["stash", "pop"], "restore stashed changes")?;
    Ok(())
}

pub fn checkout(dir: &Path, branch: &str) -> Result<()> {
    git_stdout(dir, ["checkout", "-q", branch], "checkout branch")?;
    Ok(())
}

pub fn branch_exists(dir: &Path, branch: &str) -> Result<bool> {
    let ref_name = format!("refs/heads/{branch}");
    git_predicate(
        dir,
        ["show-ref", "--verify", "--quiet", ref_name.as_str()],
        "branch",
    )
}

pub fn is_merged_into(dir: &Path, branch: &str, base: &str) -> Result<bool> {
    git_predicate(
        dir,
        ["merge-base", "--is-ancestor", branch, base],
        "merge status",
    )
}

pub fn delete_branch(dir: &Path, branch: &str) -> Result<()> {
    if !branch_exists(dir, branch)? {
        return Ok(());
    }
    git_stdout(dir, ["branch", "-D", branch], "delete branch")?;
    Ok(())
}

pub fn push_branch(dir: &Path, remote: &str, branch: &str) -> Result<()> {
    git_stdout(
        dir,
        ["push", "--quiet", "-u", remote, branch],
        "push branch",
    )?;
    Ok(())
}
