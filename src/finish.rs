//! Finishing a task and tearing its workspace down.
//!
//! `finish_task` commits whatever the worker left uncommitted, applies the
//! on-complete policy and writes the history record. `cleanup_task` removes
//! the window, worktree, branch and agent directory; reconciliation and
//! Watch-PR use it too.

use std::path::PathBuf;

use anyhow::{Result, bail};
use chrono::Utc;
use tracing::{info, warn};

use crate::config::OnComplete;
use crate::git;
use crate::history::{self, HistoryRecord};
use crate::lock::{self, LockError};
use crate::log::{LogEvent, TaskLog};
use crate::resolver::ConflictResolver;
use crate::review;
use crate::session::Ctx;
use crate::spawn;
use crate::status::{self, TaskStatus, Transition};
use crate::sync::{self, SyncOutcome};
use crate::task::Task;
use crate::worktree;

/// Path that must never end up in a task commit.
const PAW_PATH: &str = ".paw";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub window_killed: bool,
    pub worktree_removed: bool,
    pub branch_deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishReport {
    pub policy: OnComplete,
    /// Commit created from leftover changes.
    pub committed: Option<String>,
    /// Merge result under the `merge` policy.
    pub merge: Option<SyncOutcome>,
    pub pr_url: Option<String>,
    pub history: Option<PathBuf>,
    pub cleanup: Option<CleanupReport>,
}

/// Commit leftover changes in the task's work dir, keeping `.paw` out.
fn commit_pending(task: &Task, log: &TaskLog) -> Result<Option<String>> {
    let dir = task.work_dir.as_path();
    if git::repo_root(dir).is_err() || !git::is_dirty(dir)? {
        return Ok(None);
    }
    git::stage_all(dir)?;
    if git::is_staged(dir, PAW_PATH)? {
        git::unstage(dir, PAW_PATH)?;
    }
    if !git::has_staged_changes(dir)? {
        return Ok(None);
    }

    let message = format!("paw: finish {}", task.name);
    git::commit(dir, &message)?;
    let hash = git::head_commit(dir)?;
    info!(task = %task.name, commit = %hash, "committed leftover changes");
    log.record(LogEvent::Commit {
        hash: hash.clone(),
        message,
    });
    Ok(Some(hash))
}

fn mark_window(ctx: &Ctx, task: &Task, to: TaskStatus, log: &TaskLog) -> Result<()> {
    let Some(window) = ctx.find_task_window(task)? else {
        return Ok(());
    };
    if let Transition::Applied { from, to } =
        status::transition(ctx.mux, &window.id, &task.name, to)?
    {
        log.record(LogEvent::StatusChanged {
            from: from.to_string(),
            to: to.to_string(),
            source: "finish".to_string(),
        });
    }
    Ok(())
}

fn record_history(ctx: &Ctx, task: &Task, outcome: &str) -> Result<PathBuf> {
    let mut record = HistoryRecord::build(task, outcome, Utc::now());
    if let Some(base) = task.base_commit.as_deref() {
        match git::diff_summary(&task.work_dir, base) {
            Ok(stat) if !stat.is_empty() => record.diff = Some(stat),
            Ok(_) => {}
            Err(e) => warn!(task = %task.name, error = %format!("{e:#}"), "no diff summary"),
        }
    }
    let path = history::write_history(&ctx.root, &record)?;
    info!(task = %task.name, path = %path.display(), "history written");
    Ok(path)
}

/// Finish `task` under `policy`.
///
/// `confirm` keeps the workspace for manual review, `merge` lands the branch
/// and cleans up, `pr` pushes and opens a pull request watched by Watch-PR.
pub fn finish_task(
    ctx: &Ctx,
    task: &mut Task,
    policy: OnComplete,
    resolver: Option<&dyn ConflictResolver>,
    log: &TaskLog,
) -> Result<FinishReport> {
    if policy != OnComplete::Confirm && task.branch.is_none() {
        bail!(
            "task '{}' runs in place; `{}` needs a task branch",
            task.name,
            policy.as_str()
        );
    }

    let mut report = FinishReport {
        policy,
        committed: commit_pending(task, log)?,
        merge: None,
        pr_url: None,
        history: None,
        cleanup: None,
    };

    match policy {
        OnComplete::Confirm => {
            mark_window(ctx, task, TaskStatus::Done, log)?;
            report.history = Some(record_history(ctx, task, "completed")?);
        }
        OnComplete::Merge => {
            let outcome = sync::merge_task(ctx, task, resolver, log)?;
            let landed = outcome.is_success();
            report.merge = Some(outcome);
            if !landed {
                mark_window(ctx, task, TaskStatus::Warning, log)?;
                return Ok(report);
            }
            report.history = Some(record_history(ctx, task, "merged")?);
            log_finished(task, policy, log);
            report.cleanup = Some(cleanup_task(ctx, task, true, log)?);
            return Ok(report);
        }
        OnComplete::Pr => {
            let url = open_pull_request(ctx, task)?;
            task.pr_url = Some(url.clone());
            ctx.store().save(task)?;
            mark_window(ctx, task, TaskStatus::Review, log)?;
            ctx.spawner.spawn_detached(
                &spawn::watch_pr_args(&task.name),
                &format!("watch-pr-{}", task.name),
            )?;
            report.pr_url = Some(url);
            report.history = Some(record_history(ctx, task, "pr-opened")?);
        }
    }

    log_finished(task, policy, log);
    Ok(report)
}

fn log_finished(task: &Task, policy: OnComplete, log: &TaskLog) {
    let duration = task
        .session_started_at()
        .map(|s| (Utc::now() - s).num_seconds().max(0));
    log.record(LogEvent::TaskFinished {
        policy: policy.as_str().to_string(),
        duration_secs: duration,
    });
}

fn open_pull_request(ctx: &Ctx, task: &Task) -> Result<String> {
    let Some(branch) = task.branch.as_deref() else {
        bail!("task '{}' has no branch", task.name);
    };
    let wt = &ctx.config.worktree;
    if !git::remote_exists(&task.work_dir, &wt.remote)? {
        bail!("remote '{}' is not configured; cannot open a pull request", wt.remote);
    }
    git::push_branch(&task.work_dir, &wt.remote, branch)?;

    let title = task
        .description
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or(task.name.as_str());
    let url = review::create_pull_request(&task.work_dir, branch, &wt.base_branch, title, &task.description)?;
    info!(task = %task.name, url = %url, "pull request opened");
    Ok(url)
}

/// Tear down the task: window, worktree, branch, then the agent directory.
///
/// The branch is deleted only when it is merged into the base branch, or
/// when the caller knows it landed elsewhere (`branch_landed`).
pub fn cleanup_task(
    ctx: &Ctx,
    task: &Task,
    branch_landed: bool,
    log: &TaskLog,
) -> Result<CleanupReport> {
    let guard = match lock::acquire(&task.cleanup_lock(), &format!("cleanup {}", task.name)) {
        Ok(guard) => guard,
        Err(LockError::Locked { pid, .. }) => {
            bail!("cleanup of '{}' is already running (pid {pid})", task.name)
        }
        Err(e) => return Err(e.into()),
    };

    let mut report = CleanupReport::default();
    if let Some(window) = ctx.find_task_window(task)? {
        ctx.mux.kill_window(&window.id)?;
        report.window_killed = true;
    }

    if task.is_isolated() && task.work_dir.exists() {
        worktree::remove_task_worktree(&ctx.root, &task.work_dir)?;
        report.worktree_removed = true;
    }

    if let Some(branch) = task.branch.as_deref() {
        let base = ctx.config.worktree.base_branch.as_str();
        if git::branch_exists(&ctx.root, branch)? {
            if branch_landed || git::is_merged_into(&ctx.root, branch, base)? {
                git::delete_branch(&ctx.root, branch)?;
                report.branch_deleted = true;
            } else {
                warn!(task = %task.name, branch, "branch not merged into {base}; keeping it");
            }
        }
    }

    info!(task = %task.name, ?report, "task cleaned up");
    log.record(LogEvent::CleanedUp {
        window_killed: report.window_killed,
        worktree_removed: report.worktree_removed,
        branch_deleted: report.branch_deleted,
    });

    guard.release();
    ctx.store().remove(&task.name)?;
    Ok(report)
}
