//! Keep task branches in step with the base branch, and land them.
//!
//! `sync_task` rebases a task worktree onto the upstream base branch.
//! `merge_task` merges the task branch into the base branch in the project
//! root, serialized through `.paw/merge.lock`.
//!
//! Both check preconditions before touching anything (uncommitted changes,
//! a rebase or merge already in progress) and stop with exact remediation
//! commands. On conflicts they may hand the repository to the delegate
//! resolver, then re-verify: a resolver that claims success while conflict
//! markers or an unfinished rebase remain yields `Failed`, never success.
//! Nothing here aborts or forces a git operation on the user's behalf.

use std::fmt;
use std::path::Path;

use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::git;
use crate::lock::{self, LockError};
use crate::log::{LogEvent, TaskLog};
use crate::paths;
use crate::resolver::{self, ConflictResolver, ResolveRequest, ResolverOutcome};
use crate::session::Ctx;
use crate::task::Task;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing to do.
    UpToDate,
    /// The task branch was rebased over `behind` new upstream commits.
    Rebased { behind: u32 },
    /// The task branch was merged into the base branch.
    Merged,
    /// Conflicts were resolved by the delegate and verified.
    ResolvedByDelegate,
    /// A precondition failed; nothing was changed.
    Blocked {
        reason: String,
        remediation: Vec<String>,
    },
    /// The operation stopped part-way; the repository is left as it is.
    Failed {
        reason: String,
        remediation: Vec<String>,
    },
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            SyncOutcome::UpToDate
                | SyncOutcome::Rebased { .. }
                | SyncOutcome::Merged
                | SyncOutcome::ResolvedByDelegate
        )
    }

    pub fn remediation(&self) -> &[String] {
        match self {
            SyncOutcome::Blocked { remediation, .. } | SyncOutcome::Failed { remediation, .. } => {
                remediation
            }
            _ => &[],
        }
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::UpToDate => write!(f, "already up to date"),
            SyncOutcome::Rebased { behind } => {
                write!(f, "rebased onto {behind} new upstream commit(s)")
            }
            SyncOutcome::Merged => write!(f, "merged"),
            SyncOutcome::ResolvedByDelegate => write!(f, "conflicts resolved by delegate"),
            SyncOutcome::Blocked { reason, .. } => write!(f, "blocked: {reason}"),
            SyncOutcome::Failed { reason, .. } => write!(f, "failed: {reason}"),
        }
    }
}

fn cd(dir: &Path) -> String {
    format!("cd {}", dir.display())
}

/// Hard stops checked before any mutation of `dir`.
fn check_preconditions(dir: &Path) -> Result<Option<SyncOutcome>> {
    if git::rebase_in_progress(dir)? {
        return Ok(Some(SyncOutcome::Blocked {
            reason: format!("a rebase is already in progress in {}", dir.display()),
            remediation: vec![
                format!("{} && git status", cd(dir)),
                "git rebase --continue".to_string(),
                "git rebase --abort".to_string(),
            ],
        }));
    }
    if git::merge_in_progress(dir)? {
        return Ok(Some(SyncOutcome::Blocked {
            reason: format!("a merge is already in progress in {}", dir.display()),
            remediation: vec![
                format!("{} && git status", cd(dir)),
                "git commit".to_string(),
                "git merge --abort".to_string(),
            ],
        }));
    }
    if git::is_dirty(dir)? {
        return Ok(Some(SyncOutcome::Blocked {
            reason: format!("uncommitted changes in {}", dir.display()),
            remediation: vec![
                format!("{} && git status", cd(dir)),
                "git add -A && git commit -m \"wip\"".to_string(),
                "git stash".to_string(),
            ],
        }));
    }
    Ok(None)
}

fn rebase_remediation(dir: &Path) -> Vec<String> {
    vec![
        format!("{} && git status", cd(dir)),
        "git add <resolved files> && git rebase --continue".to_string(),
        "git rebase --abort".to_string(),
    ]
}

fn merge_remediation(dir: &Path) -> Vec<String> {
    vec![
        format!("{} && git status", cd(dir)),
        "git add <resolved files> && git commit".to_string(),
        "git merge --abort".to_string(),
    ]
}

/// Anything that still needs a human after the delegate returned.
fn leftover_problem(dir: &Path) -> Result<Option<String>> {
    if git::has_conflict_markers(dir)? {
        return Ok(Some("conflict markers remain".to_string()));
    }
    if git::rebase_in_progress(dir)? {
        return Ok(Some("the rebase is still in progress".to_string()));
    }
    if git::merge_in_progress(dir)? {
        return Ok(Some("the merge is still in progress".to_string()));
    }
    Ok(None)
}

fn delegate(
    ctx: &Ctx,
    resolver: &dyn ConflictResolver,
    request: &ResolveRequest,
    log: &TaskLog,
) -> ResolverOutcome {
    log.record(LogEvent::ResolverInvoked {
        program: ctx.config.resolver.program.clone(),
        timeout_secs: ctx.config.resolver.timeout_secs,
    });
    let outcome = resolver.resolve(request);
    info!(task = %request.task, outcome = %outcome.describe(), "resolver returned");
    log.record(LogEvent::ResolverFinished {
        outcome: outcome.describe(),
    });
    outcome
}

/// Judge the repository after a delegate run.
fn verify_delegate(
    dir: &Path,
    outcome: ResolverOutcome,
    remediation: Vec<String>,
) -> Result<SyncOutcome> {
    let reason = match (outcome, leftover_problem(dir)?) {
        (ResolverOutcome::Completed, None) => return Ok(SyncOutcome::ResolvedByDelegate),
        (ResolverOutcome::Completed, Some(problem)) => {
            format!("resolver finished but {problem}")
        }
        (ResolverOutcome::TimedOut, _) => "resolver timed out".to_string(),
        (ResolverOutcome::Failed(why), _) => format!("resolver failed: {why}"),
    };
    Ok(SyncOutcome::Failed {
        reason,
        remediation,
    })
}

fn record(log: &TaskLog, operation: &str, outcome: &SyncOutcome) {
    log.record(LogEvent::SyncFinished {
        operation: operation.to_string(),
        outcome: outcome.to_string(),
    });
}

/// Rebase the task worktree onto the upstream base branch.
///
/// With a `resolver`, a conflicted rebase is delegated before giving up.
pub fn sync_task(
    ctx: &Ctx,
    task: &Task,
    resolver: Option<&dyn ConflictResolver>,
    log: &TaskLog,
) -> Result<SyncOutcome> {
    if task.branch.is_none() {
        bail!("task '{}' runs in place; there is no branch to sync", task.name);
    }
    let dir = task.work_dir.as_path();
    let outcome = sync_in(ctx, task, dir, resolver, log)?;
    record(log, "sync", &outcome);
    Ok(outcome)
}

fn sync_in(
    ctx: &Ctx,
    task: &Task,
    dir: &Path,
    resolver: Option<&dyn ConflictResolver>,
    log: &TaskLog,
) -> Result<SyncOutcome> {
    if let Some(blocked) = check_preconditions(dir)? {
        return Ok(blocked);
    }

    let wt = &ctx.config.worktree;
    let upstream = if git::remote_exists(dir, &wt.remote)? {
        git::fetch(dir, &wt.remote)?;
        format!("{}/{}", wt.remote, wt.base_branch)
    } else {
        wt.base_branch.clone()
    };

    let (_, behind) = git::ahead_behind(dir, "HEAD", &upstream)?;
    if behind == 0 {
        info!(task = %task.name, upstream = %upstream, "already up to date");
        return Ok(SyncOutcome::UpToDate);
    }

    info!(task = %task.name, upstream = %upstream, behind, "rebasing");
    if git::rebase(dir, &upstream)? {
        return Ok(SyncOutcome::Rebased { behind });
    }

    let files = git::conflicting_files(dir)?;
    warn!(task = %task.name, files = ?files, "rebase stopped on conflicts");
    let Some(resolver) = resolver else {
        return Ok(SyncOutcome::Failed {
            reason: format!(
                "rebase onto {upstream} stopped on conflicts in: {}",
                files.join(", ")
            ),
            remediation: rebase_remediation(dir),
        });
    };

    let request = ResolveRequest {
        work_dir: dir.to_path_buf(),
        task: task.name.clone(),
        prompt: resolver::compose_conflict_prompt(&task.name, &task.description, &upstream, &files),
    };
    let outcome = delegate(ctx, resolver, &request, log);
    verify_delegate(dir, outcome, rebase_remediation(dir))
}

/// Merge the task branch into the base branch in the project root.
///
/// Uncommitted changes in the root checkout are stashed around the merge.
pub fn merge_task(
    ctx: &Ctx,
    task: &Task,
    resolver: Option<&dyn ConflictResolver>,
    log: &TaskLog,
) -> Result<SyncOutcome> {
    let Some(branch) = task.branch.as_deref() else {
        bail!("task '{}' runs in place; there is no branch to merge", task.name);
    };

    let _lock = match lock::acquire(&paths::merge_lock(&ctx.root), &format!("merge {branch}")) {
        Ok(handle) => handle,
        Err(LockError::Locked { label, pid, .. }) => {
            let outcome = SyncOutcome::Blocked {
                reason: format!("another merge is running ({label}, pid {pid})"),
                remediation: vec![format!("paw merge {}", task.name)],
            };
            record(log, "merge", &outcome);
            return Ok(outcome);
        }
        Err(e) => return Err(e.into()),
    };

    let outcome = merge_in_root(ctx, task, branch, resolver, log)?;
    record(log, "merge", &outcome);
    Ok(outcome)
}

fn merge_in_root(
    ctx: &Ctx,
    task: &Task,
    branch: &str,
    resolver: Option<&dyn ConflictResolver>,
    log: &TaskLog,
) -> Result<SyncOutcome> {
    let root = ctx.root.as_path();
    let base = ctx.config.worktree.base_branch.as_str();

    if !git::branch_exists(root, branch)? {
        bail!("branch '{branch}' does not exist");
    }
    if task.work_dir.as_path() != root && task.work_dir.exists() {
        if let Some(blocked) = check_preconditions(&task.work_dir)? {
            return Ok(blocked);
        }
    }
    if git::rebase_in_progress(root)? || git::merge_in_progress(root)? {
        return Ok(SyncOutcome::Blocked {
            reason: format!("a rebase or merge is already in progress in {}", root.display()),
            remediation: merge_remediation(root),
        });
    }
    let current = git::current_branch(root)?;
    if current != base {
        return Ok(SyncOutcome::Blocked {
            reason: format!("{} is on '{current}', not '{base}'", root.display()),
            remediation: vec![format!("{} && git checkout {base}", cd(root))],
        });
    }
    if git::is_merged_into(root, branch, base)? {
        return Ok(SyncOutcome::UpToDate);
    }

    let stashed = git::is_dirty(root)?;
    if stashed {
        info!(root = %root.display(), "stashing local changes around the merge");
        git::stash_push(root, &format!("paw: merge {branch}"))?;
    }

    let message = format!("Merge {branch}");
    let outcome = if git::merge_no_ff(root, branch, &message)? {
        SyncOutcome::Merged
    } else if let Some(resolver) = resolver {
        let status = git::status_porcelain(root)?;
        let request = ResolveRequest {
            work_dir: root.to_path_buf(),
            task: task.name.clone(),
            prompt: resolver::compose_merge_prompt(&task.name, branch, base, &status),
        };
        let outcome = delegate(ctx, resolver, &request, log);
        match verify_delegate(root, outcome, merge_remediation(root))? {
            // The delegate may legitimately abort; that is not a merge.
            SyncOutcome::ResolvedByDelegate if !git::is_merged_into(root, branch, base)? => {
                SyncOutcome::Failed {
                    reason: format!("resolver finished but {branch} is not merged into {base}"),
                    remediation: merge_remediation(root),
                }
            }
            other => other,
        }
    } else {
        SyncOutcome::Failed {
            reason: format!("merging {branch} into {base} failed"),
            remediation: merge_remediation(root),
        }
    };

    if !stashed {
        return Ok(outcome);
    }
    if !outcome.is_success() {
        let (reason, mut remediation) = match outcome {
            SyncOutcome::Failed { reason, remediation } => (reason, remediation),
            other => (other.to_string(), Vec::new()),
        };
        remediation.push("git stash pop   # your local changes were stashed before the merge".to_string());
        return Ok(SyncOutcome::Failed {
            reason,
            remediation,
        });
    }
    if let Err(e) = git::stash_pop(root) {
        warn!(error = %e, "restoring stashed changes failed");
        return Ok(SyncOutcome::Failed {
            reason: format!("{branch} was merged, but restoring stashed changes failed"),
            remediation: vec![
                format!("{} && git stash list", cd(root)),
                "git stash pop".to_string(),
            ],
        });
    }
    Ok(outcome)
}
