//! Bring tmux windows back in line with the task records on disk.
//!
//! Runs at `paw start` and on every re-attach, under `.paw/reconcile.lock`:
//!
//! 1. prune dangling worktree registrations;
//! 2. clean up tasks whose branch has been merged into the base branch;
//! 3. kill task-looking windows that have no task record;
//! 4. relaunch tasks that have no window (fire-and-forget `paw launch`);
//! 5. resume workers that exited inside a still-open window.
//!
//! A failing step or task is recorded and the rest still run. Every step is
//! idempotent: a second pass with nothing changed in between does nothing.

use anyhow::Result;
use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::finish;
use crate::git;
use crate::launch::{self, LAUNCH_GRACE_SECS};
use crate::lock::{self, LockError};
use crate::log::LogEvent;
use crate::paths;
use crate::session::{Ctx, worker_stopped};
use crate::spawn;
use crate::status::{self, TASK_OPTION};
use crate::task::Task;
use crate::worktree;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Another reconciliation held the lock; nothing was done.
    pub skipped: bool,
    /// Worktree registrations whose directory had disappeared.
    pub pruned: usize,
    pub cleaned: Vec<String>,
    pub orphans_closed: Vec<String>,
    pub relaunched: Vec<String>,
    pub resumed: Vec<String>,
    pub errors: Vec<String>,
}

impl ReconcileReport {
    /// Whether any task or window was touched.
    pub fn changed(&self) -> bool {
        !(self.cleaned.is_empty()
            && self.orphans_closed.is_empty()
            && self.relaunched.is_empty()
            && self.resumed.is_empty())
    }

    fn error(&mut self, what: String) {
        warn!("{what}");
        self.errors.push(what);
    }
}

pub fn reconcile(ctx: &Ctx) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();
    let _lock = match lock::acquire(&paths::reconcile_lock(&ctx.root), "reconcile") {
        Ok(handle) => handle,
        Err(LockError::Locked { pid, .. }) => {
            info!(pid, "reconciliation already running");
            report.skipped = true;
            return Ok(report);
        }
        Err(e) => return Err(e.into()),
    };

    prune(ctx, &mut report);
    clean_merged(ctx, &mut report);

    let tasks = match ctx.store().list() {
        Ok(tasks) => tasks,
        Err(e) => {
            report.error(format!("cannot list tasks: {e:#}"));
            return Ok(report);
        }
    };
    close_orphans(ctx, &tasks, &mut report);
    for task in &tasks {
        if let Err(e) = restore(ctx, task, &mut report) {
            report.error(format!("{}: {e:#}", task.name));
        }
    }

    info!(
        cleaned = report.cleaned.len(),
        orphans = report.orphans_closed.len(),
        relaunched = report.relaunched.len(),
        resumed = report.resumed.len(),
        errors = report.errors.len(),
        "reconciliation finished"
    );
    Ok(report)
}

fn prune(ctx: &Ctx, report: &mut ReconcileReport) {
    if git::repo_root(&ctx.root).is_err() {
        return;
    }
    let prunable = match worktree::list_worktrees(&ctx.root) {
        Ok(entries) => entries.iter().filter(|e| e.prunable).count(),
        Err(e) => return report.error(format!("worktree list failed: {e:#}")),
    };
    if prunable == 0 {
        return;
    }
    match worktree::prune_worktrees(&ctx.root) {
        Ok(()) => report.pruned = prunable,
        Err(e) => report.error(format!("worktree prune failed: {e:#}")),
    }
}

/// The branch has commits of its own and all of them are in the base branch.
fn is_merged(ctx: &Ctx, task: &Task) -> Result<bool> {
    let Some(branch) = task.branch.as_deref() else {
        return Ok(false);
    };
    if !git::branch_exists(&ctx.root, branch)? {
        return Ok(false);
    }
    let tip = git::rev_parse(&ctx.root, branch)?;
    if task.base_commit.as_deref() == Some(tip.as_str()) {
        return Ok(false);
    }
    git::is_merged_into(&ctx.root, branch, &ctx.config.worktree.base_branch)
}

fn clean_merged(ctx: &Ctx, report: &mut ReconcileReport) {
    let tasks = match ctx.store().list() {
        Ok(tasks) => tasks,
        Err(e) => return report.error(format!("cannot list tasks: {e:#}")),
    };
    for task in tasks.iter().filter(|t| t.is_isolated()) {
        match is_merged(ctx, task) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                report.error(format!("{}: merge check failed: {e:#}", task.name));
                continue;
            }
        }
        let log = task.open_log();
        log.record(LogEvent::Reconciled {
            action: "clean merged".to_string(),
        });
        match finish::cleanup_task(ctx, task, true, &log) {
            Ok(_) => report.cleaned.push(task.name.clone()),
            Err(e) => report.error(format!("{}: cleanup failed: {e:#}", task.name)),
        }
    }
}

fn close_orphans(ctx: &Ctx, tasks: &[Task], report: &mut ReconcileReport) {
    let windows = match ctx.mux.list_windows(&ctx.session) {
        Ok(windows) => windows,
        Err(e) => return report.error(format!("cannot list windows: {e:#}")),
    };
    for window in windows {
        let Some(marker) = status::decode(&window.name) else {
            continue;
        };
        let owner = match ctx.mux.window_option(&window.id, TASK_OPTION) {
            Ok(owner) => owner,
            Err(e) => {
                report.error(format!("{}: {e:#}", window.name));
                continue;
            }
        };
        let known = match owner {
            Some(owner) => tasks.iter().any(|t| t.name == owner),
            None => tasks.iter().any(|t| status::matches(&marker.token, &t.name)),
        };
        if known {
            continue;
        }
        info!(window = %window.id, name = %window.name, "closing orphaned window");
        match ctx.mux.kill_window(&window.id) {
            Ok(()) => report.orphans_closed.push(window.name),
            Err(e) => report.error(format!("{}: kill failed: {e:#}", window.name)),
        }
    }
}

/// Steps 4 and 5 for one task.
fn restore(ctx: &Ctx, task: &Task, report: &mut ReconcileReport) -> Result<()> {
    let now = Utc::now();
    let Some(window) = ctx.find_task_window(task)? else {
        if task.launch_pending_within(now, Duration::seconds(LAUNCH_GRACE_SECS)) {
            debug!(task = %task.name, "launch already pending");
            return Ok(());
        }
        let resume = task.session_started_at().is_some();
        task.clear_binding()?;
        task.mark_launch_pending(now)?;
        ctx.spawner.spawn_detached(
            &spawn::launch_args(&task.name, resume),
            &format!("launch-{}", task.name),
        )?;
        info!(task = %task.name, resume, "relaunch requested");
        task.open_log().record(LogEvent::Reconciled {
            action: "relaunch".to_string(),
        });
        report.relaunched.push(task.name.clone());
        return Ok(());
    };

    if task.window_binding().as_deref() != Some(window.id.as_str()) {
        task.bind_window(&window.id)?;
    }
    let terminal = status::decode(&window.name).is_some_and(|m| m.status.is_terminal());
    if !worker_stopped(&window) {
        // Monitors are single-instance, so this only replaces crashed ones.
        if !terminal {
            launch::start_monitors(ctx, task)?;
        }
        return Ok(());
    }
    if terminal {
        debug!(task = %task.name, "worker exited after finishing; leaving it");
        return Ok(());
    }

    let log = task.open_log();
    let resume = task.session_started_at().is_some();
    launch::respawn_worker(ctx, task, &window, resume, &log)?;
    launch::start_monitors(ctx, task)?;
    log.record(LogEvent::Reconciled {
        action: "resume".to_string(),
    });
    report.resumed.push(task.name.clone());
    Ok(())
}
