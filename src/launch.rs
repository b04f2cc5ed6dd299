//! Start (or restart) the worker of a task in its tmux window.

use anyhow::Result;
use chrono::Utc;
use tracing::info;

use crate::agent;
use crate::log::{LogEvent, TaskLog};
use crate::session::{Ctx, worker_stopped};
use crate::spawn;
use crate::status::{self, TASK_OPTION, TaskStatus, Transition};
use crate::task::Task;
use crate::tmux::WindowInfo;

/// How long a requested launch suppresses another one for the same task.
pub const LAUNCH_GRACE_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// A new window was opened for the task.
    Created(WindowInfo),
    /// The worker was restarted inside its existing window.
    Respawned(WindowInfo),
    /// A worker is already running; nothing was started.
    AlreadyRunning(WindowInfo),
}

impl LaunchOutcome {
    pub fn window(&self) -> &WindowInfo {
        match self {
            LaunchOutcome::Created(w)
            | LaunchOutcome::Respawned(w)
            | LaunchOutcome::AlreadyRunning(w) => w,
        }
    }
}

/// Make sure `task` has a window with a live worker, then start its monitors.
///
/// With `resume` the agent continues its previous conversation instead of
/// starting from the task description.
pub fn launch_task(ctx: &Ctx, task: &Task, resume: bool, log: &TaskLog) -> Result<LaunchOutcome> {
    ctx.ensure_session()?;

    let outcome = match ctx.find_task_window(task)? {
        Some(window) if !worker_stopped(&window) => {
            info!(task = %task.name, window = %window.id, "worker already running");
            task.bind_window(&window.id)?;
            task.clear_launch_pending()?;
            return Ok(LaunchOutcome::AlreadyRunning(window));
        }
        Some(window) => {
            respawn_worker(ctx, task, &window, resume, log)?;
            LaunchOutcome::Respawned(window)
        }
        None => {
            let spawn = agent::adapter_for(&ctx.config.agent).spawn_config(task, resume);
            let name = status::encode(&task.name, TaskStatus::New);
            let window = ctx
                .mux
                .new_window(&ctx.session, &name, &spawn.work_dir, &spawn.command())?;
            ctx.mux.set_window_option(&window.id, TASK_OPTION, &task.name)?;
            info!(task = %task.name, window = %window.id, program = %spawn.program, "worker window created");
            log.record(LogEvent::WorkerLaunched {
                program: spawn.program,
                window: window.id.clone(),
                resume,
            });
            LaunchOutcome::Created(window)
        }
    };

    let window = outcome.window();
    task.bind_window(&window.id)?;
    task.clear_launch_pending()?;
    task.record_session_start(Utc::now())?;
    start_monitors(ctx, task)?;
    Ok(outcome)
}

/// Restart the agent inside `window`, keeping the window and its binding.
pub fn respawn_worker(
    ctx: &Ctx,
    task: &Task,
    window: &WindowInfo,
    resume: bool,
    log: &TaskLog,
) -> Result<()> {
    let spawn = agent::adapter_for(&ctx.config.agent).spawn_config(task, resume);
    ctx.mux
        .respawn_pane(&window.pane_id, &spawn.work_dir, &spawn.command())?;
    if let Transition::Applied { from, to } =
        status::override_status(ctx.mux, &window.id, &task.name, TaskStatus::New)?
    {
        log.record(LogEvent::StatusChanged {
            from: from.to_string(),
            to: to.to_string(),
            source: "respawn".to_string(),
        });
    }
    info!(task = %task.name, window = %window.id, resume, "worker respawned in place");
    log.record(LogEvent::WorkerLaunched {
        program: spawn.program,
        window: window.id.clone(),
        resume,
    });
    task.record_session_start(Utc::now())
}

/// Spawn the monitors of `task`. Each takes a single-instance lock, so
/// spawning one that is already running is harmless.
pub fn start_monitors(ctx: &Ctx, task: &Task) -> Result<()> {
    ctx.spawner.spawn_detached(
        &spawn::watch_wait_args(&task.name),
        &format!("watch-wait-{}", task.name),
    )?;
    if task.pr_url.is_some() {
        ctx.spawner.spawn_detached(
            &spawn::watch_pr_args(&task.name),
            &format!("watch-pr-{}", task.name),
        )?;
    }
    Ok(())
}
