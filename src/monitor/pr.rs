//! Watch-PR: follow a task's pull request until it is merged or closed.

use anyhow::Result;
use tracing::{info, trace, warn};

use crate::finish;
use crate::log::{LogEvent, TaskLog};
use crate::monitor::{Monitor, MonitorExit, TickOutcome};
use crate::notify::Notifier;
use crate::review::{ReviewSource, ReviewState};
use crate::session::Ctx;
use crate::status::{self, Observation, TaskStatus, Transition};
use crate::task::Task;

pub struct PrMonitor<'a> {
    ctx: &'a Ctx<'a>,
    reviews: &'a dyn ReviewSource,
    notifier: &'a dyn Notifier,
    log: &'a TaskLog,
    task: &'a Task,
    window: String,
    last_state: Option<ReviewState>,
}

impl<'a> PrMonitor<'a> {
    pub fn new(
        ctx: &'a Ctx<'a>,
        reviews: &'a dyn ReviewSource,
        notifier: &'a dyn Notifier,
        log: &'a TaskLog,
        task: &'a Task,
        window: &str,
    ) -> Self {
        Self {
            ctx,
            reviews,
            notifier,
            log,
            task,
            window: window.to_string(),
            last_state: None,
        }
    }

    fn set_status(&self, to: TaskStatus) -> Result<()> {
        match status::transition(self.ctx.mux, &self.window, &self.task.name, to)? {
            Transition::Applied { from, to } => {
                info!(task = %self.task.name, %from, %to, "status changed");
                self.log.record(LogEvent::StatusChanged {
                    from: from.to_string(),
                    to: to.to_string(),
                    source: "watch-pr".to_string(),
                });
            }
            Transition::Skipped(reason) => {
                trace!(task = %self.task.name, %reason, "transition skipped");
            }
        }
        Ok(())
    }
}

impl Monitor for PrMonitor<'_> {
    fn name(&self) -> &str {
        "watch-pr"
    }

    fn tick(&mut self) -> Result<TickOutcome> {
        let current = match status::observe(self.ctx.mux, &self.window, &self.task.name)? {
            Observation::Owned(status) => status,
            Observation::Gone => return Ok(TickOutcome::Exit(MonitorExit::WindowGone)),
            Observation::Foreign(reason) => {
                return Ok(TickOutcome::Exit(MonitorExit::Reassigned(reason.to_string())));
            }
        };

        let state = self.reviews.status(self.task)?;
        if self.last_state != Some(state) {
            info!(task = %self.task.name, state = state.as_str(), "pull request state");
            self.log.record(LogEvent::ReviewObserved {
                state: state.as_str().to_string(),
            });
            self.last_state = Some(state);
        }

        match state {
            ReviewState::Merged => {
                self.notifier.play_sound("complete")?;
                self.notifier.notify(
                    &format!("paw: {} merged", self.task.name),
                    "Pull request merged; cleaning up.",
                )?;
                if let Err(e) = finish::cleanup_task(self.ctx, self.task, true, self.log) {
                    warn!(task = %self.task.name, error = %format!("{e:#}"), "cleanup after merge failed");
                }
                Ok(TickOutcome::Exit(MonitorExit::Merged))
            }
            ReviewState::Closed => {
                self.set_status(TaskStatus::Warning)?;
                self.notifier.notify(
                    &format!("paw: {} closed", self.task.name),
                    "Pull request closed without merging.",
                )?;
                Ok(TickOutcome::Exit(MonitorExit::Closed))
            }
            ReviewState::Open => {
                if !current.is_active_work()
                    && !matches!(current, TaskStatus::Review | TaskStatus::Warning)
                {
                    self.set_status(TaskStatus::Review)?;
                }
                Ok(TickOutcome::Continue)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectConfig;
    use crate::monitor::run_monitor;
    use crate::status::{TASK_OPTION, encode};
    use crate::task::in_place_task;
    use crate::testing::{FakeMux, FakeNotifier, ManualTicker, RecordingSpawner, ScriptedReviews};
    use crate::tmux::Multiplexer;

    struct Fixture {
        mux: FakeMux,
        spawner: RecordingSpawner,
        reviews: ScriptedReviews,
        notifier: FakeNotifier,
        log: TaskLog,
        tmp: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        Fixture {
            mux: FakeMux::new(),
            spawner: RecordingSpawner::default(),
            reviews: ScriptedReviews::default(),
            notifier: FakeNotifier::default(),
            log: TaskLog::disabled(),
            tmp: tempfile::tempdir().unwrap(),
        }
    }

    fn window(f: &Fixture, ctx: &Ctx, task: &Task, status: TaskStatus) -> String {
        let id = f.mux.add_window(&ctx.session, &encode(&task.name, status), "claude");
        f.mux.set_window_option(&id, TASK_OPTION, &task.name).unwrap();
        task.bind_window(&id).unwrap();
        id
    }

    fn status_of(f: &Fixture, window: &str) -> TaskStatus {
        status::decode(&f.mux.window_name(window).unwrap()).unwrap().status
    }

    #[test]
    fn open_pr_moves_idle_window_to_review() {
        let f = fixture();
        let ctx = Ctx::new(f.tmp.path(), ProjectConfig::default(), &f.mux, &f.spawner);
        let task = in_place_task(f.tmp.path(), "fix-login");
        let id = window(&f, &ctx, &task, TaskStatus::New);
        f.reviews.push(ReviewState::Open);

        let mut monitor = PrMonitor::new(&ctx, &f.reviews, &f.notifier, &f.log, &task, &id);
        assert_eq!(monitor.tick().unwrap(), TickOutcome::Continue);
        assert_eq!(status_of(&f, &id), TaskStatus::Review);
    }

    #[test]
    fn open_pr_leaves_active_work_alone() {
        let f = fixture();
        let ctx = Ctx::new(f.tmp.path(), ProjectConfig::default(), &f.mux, &f.spawner);
        let task = in_place_task(f.tmp.path(), "fix-login");
        let id = window(&f, &ctx, &task, TaskStatus::Waiting);
        f.reviews.push(ReviewState::Open);

        let mut monitor = PrMonitor::new(&ctx, &f.reviews, &f.notifier, &f.log, &task, &id);
        monitor.tick().unwrap();
        assert_eq!(status_of(&f, &id), TaskStatus::Waiting);
    }

    #[test]
    fn query_failures_are_not_terminal() {
        let f = fixture();
        let ctx = Ctx::new(f.tmp.path(), ProjectConfig::default(), &f.mux, &f.spawner);
        let task = in_place_task(f.tmp.path(), "fix-login");
        let id = window(&f, &ctx, &task, TaskStatus::Review);
        f.reviews.push_error("gh: rate limited");
        f.reviews.push(ReviewState::Open);
        f.reviews.push(ReviewState::Closed);

        let mut monitor = PrMonitor::new(&ctx, &f.reviews, &f.notifier, &f.log, &task, &id);
        let exit = run_monitor(&mut monitor, &mut ManualTicker::new(10), &f.log);

        assert_eq!(exit, MonitorExit::Closed);
        assert_eq!(status_of(&f, &id), TaskStatus::Warning);
    }

    #[test]
    fn merged_pr_cleans_up_and_exits() {
        let f = fixture();
        let ctx = Ctx::new(f.tmp.path(), ProjectConfig::default(), &f.mux, &f.spawner);
        let task = in_place_task(f.tmp.path(), "fix-login");
        let id = window(&f, &ctx, &task, TaskStatus::Review);
        f.reviews.push(ReviewState::Merged);

        let mut monitor = PrMonitor::new(&ctx, &f.reviews, &f.notifier, &f.log, &task, &id);
        assert_eq!(monitor.tick().unwrap(), TickOutcome::Exit(MonitorExit::Merged));

        assert_eq!(f.notifier.sounds(), vec!["complete"]);
        assert_eq!(f.mux.killed(), vec![id]);
        assert!(!ctx.store().exists("fix-login"));
    }

    #[test]
    fn reassigned_window_stops_the_monitor() {
        let f = fixture();
        let ctx = Ctx::new(f.tmp.path(), ProjectConfig::default(), &f.mux, &f.spawner);
        let task = in_place_task(f.tmp.path(), "fix-login");
        let id = window(&f, &ctx, &task, TaskStatus::Review);
        f.mux.set_window_option(&id, TASK_OPTION, "someone-else").unwrap();

        let mut monitor = PrMonitor::new(&ctx, &f.reviews, &f.notifier, &f.log, &task, &id);
        assert!(matches!(
            monitor.tick().unwrap(),
            TickOutcome::Exit(MonitorExit::Reassigned(_))
        ));
    }
}
