//! Watch-Wait: notice when a worker is blocked on the user and tell them.
//!
//! Each tick reads the window register, captures the pane and parses it.
//! A wait signal on screen promotes any non-terminal status to `Waiting`, and
//! the monitor hands back the status it promoted from once the screen clears.
//! `PAW_DONE` in the latest output segment promotes active work to `Done`.
//! While the register reads `Waiting`, the `WaitTracker` decides when an alert
//! is due; any other register value re-arms it. Prompts with
//! 2 to 5 options are offered as choices and a pick is typed into the pane.

use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, trace};

use crate::detector::{Alert, WaitTracker};
use crate::log::{LogEvent, TaskLog};
use crate::monitor::{Monitor, MonitorExit, TickOutcome};
use crate::notify::Notifier;
use crate::prompt::{self, Prompt, WaitReason};
use crate::status::{self, Observation, TaskStatus, Transition};
use crate::task::Task;
use crate::tmux::Multiplexer;

/// Lines of scrollback captured per tick.
pub const CAPTURE_LINES: u32 = 100;

pub struct WaitMonitor<'a> {
    mux: &'a dyn Multiplexer,
    notifier: &'a dyn Notifier,
    log: &'a TaskLog,
    task: &'a Task,
    window: String,
    ask_timeout: Duration,
    tracker: WaitTracker,
    // Status this monitor promoted to Waiting from, if it did.
    promoted_from: Option<TaskStatus>,
}

impl<'a> WaitMonitor<'a> {
    pub fn new(
        mux: &'a dyn Multiplexer,
        notifier: &'a dyn Notifier,
        log: &'a TaskLog,
        task: &'a Task,
        window: &str,
        ask_timeout: Duration,
    ) -> Self {
        Self {
            mux,
            notifier,
            log,
            task,
            window: window.to_string(),
            ask_timeout,
            tracker: WaitTracker::new(),
            promoted_from: None,
        }
    }

    fn set_status(&self, to: TaskStatus) -> Result<Option<TaskStatus>> {
        match status::transition(self.mux, &self.window, &self.task.name, to)? {
            Transition::Applied { from, to } => {
                info!(task = %self.task.name, %from, %to, "status changed");
                self.log.record(LogEvent::StatusChanged {
                    from: from.to_string(),
                    to: to.to_string(),
                    source: "watch-wait".to_string(),
                });
                Ok(Some(to))
            }
            Transition::Skipped(reason) => {
                trace!(task = %self.task.name, %reason, "transition skipped");
                Ok(None)
            }
        }
    }

    fn alert(&self, pane: &str, alert: &Alert) -> Result<()> {
        let title = format!("paw: {} needs input", self.task.name);
        let question = alert
            .prompt
            .as_ref()
            .map(|p| p.question.clone())
            .filter(|q| !q.is_empty())
            .unwrap_or_else(|| "The worker is waiting for you.".to_string());
        self.log.record(LogEvent::WaitDetected {
            reason: alert
                .reason
                .map(|r| r.as_str().to_string())
                .unwrap_or_else(|| "status".to_string()),
            question: alert.prompt.as_ref().map(|p| p.question.clone()),
            options: alert
                .prompt
                .as_ref()
                .map(|p| p.options.clone())
                .unwrap_or_default(),
        });
        self.notifier.play_sound("attention")?;

        let Some(prompt) = alert.choices() else {
            self.notifier.notify(&title, &question)?;
            self.log.record(LogEvent::Notified {
                title,
                actionable: false,
            });
            return Ok(());
        };

        self.log.record(LogEvent::Notified {
            title: title.clone(),
            actionable: true,
        });
        let Some(index) = self
            .notifier
            .ask(&title, &question, &prompt.options, self.ask_timeout)?
        else {
            debug!(task = %self.task.name, "no choice picked");
            return Ok(());
        };
        self.inject_choice(pane, alert.reason, prompt, index)
    }

    /// Type the picked option into the pane, provided the worker still waits.
    fn inject_choice(
        &self,
        pane: &str,
        reason: Option<WaitReason>,
        prompt: &Prompt,
        index: usize,
    ) -> Result<()> {
        let Some(text) = prompt.options.get(index) else {
            return Ok(());
        };
        match status::observe(self.mux, &self.window, &self.task.name)? {
            Observation::Owned(TaskStatus::Waiting) => {}
            other => {
                info!(task = %self.task.name, ?other, "worker moved on; choice dropped");
                return Ok(());
            }
        }

        // Selection UIs take the option number; free-form prompts the text.
        let literal = match reason {
            Some(WaitReason::AskUserQuestionUI) => (index + 1).to_string(),
            _ => text.clone(),
        };
        self.mux.cancel_copy_mode(pane)?;
        self.mux.send_literal(pane, &literal)?;
        self.mux.send_key(pane, "Enter")?;
        info!(task = %self.task.name, index, choice = %text, "choice injected");
        self.log.record(LogEvent::ChoiceInjected {
            index,
            text: text.clone(),
        });
        Ok(())
    }
}

impl Monitor for WaitMonitor<'_> {
    fn name(&self) -> &str {
        "watch-wait"
    }

    fn tick(&mut self) -> Result<TickOutcome> {
        let Some(info) = self.mux.window_info(&self.window)? else {
            return Ok(TickOutcome::Exit(MonitorExit::WindowGone));
        };
        let mut current = match status::observe(self.mux, &self.window, &self.task.name)? {
            Observation::Owned(status) => status,
            Observation::Gone => return Ok(TickOutcome::Exit(MonitorExit::WindowGone)),
            Observation::Foreign(reason) => {
                return Ok(TickOutcome::Exit(MonitorExit::Reassigned(reason.to_string())));
            }
        };
        if current.is_terminal() {
            self.tracker.on_not_waiting();
            self.promoted_from = None;
            return Ok(TickOutcome::Continue);
        }
        if current != TaskStatus::Waiting {
            self.tracker.on_not_waiting();
        }

        let captured = self.mux.capture_pane(&info.pane_id, CAPTURE_LINES)?;
        let lines = prompt::screen_lines(&captured);
        let screen = prompt::detect_wait(&lines);

        // A Review window still shows the PAW_DONE that led to it.
        let in_review =
            current == TaskStatus::Review || self.promoted_from == Some(TaskStatus::Review);
        if !in_review && prompt::detect_done(&lines) {
            if self.set_status(TaskStatus::Done)?.is_some() {
                self.notifier.play_sound("complete")?;
                self.notifier
                    .notify(&format!("paw: {} is done", self.task.name), "Ready for review.")?;
            }
            self.tracker.on_not_waiting();
            self.promoted_from = None;
            return Ok(TickOutcome::Continue);
        }

        if screen.waiting && current != TaskStatus::Waiting {
            let from = current;
            if let Some(to) = self.set_status(TaskStatus::Waiting)? {
                current = to;
                self.promoted_from = Some(from);
            }
        } else if !screen.waiting && current == TaskStatus::Waiting {
            if let Some(from) = self.promoted_from.take() {
                // The user answered in the pane.
                let back = match from {
                    TaskStatus::Review => TaskStatus::Review,
                    _ => TaskStatus::Working,
                };
                if let Some(to) = self.set_status(back)? {
                    current = to;
                }
            }
        } else if current != TaskStatus::Waiting {
            self.promoted_from = None;
        }

        if current != TaskStatus::Waiting {
            self.tracker.on_not_waiting();
            return Ok(TickOutcome::Continue);
        }
        if let Some(alert) = self.tracker.on_waiting(&screen) {
            self.alert(&info.pane_id, &alert)?;
        }
        Ok(TickOutcome::Continue)
    }
}
