//! In-memory collaborators for unit tests.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};

use crate::monitor::Ticker;
use crate::notify::Notifier;
use crate::resolver::{ConflictResolver, ResolveRequest, ResolverOutcome};
use crate::review::{ReviewSource, ReviewState};
use crate::spawn::Spawner;
use crate::task::Task;
use crate::tmux::{Multiplexer, WindowInfo};

/// Input delivered to a pane, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    CancelCopyMode,
    Literal(String),
    Key(String),
}

#[derive(Debug, Clone)]
struct FakeWindow {
    session: String,
    info: WindowInfo,
    options: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct MuxState {
    next_id: u32,
    sessions: BTreeSet<String>,
    windows: Vec<FakeWindow>,
    screens: BTreeMap<String, String>,
    failing_captures: u32,
    sent: BTreeMap<String, Vec<Sent>>,
    killed: Vec<String>,
    respawned: Vec<(String, Vec<String>)>,
    created: Vec<(String, Vec<String>)>,
}

/// Multiplexer backed by a list of windows in memory.
#[derive(Debug, Default)]
pub struct FakeMux {
    state: RefCell<MuxState>,
}

impl FakeMux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a window with one live pane running `command`. Returns its id.
    pub fn add_window(&self, session: &str, name: &str, command: &str) -> String {
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        let n = state.next_id;
        let info = WindowInfo {
            id: format!("@{n}"),
            name: name.to_string(),
            pane_id: format!("%{n}"),
            pane_command: command.to_string(),
            pane_dead: false,
        };
        state.sessions.insert(session.to_string());
        state.windows.push(FakeWindow {
            session: session.to_string(),
            info: info.clone(),
            options: BTreeMap::new(),
        });
        info.id
    }

    pub fn window_name(&self, window: &str) -> Option<String> {
        self.find(window).map(|w| w.info.name)
    }

    pub fn pane_of(&self, window: &str) -> String {
        self.find(window)
            .map(|w| w.info.pane_id)
            .unwrap_or_default()
    }

    /// Simulate the user closing a window.
    pub fn remove_window(&self, window: &str) {
        self.state
            .borrow_mut()
            .windows
            .retain(|w| w.info.id != window);
    }

    pub fn set_pane_dead(&self, window: &str) {
        self.with_window(window, |w| w.info.pane_dead = true);
    }

    /// Set the captured text of the window's pane.
    pub fn set_screen(&self, window: &str, text: &str) {
        let pane = self.pane_of(window);
        self.state
            .borrow_mut()
            .screens
            .insert(pane, text.to_string());
    }

    /// Make the next `n` captures fail.
    pub fn fail_captures(&self, n: u32) {
        self.state.borrow_mut().failing_captures = n;
    }

    pub fn sent(&self, pane: &str) -> Vec<Sent> {
        self.state
            .borrow()
            .sent
            .get(pane)
            .cloned()
            .unwrap_or_default()
    }

    pub fn killed(&self) -> Vec<String> {
        self.state.borrow().killed.clone()
    }

    pub fn respawned(&self) -> Vec<(String, Vec<String>)> {
        self.state.borrow().respawned.clone()
    }

    /// `(window name, command)` of every window created through the trait.
    pub fn created(&self) -> Vec<(String, Vec<String>)> {
        self.state.borrow().created.clone()
    }

    fn find(&self, window: &str) -> Option<FakeWindow> {
        self.state
            .borrow()
            .windows
            .iter()
            .find(|w| w.info.id == window)
            .cloned()
    }

    fn with_window(&self, window: &str, f: impl FnOnce(&mut FakeWindow)) {
        let mut state = self.state.borrow_mut();
        if let Some(w) = state.windows.iter_mut().find(|w| w.info.id == window) {
            f(w);
        }
    }

    fn push_sent(&self, pane: &str, sent: Sent) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if !state.windows.iter().any(|w| w.info.pane_id == pane) {
            bail!("can't find pane: {pane}");
        }
        state.sent.entry(pane.to_string()).or_default().push(sent);
        Ok(())
    }
}

impl Multiplexer for FakeMux {
    fn session_exists(&self, session: &str) -> bool {
        self.state.borrow().sessions.contains(session)
    }

    fn create_session(&self, session: &str, _work_dir: &Path) -> Result<()> {
        if !self.state.borrow_mut().sessions.insert(session.to_string()) {
            bail!("duplicate session: {session}");
        }
        Ok(())
    }

    fn list_windows(&self, session: &str) -> Result<Vec<WindowInfo>> {
        Ok(self
            .state
            .borrow()
            .windows
            .iter()
            .filter(|w| w.session == session)
            .map(|w| w.info.clone())
            .collect())
    }

    fn window_info(&self, window: &str) -> Result<Option<WindowInfo>> {
        Ok(self.find(window).map(|w| w.info))
    }

    fn rename_window(&self, window: &str, name: &str) -> Result<()> {
        if self.find(window).is_none() {
            bail!("can't find window: {window}");
        }
        self.with_window(window, |w| w.info.name = name.to_string());
        Ok(())
    }

    fn window_option(&self, window: &str, key: &str) -> Result<Option<String>> {
        let w = self
            .find(window)
            .ok_or_else(|| anyhow!("can't find window: {window}"))?;
        Ok(w.options.get(key).cloned())
    }

    fn set_window_option(&self, window: &str, key: &str, value: &str) -> Result<()> {
        if self.find(window).is_none() {
            bail!("can't find window: {window}");
        }
        self.with_window(window, |w| {
            w.options.insert(key.to_string(), value.to_string());
        });
        Ok(())
    }

    fn capture_pane(&self, pane: &str, _lines: u32) -> Result<String> {
        let mut state = self.state.borrow_mut();
        if state.failing_captures > 0 {
            state.failing_captures -= 1;
            bail!("capture failed");
        }
        Ok(state.screens.get(pane).cloned().unwrap_or_default())
    }

    fn send_literal(&self, pane: &str, text: &str) -> Result<()> {
        self.push_sent(pane, Sent::Literal(text.to_string()))
    }

    fn send_key(&self, pane: &str, key: &str) -> Result<()> {
        self.push_sent(pane, Sent::Key(key.to_string()))
    }

    fn cancel_copy_mode(&self, pane: &str) -> Result<()> {
        self.push_sent(pane, Sent::CancelCopyMode)
    }

    fn kill_window(&self, window: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let before = state.windows.len();
        state.windows.retain(|w| w.info.id != window);
        if state.windows.len() != before {
            state.killed.push(window.to_string());
        }
        Ok(())
    }

    fn new_window(
        &self,
        session: &str,
        name: &str,
        _work_dir: &Path,
        command: &[String],
    ) -> Result<WindowInfo> {
        let program = command.first().cloned().unwrap_or_default();
        let id = self.add_window(session, name, &program);
        self.state
            .borrow_mut()
            .created
            .push((name.to_string(), command.to_vec()));
        self.find(&id)
            .map(|w| w.info)
            .ok_or_else(|| anyhow!("window vanished"))
    }

    fn respawn_pane(&self, pane: &str, _work_dir: &Path, command: &[String]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let program = command.first().cloned().unwrap_or_default();
        let Some(w) = state.windows.iter_mut().find(|w| w.info.pane_id == pane) else {
            bail!("can't find pane: {pane}");
        };
        w.info.pane_command = program;
        w.info.pane_dead = false;
        state.respawned.push((pane.to_string(), command.to_vec()));
        Ok(())
    }
}

/// Spawner that records argument vectors instead of starting processes.
#[derive(Debug, Default)]
pub struct RecordingSpawner {
    calls: RefCell<Vec<Vec<String>>>,
    failing: RefCell<Vec<String>>,
}

impl RecordingSpawner {
    /// Make every spawn whose task argument is `task` fail.
    pub fn fail_for(&self, task: &str) {
        self.failing.borrow_mut().push(task.to_string());
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.borrow().clone()
    }

    /// Calls whose first argument is `command`.
    pub fn calls_for(&self, command: &str) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|c| c.first().map(String::as_str) == Some(command))
            .collect()
    }
}

impl Spawner for RecordingSpawner {
    fn spawn_detached(&self, args: &[String], _log_name: &str) -> Result<()> {
        if let Some(task) = args.get(1).filter(|t| self.failing.borrow().contains(*t)) {
            bail!("spawn refused for {task}");
        }
        self.calls.borrow_mut().push(args.to_vec());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asked {
    pub title: String,
    pub message: String,
    pub options: Vec<String>,
}

/// Notifier that records traffic and answers `ask` from a script.
#[derive(Debug, Default)]
pub struct FakeNotifier {
    notes: RefCell<Vec<(String, String)>>,
    asked: RefCell<Vec<Asked>>,
    sounds: RefCell<Vec<String>>,
    answers: RefCell<VecDeque<Option<usize>>>,
}

impl FakeNotifier {
    pub fn answer_with(&self, choice: Option<usize>) {
        self.answers.borrow_mut().push_back(choice);
    }

    pub fn notes(&self) -> Vec<(String, String)> {
        self.notes.borrow().clone()
    }

    pub fn asked(&self) -> Vec<Asked> {
        self.asked.borrow().clone()
    }

    pub fn sounds(&self) -> Vec<String> {
        self.sounds.borrow().clone()
    }
}

impl Notifier for FakeNotifier {
    fn notify(&self, title: &str, message: &str) -> Result<()> {
        self.notes
            .borrow_mut()
            .push((title.to_string(), message.to_string()));
        Ok(())
    }

    fn ask(
        &self,
        title: &str,
        message: &str,
        options: &[String],
        _timeout: Duration,
    ) -> Result<Option<usize>> {
        self.asked.borrow_mut().push(Asked {
            title: title.to_string(),
            message: message.to_string(),
            options: options.to_vec(),
        });
        Ok(self.answers.borrow_mut().pop_front().flatten())
    }

    fn play_sound(&self, name: &str) -> Result<()> {
        self.sounds.borrow_mut().push(name.to_string());
        Ok(())
    }
}

/// Review source returning scripted answers; `Err` strings become errors.
#[derive(Debug, Default)]
pub struct ScriptedReviews {
    script: RefCell<VecDeque<std::result::Result<ReviewState, String>>>,
}

impl ScriptedReviews {
    pub fn push(&self, state: ReviewState) {
        self.script.borrow_mut().push_back(Ok(state));
    }

    pub fn push_error(&self, message: &str) {
        self.script.borrow_mut().push_back(Err(message.to_string()));
    }
}

impl ReviewSource for ScriptedReviews {
    fn status(&self, _task: &Task) -> Result<ReviewState> {
        match self.script.borrow_mut().pop_front() {
            Some(Ok(state)) => Ok(state),
            Some(Err(message)) => Err(anyhow!(message)),
            None => bail!("review script exhausted"),
        }
    }
}

/// Ticker that allows a fixed number of ticks, then cancels.
#[derive(Debug)]
pub struct ManualTicker {
    remaining: usize,
}

impl ManualTicker {
    pub fn new(ticks: usize) -> Self {
        Self { remaining: ticks }
    }
}

impl Ticker for ManualTicker {
    fn wait(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }
}

/// Resolver that runs a closure in place of the external program.
pub struct FnResolver<F>(pub F);

impl<F> ConflictResolver for FnResolver<F>
where
    F: Fn(&ResolveRequest) -> ResolverOutcome,
{
    fn resolve(&self, request: &ResolveRequest) -> ResolverOutcome {
        (self.0)(request)
    }
}
