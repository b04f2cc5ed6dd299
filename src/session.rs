//! The tmux session of one project and the collaborators commands share.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::debug;

use crate::agent::is_shell_command;
use crate::config::ProjectConfig;
use crate::paths;
use crate::spawn::Spawner;
use crate::status::{self, Observation, TASK_OPTION};
use crate::task::{Task, TaskStore};
use crate::tmux::{Multiplexer, WindowInfo};

/// Project root, configuration and the process-external collaborators.
pub struct Ctx<'a> {
    pub root: PathBuf,
    pub session: String,
    pub config: ProjectConfig,
    pub mux: &'a dyn Multiplexer,
    pub spawner: &'a dyn Spawner,
}

impl<'a> Ctx<'a> {
    pub fn new(
        root: &Path,
        config: ProjectConfig,
        mux: &'a dyn Multiplexer,
        spawner: &'a dyn Spawner,
    ) -> Self {
        Self {
            root: root.to_path_buf(),
            session: paths::session_name(root),
            config,
            mux,
            spawner,
        }
    }

    pub fn store(&self) -> TaskStore {
        TaskStore::new(&self.root)
    }

    /// Create the project session unless it is already running.
    pub fn ensure_session(&self) -> Result<()> {
        if self.mux.session_exists(&self.session) {
            return Ok(());
        }
        self.mux.create_session(&self.session, &self.root)
    }

    /// The live window of `task`: the bound window when it still belongs to
    /// the task, otherwise a session window whose token matches.
    pub fn find_task_window(&self, task: &Task) -> Result<Option<WindowInfo>> {
        if let Some(id) = task.window_binding() {
            if let Observation::Owned(_) = status::observe(self.mux, &id, &task.name)? {
                if let Some(info) = self.mux.window_info(&id)? {
                    return Ok(Some(info));
                }
            }
            debug!(task = %task.name, window = %id, "window binding is stale");
        }

        for info in self.mux.list_windows(&self.session)? {
            let Some(marker) = status::decode(&info.name) else {
                continue;
            };
            if !status::matches(&marker.token, &task.name) {
                continue;
            }
            match self.mux.window_option(&info.id, TASK_OPTION)? {
                Some(owner) if owner != task.name => continue,
                _ => return Ok(Some(info)),
            }
        }
        Ok(None)
    }
}

/// The worker in this window has exited: the pane is dead or back at a shell.
pub fn worker_stopped(info: &WindowInfo) -> bool {
    info.pane_dead || is_shell_command(&info.pane_command)
}
