//! Fire-and-forget re-invocation of `paw` itself.
//!
//! Monitors and deferred launches run as detached `paw` processes. Callers get
//! no handle back: once spawned, a process coordinates only through tmux and
//! the filesystem.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use tracing::info;

use crate::paths;

pub trait Spawner {
    /// Start `paw <args..>` detached. Output goes to `<log_name>.log`.
    fn spawn_detached(&self, args: &[String], log_name: &str) -> Result<()>;
}

/// Spawner that starts real processes, logging under `.paw/logs/`.
pub struct ProcessSpawner {
    root: PathBuf,
}

impl ProcessSpawner {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl Spawner for ProcessSpawner {
    fn spawn_detached(&self, args: &[String], log_name: &str) -> Result<()> {
        let exe = std::env::current_exe().context("cannot locate the paw executable")?;
        let log_dir = paths::logs_dir(&self.root);
        std::fs::create_dir_all(&log_dir)
            .with_context(|| format!("failed to create {}", log_dir.display()))?;

        let log_path = log_dir.join(format!("{log_name}.log"));
        let stdout_log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("failed to open {}", log_path.display()))?;
        let stderr_log = stdout_log.try_clone()?;

        let mut cmd = Command::new(exe);
        cmd.args(args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_log))
            .stderr(Stdio::from(stderr_log));
        // Own process group: Ctrl-C in the invoking terminal must not reach it.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn paw {}", args.join(" ")))?;
        info!(pid = child.id(), args = %args.join(" "), log = %log_path.display(), "spawned detached paw");
        Ok(())
    }
}

/// `paw watch-wait <task>`.
pub fn watch_wait_args(task: &str) -> Vec<String> {
    vec!["watch-wait".to_string(), task.to_string()]
}

/// `paw watch-pr <task>`.
pub fn watch_pr_args(task: &str) -> Vec<String> {
    vec!["watch-pr".to_string(), task.to_string()]
}

/// `paw launch <task> [--resume]`.
pub fn launch_args(task: &str, resume: bool) -> Vec<String> {
    let mut args = vec!["launch".to_string(), task.to_string()];
    if resume {
        args.push("--resume".to_string());
    }
    args
}
