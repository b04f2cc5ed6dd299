//! Codex CLI adapter.
//!
//! Runs Codex in interactive mode, passing the task description as the
//! initial user prompt. Resuming uses `codex resume --last`.

use crate::agent::{AgentAdapter, SpawnConfig};
use crate::task::Task;

/// Adapter for Codex CLI.
pub struct CodexCliAdapter {
    /// Override the codex binary name/path (default: "codex").
    program: String,
    extra_args: Vec<String>,
}

impl CodexCliAdapter {
    pub fn new(program: Option<String>, extra_args: Vec<String>) -> Self {
        Self {
            program: program.unwrap_or_else(|| "codex".to_string()),
            extra_args,
        }
    }
}

impl AgentAdapter for CodexCliAdapter {
    fn name(&self) -> &str {
        "codex-cli"
    }

    fn spawn_config(&self, task: &Task, resume: bool) -> SpawnConfig {
        let mut args = Vec::new();
        if resume {
            args.push("resume".to_string());
            args.push("--last".to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        if !resume && !task.description.is_empty() {
            args.push(task.description.clone());
        }
        SpawnConfig {
            program: self.program.clone(),
            args,
            work_dir: task.work_dir.clone(),
        }
    }
}
