//! Agent adapter layer.
//!
//! Each coding agent CLI is wrapped in an adapter that knows how to build the
//! command that starts a worker for a task, either fresh (with the task
//! description as the first prompt) or resuming the previous conversation.
//! The rest of paw only sees the resulting argument vector.

pub mod claude;
pub mod codex;

use std::path::PathBuf;

use crate::config::AgentConfig;
use crate::task::Task;

/// Conventions a worker follows so Watch-Wait can read its state.
pub const WORKER_PROTOCOL: &str = "\
You are running as a paw worker inside a tmux window.
When you need a decision from the user, print a block exactly like:
PAW_ASK
question: <one-line question>
option: <choice>
option: <choice>
PAW_ASK_END
When you are blocked on the user for any other reason, print PAW_WAITING on a line by itself.
When the task is complete and committed, print PAW_DONE on a line by itself.";

/// Configuration for starting an agent process in a pane.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnConfig {
    pub program: String,
    pub args: Vec<String>,
    pub work_dir: PathBuf,
}

impl SpawnConfig {
    /// `program` followed by `args`, as handed to the multiplexer.
    pub fn command(&self) -> Vec<String> {
        let mut command = Vec::with_capacity(self.args.len() + 1);
        command.push(self.program.clone());
        command.extend(self.args.iter().cloned());
        command
    }
}

/// Trait that all agent adapters implement.
pub trait AgentAdapter {
    /// Human-readable name of the agent (e.g., "claude-code", "codex-cli").
    fn name(&self) -> &str;

    /// Build the command for `task`. With `resume`, the agent continues its
    /// previous session in the task's work dir instead of starting over.
    fn spawn_config(&self, task: &Task, resume: bool) -> SpawnConfig;
}

/// Any other program: extra args, then the description on fresh starts.
pub struct GenericAdapter {
    program: String,
    extra_args: Vec<String>,
}

impl AgentAdapter for GenericAdapter {
    fn name(&self) -> &str {
        &self.program
    }

    fn spawn_config(&self, task: &Task, resume: bool) -> SpawnConfig {
        let mut args = self.extra_args.clone();
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

/// Pick the adapter for the configured agent program.
pub fn adapter_for(config: &AgentConfig) -> Box<dyn AgentAdapter> {
    let base = std::path::Path::new(&config.program)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    match base.as_str() {
        "claude" => Box::new(claude::ClaudeCodeAdapter::new(
            Some(config.program.clone()),
            config.args.clone(),
        )),
        "codex" => Box::new(codex::CodexCliAdapter::new(
            Some(config.program.clone()),
            config.args.clone(),
        )),
        _ => Box::new(GenericAdapter {
            program: config.program.clone(),
            extra_args: config.args.clone(),
        }),
    }
}

/// Whether a pane running `command` means the worker has exited back to a
/// shell.
pub fn is_shell_command(command: &str) -> bool {
    let name = command.trim().trim_start_matches('-');
    let name = name.rsplit('/').next().unwrap_or(name);
    matches!(name, "bash" | "zsh" | "sh" | "fish" | "dash" | "login")
}

#[cfg(test)]
pub(crate) fn sample_task(description: &str) -> Task {
    Task {
        name: "fix-login".to_string(),
        agent_dir: PathBuf::from("/repo/.paw/agents/fix-login"),
        work_dir: PathBuf::from("/repo/.paw/worktrees/fix-login"),
        branch: Some("paw/fix-login".to_string()),
        base_commit: None,
        created_at: chrono::Utc::now(),
        pr_url: None,
        description: description.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Verify the trait is object-safe (can be used as dyn AgentAdapter)
    #[test]
    fn trait_is_object_safe() {
        fn _accepts_dyn(_adapter: &dyn AgentAdapter) {}
        let adapter = claude::ClaudeCodeAdapter::new(None, Vec::new());
        _accepts_dyn(&adapter);
    }

    #[test]
    fn command_puts_program_first() {
        let config = SpawnConfig {
            program: "claude".to_string(),
            args: vec!["--continue".to_string()],
            work_dir: PathBuf::from("/w"),
        };
        assert_eq!(config.command(), vec!["claude", "--continue"]);
    }

    #[test]
    fn adapter_lookup_by_program_basename() {
        let mut config = AgentConfig::default();
        assert_eq!(adapter_for(&config).name(), "claude-code");

        config.program = "/opt/bin/codex".to_string();
        assert_eq!(adapter_for(&config).name(), "codex-cli");

        config.program = "aider".to_string();
        assert_eq!(adapter_for(&config).name(), "aider");
    }

    #[test]
    fn generic_adapter_passes_description_only_on_fresh_start() {
        let config = AgentConfig {
            program: "aider".to_string(),
            args: vec!["--yes".to_string()],
        };
        let adapter = adapter_for(&config);
        let task = sample_task("Fix the bug");

        let fresh = adapter.spawn_config(&task, false);
        assert_eq!(fresh.command(), vec!["aider", "--yes", "Fix the bug"]);
        assert_eq!(fresh.work_dir, task.work_dir);

        let resumed = adapter.spawn_config(&task, true);
        assert_eq!(resumed.command(), vec!["aider", "--yes"]);
    }

    #[test]
    fn shell_commands_mean_worker_exited() {
        for shell in ["bash", "zsh", "-zsh", "sh", "fish", "dash", "login", "/bin/bash"] {
            assert!(is_shell_command(shell), "{shell}");
        }
        for worker in ["claude", "node", "codex", "python3", ""] {
            assert!(!is_shell_command(worker), "{worker}");
        }
    }
}
