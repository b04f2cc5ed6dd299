//! Claude Code adapter.
//!
//! Runs `claude` interactively so the user can attach to the window and take
//! over. The worker protocol is appended to the system prompt; resuming uses
//! `--continue`, which picks up the latest conversation in the work dir.

use crate::agent::{AgentAdapter, SpawnConfig, WORKER_PROTOCOL};
use crate::task::Task;

/// Adapter for Claude Code CLI.
pub struct ClaudeCodeAdapter {
    /// Override the claude binary name/path (default: "claude").
    program: String,
    extra_args: Vec<String>,
}

impl ClaudeCodeAdapter {
    pub fn new(program: Option<String>, extra_args: Vec<String>) -> Self {
        Self {
            program: program.unwrap_or_else(|| "claude".to_string()),
            extra_args,
        }
    }
}

impl AgentAdapter for ClaudeCodeAdapter {
    fn name(&self) -> &str {
        "claude-code"
    }

    fn spawn_config(&self, task: &Task, resume: bool) -> SpawnConfig {
        let mut args = self.extra_args.clone();
        args.push("--append-system-prompt".to_string());
        args.push(WORKER_PROTOCOL.to_string());
        if resume {
            args.push("--continue".to_string());
        } else if !task.description.is_empty() {
            args.push(task.description.clone());
        }
        SpawnConfig {
            program: self.program.clone(),
            args,
            work_dir: task.work_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::sample_task;

    #[test]
    fn default_program_is_claude() {
        let adapter = ClaudeCodeAdapter::new(None, Vec::new());
        let config = adapter.spawn_config(&sample_task("test"), false);
        assert_eq!(config.program, "claude");
    }

    #[test]
    fn custom_program_path() {
        let adapter = ClaudeCodeAdapter::new(Some("/usr/local/bin/claude".to_string()), Vec::new());
        let config = adapter.spawn_config(&sample_task("test"), false);
        assert_eq!(config.program, "/usr/local/bin/claude");
    }

    #[test]
    fn fresh_start_passes_description_last() {
        let adapter = ClaudeCodeAdapter::new(None, vec!["--model".to_string(), "opus".to_string()]);
        let config = adapter.spawn_config(&sample_task("Fix the auth bug"), false);
        assert_eq!(config.args[..2], ["--model", "opus"]);
        assert_eq!(config.args.last().unwrap(), "Fix the auth bug");
        assert!(config.args.contains(&"--append-system-prompt".to_string()));
        assert!(!config.args.contains(&"--continue".to_string()));
    }

    #[test]
    fn resume_continues_without_description() {
        let adapter = ClaudeCodeAdapter::new(None, Vec::new());
        let config = adapter.spawn_config(&sample_task("Fix the auth bug"), true);
        assert_eq!(config.args.last().unwrap(), "--continue");
        assert!(!config.args.contains(&"Fix the auth bug".to_string()));
    }

    #[test]
    fn protocol_mentions_every_marker() {
        for marker in ["PAW_ASK", "PAW_ASK_END", "PAW_WAITING", "PAW_DONE"] {
            assert!(WORKER_PROTOCOL.contains(marker), "{marker}");
        }
    }
}
