//! Delegate conflict resolution to an external agent.
//!
//! When a rebase or merge stops, paw can hand the repository to a one-shot
//! agent invocation (`claude -p` by default) with a prompt describing the
//! conflict. The call is bounded by a deadline and the child is killed when
//! it runs over. The resolver's own report is never trusted: callers
//! re-verify the repository afterwards.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::ResolverConfig;

const POLL: Duration = Duration::from_millis(250);

/// What the delegate is asked to do, and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveRequest {
    pub work_dir: PathBuf,
    pub task: String,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverOutcome {
    /// The delegate exited successfully.
    Completed,
    /// The deadline passed and the delegate was killed.
    TimedOut,
    /// The delegate could not run or exited with an error.
    Failed(String),
}

impl ResolverOutcome {
    pub fn describe(&self) -> String {
        match self {
            ResolverOutcome::Completed => "completed".to_string(),
            ResolverOutcome::TimedOut => "timed out".to_string(),
            ResolverOutcome::Failed(why) => format!("failed: {why}"),
        }
    }
}

pub trait ConflictResolver {
    fn resolve(&self, request: &ResolveRequest) -> ResolverOutcome;
}

/// Runs `<program> <args..> <prompt>` in the work dir.
#[derive(Debug, Clone)]
pub struct CommandResolver {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandResolver {
    pub fn new(program: &str, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            args,
            timeout,
        }
    }

    pub fn from_config(config: &ResolverConfig) -> Self {
        Self::new(&config.program, config.args.clone(), config.timeout())
    }
}

impl ConflictResolver for CommandResolver {
    fn resolve(&self, request: &ResolveRequest) -> ResolverOutcome {
        info!(
            program = %self.program,
            task = %request.task,
            timeout_secs = self.timeout.as_secs(),
            "delegating conflict resolution"
        );
        debug!(prompt_len = request.prompt.len(), "resolver prompt");

        let mut child = match Command::new(&self.program)
            .args(&self.args)
            .arg(&request.prompt)
            .current_dir(&request.work_dir)
            // `git rebase --continue` must not open an editor.
            .env("GIT_EDITOR", "true")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return ResolverOutcome::Failed(format!("failed to run {}: {e}", self.program));
            }
        };

        let deadline = Instant::now() + self.timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) if status.success() => return ResolverOutcome::Completed,
                Ok(Some(status)) => {
                    return ResolverOutcome::Failed(format!("{} exited with {status}", self.program));
                }
                Ok(None) => {}
                Err(e) => return ResolverOutcome::Failed(format!("failed to wait for resolver: {e}")),
            }
            if Instant::now() >= deadline {
                warn!(program = %self.program, "resolver timed out; killing it");
                let _ = child.kill();
                let _ = child.wait();
                return ResolverOutcome::TimedOut;
            }
            std::thread::sleep(POLL);
        }
    }
}

/// Prompt for a rebase stopped on conflicts in `files`.
pub fn compose_conflict_prompt(task: &str, description: &str, onto: &str, files: &[String]) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!(
        "You are resolving a git rebase conflict for the paw task '{task}'. \
         The task branch is being rebased onto {onto} and the rebase stopped.\n\n"
    ));
    if !description.is_empty() {
        prompt.push_str("## Task\n\n");
        prompt.push_str(description);
        prompt.push_str("\n\n");
    }
    prompt.push_str("## Conflicting files\n\n");
    if files.is_empty() {
        prompt.push_str("(git reported no unmerged paths; inspect `git status`)\n");
    }
    for file in files {
        prompt.push_str(&format!("- {file}\n"));
    }
    prompt.push_str(
        "\nResolve every conflict keeping the intent of both sides, remove all conflict \
         markers, `git add` the files and run `git rebase --continue` until the rebase \
         finishes. Do not run `git rebase --abort` and do not rewrite unrelated history.",
    );
    prompt
}

/// Prompt for a merge that failed without a usable conflict list.
pub fn compose_merge_prompt(task: &str, branch: &str, base: &str, status: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!(
        "You are completing a git merge for the paw task '{task}': merging {branch} \
         into {base} failed.\n\n"
    ));
    prompt.push_str("## git status --porcelain\n\n");
    prompt.push_str(if status.trim().is_empty() {
        "(clean)"
    } else {
        status.trim_end()
    });
    prompt.push_str(
        "\n\nFinish the merge: resolve conflicts, remove all conflict markers, stage the \
         result and commit it. If the merge cannot be completed correctly, run \
         `git merge --abort` instead and explain why.",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ResolveRequest {
        ResolveRequest {
            work_dir: std::env::temp_dir(),
            task: "fix-login".to_string(),
            prompt: "resolve it".to_string(),
        }
    }

    fn sh(script: &str, timeout: Duration) -> CommandResolver {
        CommandResolver::new("sh", vec!["-c".to_string(), script.to_string()], timeout)
    }

    #[test]
    fn successful_exit_is_completed() {
        let outcome = sh("exit 0", Duration::from_secs(10)).resolve(&request());
        assert_eq!(outcome, ResolverOutcome::Completed);
    }

    #[test]
    fn non_zero_exit_is_failed() {
        let outcome = sh("exit 3", Duration::from_secs(10)).resolve(&request());
        assert!(matches!(outcome, ResolverOutcome::Failed(_)), "{outcome:?}");
    }

    #[test]
    fn overrunning_resolver_is_killed() {
        let started = Instant::now();
        let outcome = sh("sleep 30", Duration::from_millis(300)).resolve(&request());
        assert_eq!(outcome, ResolverOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn missing_program_is_failed() {
        let resolver = CommandResolver::new("paw-no-such-resolver", Vec::new(), Duration::from_secs(1));
        assert!(matches!(resolver.resolve(&request()), ResolverOutcome::Failed(_)));
    }

    #[test]
    fn conflict_prompt_lists_files_and_forbids_abort() {
        let prompt = compose_conflict_prompt(
            "fix-login",
            "Fix the login redirect",
            "origin/main",
            &["src/auth.rs".to_string(), "README.md".to_string()],
        );
        assert!(prompt.contains("- src/auth.rs\n"));
        assert!(prompt.contains("- README.md\n"));
        assert!(prompt.contains("Fix the login redirect"));
        assert!(prompt.contains("origin/main"));
        assert!(prompt.contains("Do not run `git rebase --abort`"));
    }

    #[test]
    fn merge_prompt_carries_status_and_allows_abort() {
        let prompt = compose_merge_prompt("fix-login", "paw/fix-login", "main", "UU src/auth.rs\n");
        assert!(prompt.contains("UU src/auth.rs"));
        assert!(prompt.contains("git merge --abort"));
    }
}
