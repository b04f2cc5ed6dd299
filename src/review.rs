//! External review status of a task's pull request.
//!
//! Watch-PR only needs three answers: still open, merged, or closed without
//! merging. `GhReviewSource` asks the GitHub CLI.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::task::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewState {
    Open,
    Merged,
    Closed,
}

impl ReviewState {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewState::Open => "open",
            ReviewState::Merged => "merged",
            ReviewState::Closed => "closed",
        }
    }
}

pub trait ReviewSource {
    /// Current state of the task's pull request. Errors are transient.
    fn status(&self, task: &Task) -> Result<ReviewState>;
}

/// `gh pr view <pr-or-branch> --json state`, run in the project root.
pub struct GhReviewSource {
    root: PathBuf,
}

impl GhReviewSource {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PrView {
    state: String,
}

fn parse_state(json: &str) -> Result<ReviewState> {
    let view: PrView = serde_json::from_str(json).context("unexpected `gh pr view` output")?;
    match view.state.to_ascii_uppercase().as_str() {
        "OPEN" => Ok(ReviewState::Open),
        "MERGED" => Ok(ReviewState::Merged),
        "CLOSED" => Ok(ReviewState::Closed),
        other => bail!("unknown pull request state '{other}'"),
    }
}

impl ReviewSource for GhReviewSource {
    fn status(&self, task: &Task) -> Result<ReviewState> {
        let target = match (&task.pr_url, &task.branch) {
            (Some(url), _) => url.clone(),
            (None, Some(branch)) => branch.clone(),
            (None, None) => bail!("task '{}' has neither a pull request nor a branch", task.name),
        };
        let output = Command::new("gh")
            .current_dir(&self.root)
            .args(["pr", "view", target.as_str(), "--json", "state"])
            .output()
            .context("failed to run gh; is the GitHub CLI installed?")?;
        if !output.status.success() {
            bail!(
                "gh pr view {target} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        parse_state(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Open a pull request for `branch` against `base`. Returns its URL.
pub fn create_pull_request(
    dir: &Path,
    branch: &str,
    base: &str,
    title: &str,
    body: &str,
) -> Result<String> {
    let output = Command::new("gh")
        .current_dir(dir)
        .args([
            "pr", "create", "--head", branch, "--base", base, "--title", title, "--body", body,
        ])
        .output()
        .context("failed to run gh; is the GitHub CLI installed?")?;
    if !output.status.success() {
        bail!(
            "gh pr create failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    pr_url_from(&String::from_utf8_lossy(&output.stdout))
        .with_context(|| format!("gh pr create printed no pull request URL for {branch}"))
}

fn pr_url_from(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| l.starts_with("https://") || l.starts_with("http://"))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gh_states() {
        assert_eq!(parse_state(r#"{"state":"OPEN"}"#).unwrap(), ReviewState::Open);
        assert_eq!(parse_state(r#"{"state":"MERGED"}"#).unwrap(), ReviewState::Merged);
        assert_eq!(parse_state(r#"{"state":"CLOSED"}"#).unwrap(), ReviewState::Closed);
    }

    #[test]
    fn rejects_unknown_state_and_garbage() {
        assert!(parse_state(r#"{"state":"DRAFTY"}"#).is_err());
        assert!(parse_state("no pull requests found").is_err());
    }

    #[test]
    fn pr_url_is_the_last_url_line() {
        let out = "Creating pull request for paw/fix-login into main\n\nhttps://github.com/acme/app/pull/42\n";
        assert_eq!(
            pr_url_from(out).as_deref(),
            Some("https://github.com/acme/app/pull/42")
        );
        assert_eq!(pr_url_from("warning: no commits\n"), None);
    }
}
