//! On-disk task records.
//!
//! A task lives in `.paw/agents/<name>/`. `task.md` carries YAML frontmatter
//! plus the free-form description; the other files in the directory are small
//! markers written and read by individual commands (window binding, launch
//! grace marker, session start time, monitor locks).

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::config::WorktreeConfig;
use crate::log::{LogEvent, TaskLog};
use crate::{git, paths, worktree};

const TASK_FILE: &str = "task.md";
const TAB_LOCK_DIR: &str = ".tab-lock";
const SESSION_MARKER: &str = ".session-started";

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9._-]*$").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub name: String,
    pub agent_dir: PathBuf,
    pub work_dir: PathBuf,
    pub branch: Option<String>,
    pub base_commit: Option<String>,
    pub created_at: DateTime<Utc>,
    pub pr_url: Option<String>,
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Frontmatter {
    name: String,
    work_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    base_commit: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pr_url: Option<String>,
}

impl Task {
    /// Parse a task from its `task.md` content.
    pub fn parse(content: &str, agent_dir: &Path) -> Result<Self> {
        let (frontmatter_str, body) = split_frontmatter(content)?;
        let fm: Frontmatter = serde_yaml::from_str(frontmatter_str)
            .context("failed to parse YAML frontmatter")?;

        Ok(Task {
            name: fm.name,
            agent_dir: agent_dir.to_path_buf(),
            work_dir: fm.work_dir,
            branch: fm.branch,
            base_commit: fm.base_commit,
            created_at: fm.created_at,
            pr_url: fm.pr_url,
            description: body.trim().to_string(),
        })
    }

    pub fn render(&self) -> Result<String> {
        let fm = Frontmatter {
            name: self.name.clone(),
            work_dir: self.work_dir.clone(),
            branch: self.branch.clone(),
            base_commit: self.base_commit.clone(),
            created_at: self.created_at,
            pr_url: self.pr_url.clone(),
        };
        let yaml = serde_yaml::to_string(&fm).context("failed to serialize task frontmatter")?;
        Ok(format!("---\n{}---\n\n{}\n", yaml, self.description))
    }

    /// Whether the task runs in its own worktree.
    pub fn is_isolated(&self) -> bool {
        self.branch.is_some()
    }

    pub fn open_log(&self) -> TaskLog {
        TaskLog::for_agent_dir(&self.agent_dir)
    }

    pub fn watch_wait_lock(&self) -> PathBuf {
        self.agent_dir.join(".watch-wait.lock")
    }

    pub fn watch_pr_lock(&self) -> PathBuf {
        self.agent_dir.join(".watch-pr.lock")
    }

    pub fn cleanup_lock(&self) -> PathBuf {
        self.agent_dir.join(".cleanup.lock")
    }

    pub fn hooks_dir(&self) -> PathBuf {
        self.agent_dir.join("hooks")
    }

    pub fn verification_path(&self) -> PathBuf {
        self.agent_dir.join("verification.json")
    }

    fn binding_path(&self) -> PathBuf {
        self.agent_dir.join(TAB_LOCK_DIR).join("window_id")
    }

    fn pending_path(&self) -> PathBuf {
        self.agent_dir.join(TAB_LOCK_DIR).join("pending")
    }

    /// The window id this task is bound to, if any.
    pub fn window_binding(&self) -> Option<String> {
        let id = std::fs::read_to_string(self.binding_path()).ok()?;
        let id = id.trim();
        (!id.is_empty()).then(|| id.to_string())
    }

    pub fn bind_window(&self, window: &str) -> Result<()> {
        write_marker(&self.binding_path(), window)
    }

    pub fn clear_binding(&self) -> Result<()> {
        remove_marker(&self.binding_path())
    }

    /// Record that a launch was requested at `now`.
    pub fn mark_launch_pending(&self, now: DateTime<Utc>) -> Result<()> {
        write_marker(&self.pending_path(), &now.to_rfc3339())
    }

    pub fn clear_launch_pending(&self) -> Result<()> {
        remove_marker(&self.pending_path())
    }

    /// Whether a launch was requested less than `grace` before `now`.
    pub fn launch_pending_within(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        read_timestamp(&self.pending_path()).is_some_and(|at| now - at < grace)
    }

    pub fn record_session_start(&self, now: DateTime<Utc>) -> Result<()> {
        write_marker(&self.agent_dir.join(SESSION_MARKER), &now.to_rfc3339())
    }

    /// Last worker start, `None` when absent or malformed.
    pub fn session_started_at(&self) -> Option<DateTime<Utc>> {
        read_timestamp(&self.agent_dir.join(SESSION_MARKER))
    }
}

fn write_marker(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, format!("{content}\n"))
        .with_context(|| format!("failed to write {}", path.display()))
}

fn remove_marker(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("failed to remove {}", path.display())),
    }
}

fn read_timestamp(path: &Path) -> Option<DateTime<Utc>> {
    let content = std::fs::read_to_string(path).ok()?;
    DateTime::parse_from_rfc3339(content.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Split content into YAML frontmatter and Markdown body.
fn split_frontmatter(content: &str) -> Result<(&str, &str)> {
    let trimmed = content.trim_start();
    if !trimmed.starts_with("---") {
        bail!("task file missing YAML frontmatter (no opening ---)");
    }

    let after_open = &trimmed[3..];
    let after_open = after_open.strip_prefix('\n').unwrap_or(after_open);

    let close_pos = after_open
        .find("\n---")
        .context("task file missing closing --- for frontmatter")?;

    let frontmatter = &after_open[..close_pos];
    let body = &after_open[close_pos + 4..];
    let body = body.strip_prefix('\n').unwrap_or(body);

    Ok((frontmatter, body))
}

pub fn validate_name(name: &str) -> Result<()> {
    if !NAME_RE.is_match(name) {
        bail!("invalid task name '{name}': use letters, digits, '.', '_' and '-'");
    }
    if name.contains("..") || name.ends_with(".lock") {
        bail!("invalid task name '{name}': not usable as a git branch name");
    }
    Ok(())
}

/// Task records of one project.
#[derive(Debug, Clone)]
pub struct TaskStore {
    root: PathBuf,
}

impl TaskStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn agent_dir(&self, name: &str) -> PathBuf {
        paths::agents_dir(&self.root).join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.agent_dir(name).join(TASK_FILE).is_file()
    }

    /// Create the task record and, with isolation on, its worktree.
    pub fn create(&self, name: &str, description: &str, wt: &WorktreeConfig) -> Result<Task> {
        validate_name(name)?;
        if self.exists(name) {
            bail!("task '{name}' already exists");
        }

        paths::ensure_paw_dir(&self.root)?;
        let (work_dir, branch, base_commit) = if wt.enabled {
            if git::repo_root(&self.root).is_err() {
                bail!(
                    "worktree isolation needs a git repository at {}; set `[worktree] enabled = false` to run tasks in place",
                    self.root.display()
                );
            }
            let created = worktree::create_task_worktree(&self.root, name, &wt.base_branch)?;
            (created.path, Some(created.branch), Some(created.base_commit))
        } else {
            (self.root.clone(), None, None)
        };

        let task = Task {
            name: name.to_string(),
            agent_dir: self.agent_dir(name),
            work_dir,
            branch,
            base_commit,
            created_at: Utc::now(),
            pr_url: None,
            description: description.trim().to_string(),
        };
        self.save(&task)?;
        task.open_log().record(LogEvent::TaskCreated {
            work_dir: task.work_dir.display().to_string(),
            branch: task.branch.clone(),
        });
        debug!(task = name, "task created");
        Ok(task)
    }

    pub fn save(&self, task: &Task) -> Result<()> {
        std::fs::create_dir_all(&task.agent_dir)
            .with_context(|| format!("failed to create {}", task.agent_dir.display()))?;
        let path = task.agent_dir.join(TASK_FILE);
        std::fs::write(&path, task.render()?)
            .with_context(|| format!("failed to write task file: {}", path.display()))
    }

    pub fn load(&self, name: &str) -> Result<Task> {
        let dir = self.agent_dir(name);
        let path = dir.join(TASK_FILE);
        if !path.is_file() {
            bail!("task '{name}' not found");
        }
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read task file: {}", path.display()))?;
        Task::parse(&contents, &dir)
            .with_context(|| format!("failed to parse task file: {}", path.display()))
    }

    /// All readable tasks, sorted by name. Unreadable records are skipped.
    pub fn list(&self) -> Result<Vec<Task>> {
        let dir = paths::agents_dir(&self.root);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut tasks = Vec::new();
        let entries = std::fs::read_dir(&dir)
            .with_context(|| format!("failed to read agents directory: {}", dir.display()))?;
        for entry in entries {
            let entry = entry?;
            if !entry.path().join(TASK_FILE).is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            match self.load(&name) {
                Ok(task) => tasks.push(task),
                Err(e) => warn!("skipping {}: {e:#}", entry.path().display()),
            }
        }

        tasks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tasks)
    }

    /// Delete the agent directory, including its log and markers.
    pub fn remove(&self, name: &str) -> Result<()> {
        let dir = self.agent_dir(name);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to remove {}", dir.display())),
        }
    }
}

#[cfg(test)]
pub(crate) fn in_place_task(root: &Path, name: &str) -> Task {
    let store = TaskStore::new(root);
    let wt = WorktreeConfig {
        enabled: false,
        ..WorktreeConfig::default()
    };
    store.create(name, "test task", &wt).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::test_repo::init_repo;
    use std::fs;

    fn in_place() -> WorktreeConfig {
        WorktreeConfig {
            enabled: false,
            ..WorktreeConfig::default()
        }
    }

    #[test]
    fn parse_task_file() {
        let content = r#"---
name: fix-login
work_dir: /repo/.paw/worktrees/fix-login
branch: paw/fix-login
base_commit: abc123
created_at: 2026-03-01T10:00:00Z
---

Fix the login redirect loop.
"#;
        let task = Task::parse(content, Path::new("/repo/.paw/agents/fix-login")).unwrap();
        assert_eq!(task.name, "fix-login");
        assert_eq!(task.branch.as_deref(), Some("paw/fix-login"));
        assert_eq!(task.base_commit.as_deref(), Some("abc123"));
        assert!(task.pr_url.is_none());
        assert_eq!(task.description, "Fix the login redirect loop.");
        assert!(task.is_isolated());
    }

    #[test]
    fn missing_frontmatter_is_an_error() {
        assert!(Task::parse("just text", Path::new("/x")).is_err());
        assert!(Task::parse("---\nname: x\n", Path::new("/x")).is_err());
    }

    #[test]
    fn create_save_load_round_trip_in_place() {
        let tmp = tempfile::tempdir().unwrap();
        let store = TaskStore::new(tmp.path());

        let mut task = store.create("docs", "Write the docs", &in_place()).unwrap();
        assert_eq!(task.work_dir, tmp.path());
        assert!(!task.is_isolated());

        task.pr_url = Some("https://example.com/pr/1".to_string());
        store.save(&task).unwrap();

        let loaded = store.load("docs").unwrap();
        assert_eq!(loaded.pr_url.as_deref(), Some("https://example.com/pr/1"));
        assert_eq!(loaded.description, "Write the docs");
        assert!(tmp.path().join(".paw/agents/docs/log.jsonl").exists());
    }

    #[test]
    fn create_rejects_bad_and_duplicate_names() {
        let tmp = tempfile::tempdir().unwrap();
        let store = TaskStore::new(tmp.path());

        for bad in ["", "..", ".hidden", "-flag", "a/b", "x.lock", "a..b", "has space"] {
            assert!(store.create(bad, "", &in_place()).is_err(), "{bad}");
        }
        store.create("ok_1.2-x", "", &in_place()).unwrap();
        let err = store.create("ok_1.2-x", "", &in_place()).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn create_with_worktree_outside_git_fails() {
        let tmp = tempfile::tempdir().unwrap();
        if git::repo_root(tmp.path()).is_ok() {
            return; // tempdir happens to live inside a repository
        }
        let store = TaskStore::new(tmp.path());
        let err = store
            .create("iso", "", &WorktreeConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("git repository"));
    }

    #[test]
    fn create_with_worktree_records_branch() {
        let Some(repo) = init_repo() else {
            return;
        };
        let store = TaskStore::new(repo.path());
        let task = store
            .create("fix-login", "Fix it", &WorktreeConfig::default())
            .unwrap();

        assert_eq!(task.branch.as_deref(), Some("paw/fix-login"));
        assert!(task.work_dir.ends_with(".paw/worktrees/fix-login"));
        assert_eq!(
            task.base_commit.as_deref(),
            Some(git::head_commit(repo.path()).unwrap().as_str())
        );
    }

    #[test]
    fn list_skips_unreadable_records() {
        let tmp = tempfile::tempdir().unwrap();
        let store = TaskStore::new(tmp.path());
        store.create("b-task", "", &in_place()).unwrap();
        store.create("a-task", "", &in_place()).unwrap();

        let broken = paths::agents_dir(tmp.path()).join("broken");
        fs::create_dir_all(&broken).unwrap();
        fs::write(broken.join(TASK_FILE), "no frontmatter").unwrap();
        // Directories without task.md are not tasks.
        fs::create_dir_all(paths::agents_dir(tmp.path()).join("empty")).unwrap();

        let names: Vec<_> = store.list().unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["a-task", "b-task"]);
    }

    #[test]
    fn window_binding_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let task = in_place_task(tmp.path(), "bind");

        assert_eq!(task.window_binding(), None);
        task.bind_window("@7").unwrap();
        assert_eq!(task.window_binding().as_deref(), Some("@7"));
        task.clear_binding().unwrap();
        assert_eq!(task.window_binding(), None);
        task.clear_binding().unwrap();
    }

    #[test]
    fn launch_pending_expires_after_grace() {
        let tmp = tempfile::tempdir().unwrap();
        let task = in_place_task(tmp.path(), "pending");
        let t0 = Utc::now();
        let grace = Duration::seconds(60);

        assert!(!task.launch_pending_within(t0, grace));
        task.mark_launch_pending(t0).unwrap();
        assert!(task.launch_pending_within(t0 + Duration::seconds(10), grace));
        assert!(!task.launch_pending_within(t0 + Duration::seconds(61), grace));
        task.clear_launch_pending().unwrap();
        assert!(!task.launch_pending_within(t0, grace));
    }

    #[test]
    fn session_marker_round_trip_and_malformed() {
        let tmp = tempfile::tempdir().unwrap();
        let task = in_place_task(tmp.path(), "session");
        assert!(task.session_started_at().is_none());

        let t0 = DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        task.record_session_start(t0).unwrap();
        assert_eq!(task.session_started_at(), Some(t0));

        fs::write(task.agent_dir.join(SESSION_MARKER), "yesterday").unwrap();
        assert!(task.session_started_at().is_none());
    }

    #[test]
    fn remove_deletes_agent_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let store = TaskStore::new(tmp.path());
        let task = store.create("gone", "", &in_place()).unwrap();
        store.remove("gone").unwrap();
        assert!(!task.agent_dir.exists());
        assert!(!store.exists("gone"));
        store.remove("gone").unwrap();
    }
}
