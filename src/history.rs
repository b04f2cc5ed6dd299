//! Finish-time history records.
//!
//! External hooks drop flat JSON files into the task's agent directory
//! (`hooks/<hook>.json`, `verification.json`). They are read-only here and
//! get folded into one record under `.paw/history/` when a task is finished.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::paths;
use crate::task::Task;

#[derive(Debug, Clone, Serialize)]
pub struct HistoryRecord {
    pub task: String,
    pub branch: Option<String>,
    pub outcome: String,
    pub finished_at: DateTime<Utc>,
    pub session_started_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
    pub pr_url: Option<String>,
    /// Shortstat of the task's commits, when it ran on a branch.
    pub diff: Option<String>,
    pub hooks: BTreeMap<String, Value>,
    pub verification: Option<Value>,
}

impl HistoryRecord {
    pub fn build(task: &Task, outcome: &str, now: DateTime<Utc>) -> Self {
        let started = task.session_started_at();
        Self {
            task: task.name.clone(),
            branch: task.branch.clone(),
            outcome: outcome.to_string(),
            finished_at: now,
            session_started_at: started,
            duration_secs: started.map(|s| (now - s).num_seconds().max(0)),
            pr_url: task.pr_url.clone(),
            diff: None,
            hooks: collect_hook_metadata(&task.hooks_dir()),
            verification: read_verification(&task.verification_path()),
        }
    }
}

fn read_json(path: &Path) -> Option<Value> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read metadata");
            return None;
        }
    };
    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "skipping malformed metadata");
            None
        }
    }
}

/// Every `*.json` in `hooks_dir`, keyed by file stem.
pub fn collect_hook_metadata(hooks_dir: &Path) -> BTreeMap<String, Value> {
    let mut hooks = BTreeMap::new();
    let Ok(entries) = std::fs::read_dir(hooks_dir) else {
        return hooks;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }
        let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
            continue;
        };
        if let Some(value) = read_json(&path) {
            hooks.insert(stem, value);
        }
    }
    hooks
}

pub fn read_verification(path: &Path) -> Option<Value> {
    read_json(path)
}

/// Write `record` to `.paw/history/<task>-<timestamp>.json`.
pub fn write_history(root: &Path, record: &HistoryRecord) -> Result<PathBuf> {
    let dir = paths::history_dir(root);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let stamp = record.finished_at.format("%Y%m%dT%H%M%S");
    let path = dir.join(format!("{}-{stamp}.json", record.task));
    let json = serde_json::to_string_pretty(record).context("failed to serialize history")?;
    std::fs::write(&path, json)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}
