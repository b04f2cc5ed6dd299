//! Per-task event log, one JSON object per line.
//!
//! Every command that acts on a task opens that task's `log.jsonl` in its
//! agent directory and passes the `TaskLog` down explicitly. There is no
//! process-wide logger: the log lives exactly as long as the command (or
//! monitor) that opened it. Console diagnostics go through `tracing` instead.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, warn};

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// A structured event in the task log.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// RFC 3339 UTC timestamp.
    pub timestamp: String,
    #[serde(flatten)]
    pub event: LogEvent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum LogEvent {
    /// The task record and workspace were created.
    TaskCreated {
        work_dir: String,
        branch: Option<String>,
    },
    /// A worker process was started in a window.
    WorkerLaunched {
        program: String,
        window: String,
        resume: bool,
    },
    /// The window status register was rewritten.
    StatusChanged {
        from: String,
        to: String,
        source: String,
    },
    /// A monitor process took its lock and started polling.
    MonitorStarted { monitor: String },
    /// A monitor left its poll loop.
    MonitorStopped { monitor: String, reason: String },
    /// Watch-Wait saw the worker blocked on input.
    WaitDetected {
        reason: String,
        question: Option<String>,
        options: Vec<String>,
    },
    /// A notification went out.
    Notified { title: String, actionable: bool },
    /// A choice picked through a notification was typed into the pane.
    ChoiceInjected { index: usize, text: String },
    /// The external review state of the task's pull request.
    ReviewObserved { state: String },
    /// Reconciliation repaired drift for this task.
    Reconciled { action: String },
    /// A git commit was created.
    Commit { hash: String, message: String },
    /// A sync or merge finished.
    SyncFinished { operation: String, outcome: String },
    /// The delegate resolver was invoked.
    ResolverInvoked { program: String, timeout_secs: u64 },
    /// The delegate resolver returned.
    ResolverFinished { outcome: String },
    /// The task was finished under an on-complete policy.
    TaskFinished {
        policy: String,
        duration_secs: Option<i64>,
    },
    /// The task workspace was torn down.
    CleanedUp {
        window_killed: bool,
        worktree_removed: bool,
        branch_deleted: bool,
    },
}

/// Append-only JSONL writer bound to one task.
pub struct TaskLog {
    writer: Option<Mutex<BufWriter<File>>>,
    path: Option<PathBuf>,
}

impl TaskLog {
    /// Open (creating if needed) the log at `path` for appending.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log directory: {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file: {}", path.display()))?;

        Ok(Self {
            writer: Some(Mutex::new(BufWriter::new(file))),
            path: Some(path.to_path_buf()),
        })
    }

    /// The log of a task, at `<agentDir>/log.jsonl`. Falls back to a
    /// disabled log when the file cannot be opened.
    pub fn for_agent_dir(agent_dir: &Path) -> Self {
        let path = agent_dir.join("log.jsonl");
        match Self::open(&path) {
            Ok(log) => log,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "task log unavailable");
                Self::disabled()
            }
        }
    }

    /// A log that drops every event.
    pub fn disabled() -> Self {
        Self {
            writer: None,
            path: None,
        }
    }

    pub fn log(&self, event: LogEvent) -> Result<()> {
        let Some(writer) = &self.writer else {
            return Ok(());
        };
        let entry = LogEntry {
            timestamp: now_rfc3339(),
            event,
        };

        let json = serde_json::to_string(&entry).context("failed to serialize log entry")?;
        debug!(event = %json, "task log");

        let mut writer = writer
            .lock()
            .map_err(|_| anyhow!("task log writer poisoned"))?;
        writeln!(writer, "{json}").context("failed to write log entry")?;
        writer.flush().context("failed to flush log")?;
        Ok(())
    }

    /// Log an event; a write failure is only warned about.
    pub fn record(&self, event: LogEvent) {
        if let Err(e) = self.log(event) {
            warn!(error = %e, "failed to append to task log");
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_entry_serializes_with_tag_and_data() {
        let entry = LogEntry {
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            event: LogEvent::StatusChanged {
                from: "working".to_string(),
                to: "waiting".to_string(),
                source: "watch-wait".to_string(),
            },
        };

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"event\":\"status_changed\""));
        assert!(json.contains("\"data\":{\"from\":\"working\""));
        assert!(json.contains("\"timestamp\":\"2026-01-01T00:00:00Z\""));
    }

    #[test]
    fn write_and_read_log_file() {
        let tmp = tempfile::tempdir().unwrap();
        let log = TaskLog::for_agent_dir(tmp.path());

        log.log(LogEvent::MonitorStarted {
            monitor: "watch-wait".to_string(),
        })
        .unwrap();
        log.record(LogEvent::WaitDetected {
            reason: "marker".to_string(),
            question: None,
            options: Vec::new(),
        });

        let content = std::fs::read_to_string(tmp.path().join("log.jsonl")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in &lines {
            let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
            let ts = parsed["timestamp"].as_str().unwrap();
            assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
        }
        assert!(lines[1].contains("\"event\":\"wait_detected\""));
    }

    #[test]
    fn appends_across_instances() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("deep").join("log.jsonl");

        TaskLog::open(&path)
            .unwrap()
            .log(LogEvent::Reconciled {
                action: "relaunch".to_string(),
            })
            .unwrap();
        TaskLog::open(&path)
            .unwrap()
            .log(LogEvent::ResolverFinished {
                outcome: "completed".to_string(),
            })
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn disabled_log_accepts_events() {
        let log = TaskLog::disabled();
        assert!(log.path().is_none());
        log.log(LogEvent::MonitorStopped {
            monitor: "watch-pr".to_string(),
            reason: "merged".to_string(),
        })
        .unwrap();
    }
}
