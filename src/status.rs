//! Task status encoded in the tmux window name.
//!
//! The window name is `<glyph><token>`, where the token is the task name
//! truncated to [`TOKEN_LEN`] characters. It is the only channel detached
//! monitors use to publish state, so the name works as a shared register:
//! every writer re-reads it, checks ownership, and only then renames.
//!
//! Truncation is lossy. Two tasks sharing a 12-character prefix produce the
//! same token, so a token match alone does not prove ownership. Windows created
//! by `launch` also carry the full task name in the `@paw_task` window option,
//! and the guard rejects a window whose option names another task.

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use tracing::{debug, trace};

use crate::tmux::Multiplexer;

pub const TOKEN_LEN: usize = 12;

/// Window option holding the full task name of the owning task.
pub const TASK_OPTION: &str = "@paw_task";

/// Lifecycle status, declared in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskStatus {
    New,
    Working,
    Waiting,
    Review,
    Done,
    Warning,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::New,
        TaskStatus::Working,
        TaskStatus::Waiting,
        TaskStatus::Review,
        TaskStatus::Done,
        TaskStatus::Warning,
    ];

    pub fn glyph(self) -> &'static str {
        match self {
            TaskStatus::New => "🆕",
            TaskStatus::Working => "🤖",
            TaskStatus::Waiting => "💬",
            TaskStatus::Review => "👀",
            TaskStatus::Done => "✅",
            TaskStatus::Warning => "⚠️",
        }
    }

    pub fn precedence(self) -> u8 {
        self as u8
    }

    /// No automated transition may leave a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Warning)
    }

    /// The worker is busy or blocked on the user, not on review.
    pub fn is_active_work(self) -> bool {
        matches!(self, TaskStatus::Working | TaskStatus::Waiting)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::New => "new",
            TaskStatus::Working => "working",
            TaskStatus::Waiting => "waiting",
            TaskStatus::Review => "review",
            TaskStatus::Done => "done",
            TaskStatus::Warning => "warning",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        for status in TaskStatus::ALL {
            if status.as_str() == wanted {
                return Ok(status);
            }
        }
        bail!("unknown status '{s}' (expected one of: new, working, waiting, review, done, warning)")
    }
}

/// A decoded window name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMarker {
    pub status: TaskStatus,
    pub token: String,
}

pub fn truncate_token(task_name: &str) -> String {
    task_name.chars().take(TOKEN_LEN).collect()
}

pub fn encode(task_name: &str, status: TaskStatus) -> String {
    format!("{}{}", status.glyph(), truncate_token(task_name))
}

/// Decode a window name. `None` means the window is not a task window.
pub fn decode(window_name: &str) -> Option<StatusMarker> {
    TaskStatus::ALL.into_iter().find_map(|status| {
        let token = window_name.strip_prefix(status.glyph())?;
        let len = token.chars().count();
        if len == 0 || len > TOKEN_LEN {
            return None;
        }
        Some(StatusMarker {
            status,
            token: token.to_string(),
        })
    })
}

/// The authorization check gating every rename: the token must equal the
/// truncated name of the task the caller intends to act for.
pub fn matches(token: &str, task_name: &str) -> bool {
    token == truncate_token(task_name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    WindowGone,
    NotTaskWindow,
    TokenMismatch { found: String },
    OwnedByOther { owner: String },
    Terminal(TaskStatus),
    Unchanged,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::WindowGone => write!(f, "window no longer exists"),
            SkipReason::NotTaskWindow => write!(f, "window is not a task window"),
            SkipReason::TokenMismatch { found } => write!(f, "window token is '{found}'"),
            SkipReason::OwnedByOther { owner } => write!(f, "window belongs to '{owner}'"),
            SkipReason::Terminal(status) => write!(f, "window is already {status}"),
            SkipReason::Unchanged => write!(f, "status unchanged"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Applied { from: TaskStatus, to: TaskStatus },
    Skipped(SkipReason),
}

/// What a reader sees when it looks at a window on behalf of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    Owned(TaskStatus),
    Foreign(SkipReason),
    Gone,
}

/// Read the register and verify the window still belongs to `task_name`.
pub fn observe(mux: &dyn Multiplexer, window: &str, task_name: &str) -> Result<Observation> {
    let Some(info) = mux.window_info(window)? else {
        return Ok(Observation::Gone);
    };
    let Some(marker) = decode(&info.name) else {
        return Ok(Observation::Foreign(SkipReason::NotTaskWindow));
    };
    if !matches(&marker.token, task_name) {
        return Ok(Observation::Foreign(SkipReason::TokenMismatch {
            found: marker.token,
        }));
    }
    match mux.window_option(window, TASK_OPTION)? {
        Some(owner) if owner != task_name => {
            Ok(Observation::Foreign(SkipReason::OwnedByOther { owner }))
        }
        _ => Ok(Observation::Owned(marker.status)),
    }
}

/// Guarded rename of `window` to `to` on behalf of `task_name`.
///
/// Guard failures are not errors: they mean some other process already owns
/// the transition, and the caller carries on.
pub fn transition(
    mux: &dyn Multiplexer,
    window: &str,
    task_name: &str,
    to: TaskStatus,
) -> Result<Transition> {
    write_guarded(mux, window, task_name, to, false)
}

/// Like [`transition`] but allowed to leave a terminal status. Reserved for
/// explicit user commands.
pub fn override_status(
    mux: &dyn Multiplexer,
    window: &str,
    task_name: &str,
    to: TaskStatus,
) -> Result<Transition> {
    write_guarded(mux, window, task_name, to, true)
}

fn write_guarded(
    mux: &dyn Multiplexer,
    window: &str,
    task_name: &str,
    to: TaskStatus,
    allow_terminal: bool,
) -> Result<Transition> {
    let from = match observe(mux, window, task_name)? {
        Observation::Owned(status) => status,
        Observation::Gone => return Ok(skip(window, task_name, SkipReason::WindowGone)),
        Observation::Foreign(reason) => return Ok(skip(window, task_name, reason)),
    };
    if from == to {
        return Ok(skip(window, task_name, SkipReason::Unchanged));
    }
    if from.is_terminal() && !allow_terminal {
        return Ok(skip(window, task_name, SkipReason::Terminal(from)));
    }

    mux.rename_window(window, &encode(task_name, to))?;
    debug!(window = window, task = task_name, %from, %to, "status transition");
    Ok(Transition::Applied { from, to })
}

fn skip(window: &str, task_name: &str, reason: SkipReason) -> Transition {
    trace!(window = window, task = task_name, reason = %reason, "status transition skipped");
    Transition::Skipped(reason)
}
