//! tmux window management for paw.
//!
//! Every worker lives in its own tmux window. The window name doubles as the
//! cross-process status register (see `status`), so everything that touches
//! windows goes through the `Multiplexer` trait. `TmuxClient` drives the real
//! `tmux` CLI; tests substitute an in-memory fake.

use std::path::Path;
use std::process::{Command, Output};

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

const WINDOW_FORMAT: &str =
    "#{window_id}\t#{window_name}\t#{pane_id}\t#{pane_current_command}\t#{pane_dead}";

/// A window and its active pane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub id: String,
    pub name: String,
    pub pane_id: String,
    pub pane_command: String,
    pub pane_dead: bool,
}

/// Abstract terminal-multiplexer surface used by the core.
pub trait Multiplexer {
    fn session_exists(&self, session: &str) -> bool;

    /// Create a detached session rooted at `work_dir`. Fails if it exists.
    fn create_session(&self, session: &str, work_dir: &Path) -> Result<()>;

    /// All windows of a session. A missing session yields an empty list.
    fn list_windows(&self, session: &str) -> Result<Vec<WindowInfo>>;

    /// Look up one window by id (`@7`). `None` when it no longer exists.
    fn window_info(&self, window: &str) -> Result<Option<WindowInfo>>;

    fn rename_window(&self, window: &str, name: &str) -> Result<()>;

    fn window_option(&self, window: &str, key: &str) -> Result<Option<String>>;

    fn set_window_option(&self, window: &str, key: &str, value: &str) -> Result<()>;

    /// Visible text of a pane, including up to `lines` of scrollback.
    fn capture_pane(&self, pane: &str, lines: u32) -> Result<String>;

    /// Type `text` into the pane literally (no key-name interpretation).
    fn send_literal(&self, pane: &str, text: &str) -> Result<()>;

    /// Send a named key such as `Enter` or `Escape`.
    fn send_key(&self, pane: &str, key: &str) -> Result<()>;

    /// Leave copy mode if the pane is in it, discarding any selection.
    fn cancel_copy_mode(&self, pane: &str) -> Result<()>;

    fn kill_window(&self, window: &str) -> Result<()>;

    fn new_window(
        &self,
        session: &str,
        name: &str,
        work_dir: &Path,
        command: &[String],
    ) -> Result<WindowInfo>;

    /// Replace the process running in `pane`, keeping the pane and window.
    fn respawn_pane(&self, pane: &str, work_dir: &Path, command: &[String]) -> Result<()>;

    fn window_exists(&self, window: &str) -> bool {
        matches!(self.window_info(window), Ok(Some(_)))
    }
}

/// `Multiplexer` backed by the `tmux` binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct TmuxClient;

/// Check that tmux is installed and reachable.
pub fn check_tmux() -> Result<String> {
    let output = Command::new("tmux").arg("-V").output().context(
        "tmux not found; install tmux (e.g., `apt install tmux` or `brew install tmux`)",
    )?;

    if !output.status.success() {
        bail!(
            "tmux -V failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }

    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
    debug!(version = %version, "tmux found");
    Ok(version)
}

fn run_tmux<I, S>(args: I) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    Command::new("tmux")
        .args(args)
        .output()
        .context("failed to run tmux command")
}

fn run_checked<I, S>(args: I, what: &str) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let output = run_tmux(args)?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("tmux {what} failed: {}", stderr.trim());
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// tmux reports a missing server or target through stderr only.
fn is_missing_target(stderr: &str) -> bool {
    stderr.contains("no server running")
        || stderr.contains("can't find")
        || stderr.contains("no such")
        || stderr.contains("error connecting")
}

fn parse_window_line(line: &str) -> Option<WindowInfo> {
    let mut parts = line.split('\t');
    let id = parts.next()?;
    let name = parts.next()?;
    let pane_id = parts.next()?;
    let pane_command = parts.next()?;
    let pane_dead = parts.next()?;
    if !id.starts_with('@') {
        return None;
    }
    Some(WindowInfo {
        id: id.to_string(),
        name: name.to_string(),
        pane_id: pane_id.to_string(),
        pane_command: pane_command.to_string(),
        pane_dead: pane_dead == "1",
    })
}

fn list_windows_with(args: &[&str]) -> Result<Vec<WindowInfo>> {
    let output = run_tmux(args)?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_missing_target(&stderr) {
            return Ok(Vec::new());
        }
        bail!("tmux list-windows failed: {}", stderr.trim());
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(parse_window_line)
        .collect())
}

impl TmuxClient {
    /// Attach to (or switch to, inside tmux) an existing session.
    pub fn attach(&self, session: &str) -> Result<()> {
        if !self.session_exists(session) {
            bail!("tmux session '{session}' not found; start it with `paw start`");
        }

        let verb = if std::env::var_os("TMUX").is_some() {
            "switch-client"
        } else {
            "attach-session"
        };
        let status = Command::new("tmux")
            .args([verb, "-t", session])
            .status()
            .with_context(|| format!("failed to attach to tmux session '{session}'"))?;

        if !status.success() {
            bail!("tmux {verb} exited with non-zero status");
        }
        Ok(())
    }

    /// Flash a message in the status line of every client on `session`.
    pub fn display_message(&self, session: &str, message: &str) -> Result<()> {
        run_checked(["display-message", "-t", session, message], "display-message")?;
        Ok(())
    }
}

impl Multiplexer for TmuxClient {
    /// Create a detached session rooted at `work_dir` running a login shell.
    fn create_session(&self, session: &str, work_dir: &Path) -> Result<()> {
        if self.session_exists(session) {
            bail!("tmux session '{session}' already exists");
        }

        let dir = work_dir.to_string_lossy().to_string();
        run_checked(
            [
                "new-session",
                "-d",
                "-s",
                session,
                "-c",
                dir.as_str(),
                "-x",
                "220",
                "-y",
                "50",
            ],
            "new-session",
        )
        .with_context(|| format!("failed to create tmux session '{session}'"))?;

        info!(session = session, "tmux session created");
        Ok(())
    }

    fn session_exists(&self, session: &str) -> bool {
        run_tmux(["has-session", "-t", session])
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn list_windows(&self, session: &str) -> Result<Vec<WindowInfo>> {
        // `=` forces an exact session match instead of prefix matching.
        let target = format!("={session}");
        list_windows_with(&["list-windows", "-t", target.as_str(), "-F", WINDOW_FORMAT])
    }

    fn window_info(&self, window: &str) -> Result<Option<WindowInfo>> {
        let windows = list_windows_with(&["list-windows", "-a", "-F", WINDOW_FORMAT])?;
        Ok(windows.into_iter().find(|w| w.id == window))
    }

    fn rename_window(&self, window: &str, name: &str) -> Result<()> {
        run_checked(["rename-window", "-t", window, name], "rename-window")?;
        // Keep the shell from renaming the window back.
        run_checked(
            ["set-option", "-w", "-t", window, "automatic-rename", "off"],
            "set-option automatic-rename",
        )?;
        debug!(window = window, name = name, "window renamed");
        Ok(())
    }

    fn window_option(&self, window: &str, key: &str) -> Result<Option<String>> {
        let output = run_tmux(["show-options", "-w", "-v", "-q", "-t", window, key])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("tmux show-options {key} failed: {}", stderr.trim());
        }
        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!value.is_empty()).then_some(value))
    }

    fn set_window_option(&self, window: &str, key: &str, value: &str) -> Result<()> {
        run_checked(["set-option", "-w", "-t", window, key, value], "set-option")?;
        Ok(())
    }

    fn capture_pane(&self, pane: &str, lines: u32) -> Result<String> {
        let start = format!("-{lines}");
        run_checked(
            ["capture-pane", "-p", "-J", "-t", pane, "-S", start.as_str()],
            "capture-pane",
        )
        .with_context(|| format!("failed to capture pane '{pane}'"))
    }

    fn send_literal(&self, pane: &str, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        // `-l` keeps punctuation from being read as tmux key names.
        run_checked(["send-keys", "-t", pane, "-l", "--", text], "send-keys")?;
        debug!(pane = pane, text = text, "sent literal text");
        Ok(())
    }

    fn send_key(&self, pane: &str, key: &str) -> Result<()> {
        run_checked(["send-keys", "-t", pane, key], "send-keys")?;
        Ok(())
    }

    fn cancel_copy_mode(&self, pane: &str) -> Result<()> {
        // Fails harmlessly when the pane is not in copy mode.
        let in_mode = run_checked(
            ["display-message", "-p", "-t", pane, "#{pane_in_mode}"],
            "display-message",
        )?;
        if in_mode.trim() == "1" {
            run_checked(["send-keys", "-t", pane, "-X", "cancel"], "send-keys -X")?;
        }
        Ok(())
    }

    fn kill_window(&self, window: &str) -> Result<()> {
        let output = run_tmux(["kill-window", "-t", window])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_missing_target(&stderr) {
                return Ok(()); // already gone
            }
            bail!("tmux kill-window failed: {}", stderr.trim());
        }
        info!(window = window, "tmux window killed");
        Ok(())
    }

    fn new_window(
        &self,
        session: &str,
        name: &str,
        work_dir: &Path,
        command: &[String],
    ) -> Result<WindowInfo> {
        let target = format!("{session}:");
        let dir = work_dir.to_string_lossy().to_string();
        let mut cmd = Command::new("tmux");
        cmd.args([
            "new-window",
            "-d",
            "-P",
            "-F",
            "#{window_id}\t#{pane_id}",
            "-t",
            target.as_str(),
            "-n",
            name,
            "-c",
            dir.as_str(),
        ]);
        cmd.args(command);

        let output = cmd
            .output()
            .with_context(|| format!("failed to create window '{name}'"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("tmux new-window failed: {}", stderr.trim());
        }

        let printed = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let (id, pane_id) = printed
            .split_once('\t')
            .with_context(|| format!("unexpected new-window output: {printed:?}"))?;
        self.set_window_option(id, "automatic-rename", "off")?;
        // Keep the window when the worker exits so it can be respawned in place.
        self.set_window_option(id, "remain-on-exit", "on")?;

        info!(window = id, name = name, "tmux window created");
        Ok(WindowInfo {
            id: id.to_string(),
            name: name.to_string(),
            pane_id: pane_id.to_string(),
            pane_command: command.first().cloned().unwrap_or_default(),
            pane_dead: false,
        })
    }

    fn respawn_pane(&self, pane: &str, work_dir: &Path, command: &[String]) -> Result<()> {
        let dir = work_dir.to_string_lossy().to_string();
        let mut cmd = Command::new("tmux");
        cmd.args(["respawn-pane", "-k", "-t", pane, "-c", dir.as_str()]);
        cmd.args(command);

        let output = cmd
            .output()
            .with_context(|| format!("failed to respawn pane '{pane}'"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("tmux respawn-pane failed: {}", stderr.trim());
        }
        info!(pane = pane, "pane respawned");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn tmux_available() -> bool {
        check_tmux().is_ok()
    }

    #[test]
    fn parse_window_line_reads_all_fields() {
        let info = parse_window_line("@3\t🤖fix-login\t%7\tclaude\t0").unwrap();
        assert_eq!(info.id, "@3");
        assert_eq!(info.name, "🤖fix-login");
        assert_eq!(info.pane_id, "%7");
        assert_eq!(info.pane_command, "claude");
        assert!(!info.pane_dead);
    }

    #[test]
    fn parse_window_line_rejects_garbage() {
        assert!(parse_window_line("").is_none());
        assert!(parse_window_line("@1\tname").is_none());
        assert!(parse_window_line("x\tname\t%1\tzsh\t0").is_none());
    }

    #[test]
    fn missing_target_messages_are_recognised() {
        assert!(is_missing_target("no server running on /tmp/tmux-0/default"));
        assert!(is_missing_target("can't find window: @99"));
        assert!(!is_missing_target("unknown option: -Z"));
    }

    #[test]
    #[serial]
    #[cfg_attr(not(feature = "integration"), ignore = "needs a tmux server")]
    fn window_lifecycle_against_real_tmux() {
        if !tmux_available() {
            return;
        }
        let client = TmuxClient;
        let session = "paw-test-window-lifecycle";
        let _ = run_tmux(["kill-session", "-t", session]);

        client.create_session(session, Path::new("/tmp")).unwrap();
        let window = client
            .new_window(
                session,
                "🆕lifecycle",
                Path::new("/tmp"),
                &["sleep".to_string(), "30".to_string()],
            )
            .unwrap();
        assert!(client.window_exists(&window.id));

        client.rename_window(&window.id, "🤖lifecycle").unwrap();
        let info = client.window_info(&window.id).unwrap().unwrap();
        assert_eq!(info.name, "🤖lifecycle");

        client
            .set_window_option(&window.id, "@paw_task", "lifecycle")
            .unwrap();
        assert_eq!(
            client.window_option(&window.id, "@paw_task").unwrap(),
            Some("lifecycle".to_string())
        );

        client.kill_window(&window.id).unwrap();
        assert!(!client.window_exists(&window.id));
        // Killing twice is a no-op.
        client.kill_window(&window.id).unwrap();

        let _ = run_tmux(["kill-session", "-t", session]);
    }

    #[test]
    #[serial]
    #[cfg_attr(not(feature = "integration"), ignore = "needs a tmux server")]
    fn list_windows_of_missing_session_is_empty() {
        if !tmux_available() {
            return;
        }
        let windows = TmuxClient
            .list_windows("paw-test-definitely-missing-98765")
            .unwrap();
        assert!(windows.is_empty());
    }
}
