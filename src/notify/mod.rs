//! Notification fan-out.
//!
//! Monitors talk to the user through a `Notifier`. `Notifiers` sends every
//! message to each configured channel:
//!
//! - `TmuxChannel`: status-line message in the paw session; choices are
//!   offered as a `display-menu` on the first attached client.
//! - `WebhookChannel`: JSON POST to `[notify] webhook_url`. No actions.
//!
//! Channel failures are logged and never fail the caller.

use std::path::{Path, PathBuf};
use std::io;
use std::process::{Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use serde_json::json;
use tracing::{debug, warn};

use crate::config::NotifyConfig;
use crate::tmux::TmuxClient;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);
const MENU_POLL: Duration = Duration::from_millis(500);

static MENU_COUNTER: AtomicU64 = AtomicU64::new(1);

pub trait Notifier {
    /// Send a titled message to every channel.
    fn notify(&self, title: &str, message: &str) -> Result<()>;

    /// Offer `options` and wait up to `timeout` for a pick. Returns the
    /// zero-based index of the chosen option.
    fn ask(
        &self,
        title: &str,
        message: &str,
        options: &[String],
        timeout: Duration,
    ) -> Result<Option<usize>>;

    fn play_sound(&self, name: &str) -> Result<()>;
}

/// One delivery transport.
pub trait Channel {
    fn name(&self) -> &str;

    fn send(&self, title: &str, message: &str) -> Result<()>;

    /// `Ok(None)` when the channel cannot offer choices or nobody picked.
    fn ask(
        &self,
        _title: &str,
        _options: &[String],
        _timeout: Duration,
    ) -> Result<Option<usize>> {
        Ok(None)
    }

    fn supports_actions(&self) -> bool {
        false
    }
}

pub struct Notifiers {
    channels: Vec<Box<dyn Channel>>,
    sound: bool,
}

impl Notifiers {
    pub fn new(channels: Vec<Box<dyn Channel>>, sound: bool) -> Self {
        Self { channels, sound }
    }

    pub fn from_config(config: &NotifyConfig, session: &str) -> Self {
        let mut channels: Vec<Box<dyn Channel>> = vec![Box::new(TmuxChannel::new(session))];
        if let Some(url) = config.webhook_url.as_deref().filter(|u| !u.trim().is_empty()) {
            channels.push(Box::new(WebhookChannel::new(url)));
        }
        Self::new(channels, config.sound)
    }
}

impl Notifier for Notifiers {
    fn notify(&self, title: &str, message: &str) -> Result<()> {
        for channel in &self.channels {
            if let Err(e) = channel.send(title, message) {
                warn!(channel = channel.name(), error = %e, "notification failed");
            }
        }
        Ok(())
    }

    fn ask(
        &self,
        title: &str,
        message: &str,
        options: &[String],
        timeout: Duration,
    ) -> Result<Option<usize>> {
        let listing = options
            .iter()
            .enumerate()
            .map(|(i, o)| format!("{}. {o}", i + 1))
            .collect::<Vec<_>>()
            .join("\n");
        self.notify(title, &format!("{message}\n{listing}"))?;

        let Some(channel) = self.channels.iter().find(|c| c.supports_actions()) else {
            return Ok(None);
        };
        match channel.ask(title, options, timeout) {
            Ok(choice) => Ok(choice.filter(|i| *i < options.len())),
            Err(e) => {
                warn!(channel = channel.name(), error = %e, "interactive prompt failed");
                Ok(None)
            }
        }
    }

    fn play_sound(&self, name: &str) -> Result<()> {
        if self.sound {
            play_system_sound(name);
        }
        Ok(())
    }
}

/// Best-effort system sound; missing players are ignored.
fn play_system_sound(name: &str) {
    let (program, file) = if cfg!(target_os = "macos") {
        let sound = match name {
            "complete" => "Glass",
            "attention" => "Ping",
            _ => "Pop",
        };
        ("afplay", format!("/System/Library/Sounds/{sound}.aiff"))
    } else {
        let sound = match name {
            "complete" => "complete",
            "attention" => "message",
            _ => "bell",
        };
        (
            "paplay",
            format!("/usr/share/sounds/freedesktop/stereo/{sound}.oga"),
        )
    };

    if !Path::new(&file).exists() {
        debug!(file = %file, "sound file missing; skipping");
        return;
    }
    let mut command = Command::new(program);
    command
        .arg(&file)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if let Err(e) = spawn_reaped(command) {
        debug!(program = program, error = %e, "sound player unavailable");
    }
}

/// Start `command` and wait for it on a helper thread, so a long-running
/// monitor never accumulates zombies.
fn spawn_reaped(mut command: Command) -> io::Result<JoinHandle<io::Result<ExitStatus>>> {
    let mut child = command.spawn()?;
    Ok(std::thread::spawn(move || child.wait()))
}

pub struct TmuxChannel {
    session: String,
}

impl TmuxChannel {
    pub fn new(session: &str) -> Self {
        Self {
            session: session.to_string(),
        }
    }

    fn first_client(&self) -> Result<Option<String>> {
        let output = Command::new("tmux")
            .args(["list-clients", "-t", self.session.as_str(), "-F", "#{client_name}"])
            .output()
            .context("failed to run tmux list-clients")?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string))
    }
}

/// Files behind one menu answer.
///
/// The menu command writes `<path>.tmp` and renames it to `<path>`, and only
/// while `<path>.pending` exists, so a reader never sees a partial answer and
/// a pick made after the asker gave up is discarded. All three are removed on
/// drop.
struct MenuResponse {
    path: PathBuf,
}

impl MenuResponse {
    fn new(dir: &Path) -> Result<Self> {
        let seq = MENU_COUNTER.fetch_add(1, Ordering::Relaxed);
        let response = Self {
            path: dir.join(format!("paw-choice-{}-{seq}", std::process::id())),
        };
        std::fs::write(response.pending(), "")
            .with_context(|| format!("failed to create {}", response.pending().display()))?;
        Ok(response)
    }

    fn pending(&self) -> PathBuf {
        sibling(&self.path, "pending")
    }

    fn staging(&self) -> PathBuf {
        sibling(&self.path, "tmp")
    }

    /// The picked index once the menu command has run.
    fn take(&self) -> Option<Option<usize>> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        Some(parse_menu_response(&content))
    }
}

impl Drop for MenuResponse {
    fn drop(&mut self) {
        for path in [self.pending(), self.staging(), self.path.clone()] {
            let _ = std::fs::remove_file(path);
        }
    }
}

fn sibling(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{ext}"));
    PathBuf::from(name)
}

/// tmux menu items: `<label> <key> <command>` per option.
fn menu_args(title: &str, options: &[String], response: &MenuResponse) -> Vec<String> {
    let mut args = vec![
        "display-menu".to_string(),
        "-T".to_string(),
        format!("#[align=centre]{}", title.replace('#', "##")),
    ];
    for (i, option) in options.iter().enumerate() {
        let label: String = option.replace('#', "##").chars().take(60).collect();
        args.push(format!("{}. {label}", i + 1));
        args.push(format!("{}", i + 1));
        args.push(format!(
            "run-shell \"[ -e '{pending}' ] && printf {i} > '{staging}' && mv '{staging}' '{path}'\"",
            pending = response.pending().display(),
            staging = response.staging().display(),
            path = response.path.display(),
        ));
    }
    args
}

fn parse_menu_response(content: &str) -> Option<usize> {
    content.trim().parse().ok()
}

impl Channel for TmuxChannel {
    fn name(&self) -> &str {
        "tmux"
    }

    fn send(&self, title: &str, message: &str) -> Result<()> {
        let first_line = message.lines().next().unwrap_or_default();
        TmuxClient.display_message(&self.session, &format!("{title}: {first_line}"))
    }

    fn ask(&self, title: &str, options: &[String], timeout: Duration) -> Result<Option<usize>> {
        let Some(client) = self.first_client()? else {
            debug!(session = %self.session, "no attached client for menu");
            return Ok(None);
        };

        let response = MenuResponse::new(&std::env::temp_dir())?;
        let mut args = menu_args(title, options, &response);
        args.insert(1, client);
        args.insert(1, "-c".to_string());
        let output = Command::new("tmux")
            .args(&args)
            .output()
            .context("failed to run tmux display-menu")?;
        if !output.status.success() {
            bail!(
                "tmux display-menu failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Some(picked) = response.take() {
                return Ok(picked);
            }
            std::thread::sleep(MENU_POLL);
        }
        Ok(None)
    }

    fn supports_actions(&self) -> bool {
        true
    }
}

pub struct WebhookChannel {
    url: String,
}

impl WebhookChannel {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
        }
    }
}

impl Channel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    fn send(&self, title: &str, message: &str) -> Result<()> {
        ureq::post(&self.url)
            .timeout(WEBHOOK_TIMEOUT)
            .send_json(json!({ "title": title, "message": message }))
            .with_context(|| format!("webhook POST to {} failed", self.url))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Recorded {
        sent: Vec<String>,
        asked: Vec<Vec<String>>,
    }

    struct Probe {
        name: &'static str,
        log: Rc<RefCell<Recorded>>,
        fail: bool,
        actions: Option<Option<usize>>,
    }

    impl Channel for Probe {
        fn name(&self) -> &str {
            self.name
        }

        fn send(&self, title: &str, _message: &str) -> Result<()> {
            self.log.borrow_mut().sent.push(format!("{}:{title}", self.name));
            if self.fail {
                bail!("boom");
            }
            Ok(())
        }

        fn ask(&self, _t: &str, options: &[String], _d: Duration) -> Result<Option<usize>> {
            self.log.borrow_mut().asked.push(options.to_vec());
            Ok(self.actions.flatten())
        }

        fn supports_actions(&self) -> bool {
            self.actions.is_some()
        }
    }

    fn probe(name: &'static str, log: &Rc<RefCell<Recorded>>) -> Probe {
        Probe {
            name,
            log: Rc::clone(log),
            fail: false,
            actions: None,
        }
    }

    fn opts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn notify_reaches_every_channel_despite_failures() {
        let log = Rc::new(RefCell::new(Recorded::default()));
        let mut bad = probe("bad", &log);
        bad.fail = true;
        let n = Notifiers::new(vec![Box::new(bad), Box::new(probe("good", &log))], false);

        n.notify("paw", "hello").unwrap();
        assert_eq!(log.borrow().sent, vec!["bad:paw", "good:paw"]);
    }

    #[test]
    fn ask_uses_first_actionable_channel() {
        let log = Rc::new(RefCell::new(Recorded::default()));
        let mut menu = probe("menu", &log);
        menu.actions = Some(Some(1));
        let n = Notifiers::new(vec![Box::new(probe("plain", &log)), Box::new(menu)], false);

        let picked = n
            .ask("q", "Pick", &opts(&["A", "B"]), Duration::from_secs(1))
            .unwrap();
        assert_eq!(picked, Some(1));
        assert_eq!(log.borrow().asked, vec![opts(&["A", "B"])]);
        assert_eq!(log.borrow().sent.len(), 2);
    }

    #[test]
    fn ask_without_actionable_channel_returns_none() {
        let log = Rc::new(RefCell::new(Recorded::default()));
        let n = Notifiers::new(vec![Box::new(probe("plain", &log))], false);
        let picked = n
            .ask("q", "Pick", &opts(&["A", "B"]), Duration::from_secs(1))
            .unwrap();
        assert_eq!(picked, None);
    }

    #[test]
    fn out_of_range_pick_is_discarded() {
        let log = Rc::new(RefCell::new(Recorded::default()));
        let mut menu = probe("menu", &log);
        menu.actions = Some(Some(7));
        let n = Notifiers::new(vec![Box::new(menu)], false);
        let picked = n
            .ask("q", "Pick", &opts(&["A", "B"]), Duration::from_secs(1))
            .unwrap();
        assert_eq!(picked, None);
    }

    #[test]
    fn menu_args_number_items_and_escape_hashes() {
        let tmp = tempfile::tempdir().unwrap();
        let response = MenuResponse::new(tmp.path()).unwrap();
        let args = menu_args("Pick #1", &opts(&["Orange", "C#"]), &response);
        assert_eq!(args[0], "display-menu");
        assert_eq!(args[2], "#[align=centre]Pick ##1");
        assert_eq!(&args[3..5], ["1. Orange", "1"]);
        let path = response.path.display().to_string();
        assert_eq!(
            args[5],
            format!(
                "run-shell \"[ -e '{path}.pending' ] && printf 0 > '{path}.tmp' && mv '{path}.tmp' '{path}'\""
            )
        );
        assert_eq!(args[6], "2. C##");
    }

    #[test]
    fn detached_player_is_reaped() {
        let handle = spawn_reaped(Command::new("true")).unwrap();
        assert!(handle.join().unwrap().unwrap().success());
    }

    #[test]
    fn menu_answer_is_read_only_once_complete() {
        let tmp = tempfile::tempdir().unwrap();
        let response = MenuResponse::new(tmp.path()).unwrap();
        assert!(response.pending().exists());

        // Staged but not yet renamed into place.
        std::fs::write(response.staging(), "1").unwrap();
        assert_eq!(response.take(), None);

        std::fs::rename(response.staging(), &response.path).unwrap();
        assert_eq!(response.take(), Some(Some(1)));
    }

    #[test]
    fn abandoned_menu_leaves_no_files() {
        let tmp = tempfile::tempdir().unwrap();
        let response = MenuResponse::new(tmp.path()).unwrap();
        std::fs::write(response.staging(), "0").unwrap();
        drop(response);
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn menu_response_parses_index() {
        assert_eq!(parse_menu_response("1\n"), Some(1));
        assert_eq!(parse_menu_response(""), None);
    }

    #[test]
    fn from_config_adds_webhook_only_when_set() {
        let mut config = NotifyConfig::default();
        assert_eq!(Notifiers::from_config(&config, "paw-x").channels.len(), 1);
        config.webhook_url = Some("https://hooks.example.com".to_string());
        let n = Notifiers::from_config(&config, "paw-x");
        let names: Vec<_> = n.channels.iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["tmux", "webhook"]);
    }
}
