use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILENAME: &str = "config.toml";
const CONFIG_DIR: &str = ".paw";

/// What `paw finish` does with a completed task.
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum OnComplete {
    /// Keep the workspace; the user merges or discards by hand.
    #[default]
    Confirm,
    /// Merge the task branch into the base branch, then clean up.
    Merge,
    /// Push the branch and open a pull request, then watch it.
    Pr,
}

impl OnComplete {
    pub fn as_str(self) -> &'static str {
        match self {
            OnComplete::Confirm => "confirm",
            OnComplete::Merge => "merge",
            OnComplete::Pr => "pr",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_program")]
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorktreeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    #[serde(default = "default_remote")]
    pub remote: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OnCompleteConfig {
    #[serde(default)]
    pub policy: OnComplete,
}

/// Delegate conflict resolver.
///
/// ```toml
/// [resolver]
/// program = "claude"
/// args = ["-p", "--dangerously-skip-permissions"]
/// timeout_secs = 600
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolverConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_resolver_program")]
    pub program: String,
    #[serde(default = "default_resolver_args")]
    pub args: Vec<String>,
    #[serde(default = "default_resolver_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_true")]
    pub sound: bool,
    #[serde(default = "default_ask_timeout_secs")]
    pub ask_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_agent_program() -> String {
    "claude".to_string()
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_resolver_program() -> String {
    "claude".to_string()
}

fn default_resolver_args() -> Vec<String> {
    vec![
        "-p".to_string(),
        "--dangerously-skip-permissions".to_string(),
    ]
}

fn default_resolver_timeout_secs() -> u64 {
    600
}

fn default_ask_timeout_secs() -> u64 {
    300
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: default_agent_program(),
            args: Vec::new(),
        }
    }
}

impl Default for WorktreeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_branch: default_base_branch(),
            remote: default_remote(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: default_resolver_program(),
            args: default_resolver_args(),
            timeout_secs: default_resolver_timeout_secs(),
        }
    }
}

impl ResolverConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            sound: true,
            ask_timeout_secs: default_ask_timeout_secs(),
        }
    }
}

impl NotifyConfig {
    pub fn ask_timeout(&self) -> Duration {
        Duration::from_secs(self.ask_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub worktree: WorktreeConfig,
    #[serde(default)]
    pub on_complete: OnCompleteConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

impl ProjectConfig {
    /// Search upward from `start` for a `.paw/config.toml` file and load it.
    /// Returns the default config if no file is found.
    pub fn load(start: &Path) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = Self::find_config_file(start) {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: ProjectConfig = toml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok((config, Some(path)))
        } else {
            Ok((ProjectConfig::default(), None))
        }
    }

    fn find_config_file(start: &Path) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILENAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }
}
