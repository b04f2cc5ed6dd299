use clap::{Parser, Subcommand};

use crate::config::OnComplete;

#[derive(Parser, Debug)]
#[command(
    name = "paw",
    about = "Run AI coding agents in tmux windows, one task per worktree",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the project session, restore task windows and attach
    Start {
        /// Do not attach after starting
        #[arg(long)]
        detach: bool,
    },

    /// Re-attach to the project session after reconciling it
    Attach,

    /// Create a task and launch its worker
    New {
        /// Task name (letters, digits, '-', '_', '.')
        name: String,

        /// What the worker should do
        description: Option<String>,

        /// Launch in the background without printing the attach hint
        #[arg(long)]
        detach: bool,
    },

    /// Launch (or resume) the worker of an existing task
    #[command(hide = true)]
    Launch {
        name: String,

        /// Continue the agent's previous conversation
        #[arg(long)]
        resume: bool,
    },

    /// Watch a worker's screen for prompts and completion
    #[command(hide = true)]
    WatchWait { name: String },

    /// Follow a task's pull request until it is merged or closed
    #[command(hide = true)]
    WatchPr { name: String },

    /// Set a task's status (new, working, waiting, review, done, warning)
    Status {
        name: String,
        status: String,

        /// Allow leaving done/warning
        #[arg(long)]
        force: bool,
    },

    /// List tasks with their window status
    List,

    /// Rebase the task branch onto the base branch
    Sync {
        name: String,

        /// Do not hand conflicts to the resolver agent
        #[arg(long)]
        no_resolve: bool,
    },

    /// Merge the task branch into the base branch
    Merge {
        name: String,

        /// Do not hand conflicts to the resolver agent
        #[arg(long)]
        no_resolve: bool,
    },

    /// Finish a task: confirm, merge or open a pull request
    Finish {
        name: String,

        /// Override `[on_complete] policy`
        #[arg(long, value_enum)]
        policy: Option<OnComplete>,

        /// Do not hand conflicts to the resolver agent
        #[arg(long)]
        no_resolve: bool,
    },

    /// Bring windows back in line with task records
    Reconcile,

    /// Show project configuration
    Config {
        /// Emit JSON instead of the human-readable table
        #[arg(long)]
        json: bool,
    },
}
