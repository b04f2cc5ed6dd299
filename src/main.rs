mod agent;
mod cli;
mod config;
mod detector;
mod finish;
mod git;
mod history;
mod launch;
mod lock;
mod log;
mod monitor;
mod notify;
mod paths;
mod prompt;
mod reconcile;
mod resolver;
mod review;
mod session;
mod spawn;
mod status;
mod sync;
mod task;
#[cfg(test)]
mod testing;
mod tmux;
mod worktree;

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::Path;
use tracing::{info, warn};

use cli::{Cli, Command};
use config::ProjectConfig;
use lock::{LockError, LockHandle};
use monitor::pr::PrMonitor;
use monitor::wait::WaitMonitor;
use monitor::{IntervalTicker, PR_INTERVAL, WAIT_INTERVAL, run_monitor};
use notify::Notifiers;
use reconcile::ReconcileReport;
use resolver::{CommandResolver, ConflictResolver};
use review::GhReviewSource;
use session::Ctx;
use spawn::ProcessSpawner;
use status::{TaskStatus, Transition};
use sync::SyncOutcome;
use task::Task;
use tmux::TmuxClient;

fn config_source_label(config_path: Option<&Path>) -> String {
    config_path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(defaults, no .paw/config.toml found)".to_string())
}

fn push_kv(output: &mut String, key: &str, value: impl std::fmt::Display) {
    output.push_str(&format!("  {key:<20} {value}\n"));
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}

fn render_config_human(config: &ProjectConfig, config_path: Option<&Path>) -> String {
    let mut output = String::new();
    output.push_str("Agent\n");
    push_kv(&mut output, "program", &config.agent.program);
    push_kv(&mut output, "args", join_or_none(&config.agent.args));
    output.push('\n');

    output.push_str("Worktree\n");
    push_kv(&mut output, "enabled", config.worktree.enabled);
    push_kv(&mut output, "base_branch", &config.worktree.base_branch);
    push_kv(&mut output, "remote", &config.worktree.remote);
    output.push('\n');

    output.push_str("On Complete\n");
    push_kv(&mut output, "policy", config.on_complete.policy.as_str());
    output.push('\n');

    output.push_str("Resolver\n");
    push_kv(&mut output, "enabled", config.resolver.enabled);
    push_kv(&mut output, "program", &config.resolver.program);
    push_kv(&mut output, "args", join_or_none(&config.resolver.args));
    push_kv(&mut output, "timeout_secs", config.resolver.timeout_secs);
    output.push('\n');

    output.push_str("Notify\n");
    push_kv(
        &mut output,
        "webhook_url",
        config.notify.webhook_url.as_deref().unwrap_or("(none)"),
    );
    push_kv(&mut output, "sound", config.notify.sound);
    push_kv(
        &mut output,
        "ask_timeout",
        format!("{}s", config.notify.ask_timeout_secs),
    );
    output.push('\n');

    output.push_str("Source Path\n");
    push_kv(&mut output, "path", config_source_label(config_path));

    output
}

fn render_config_json(config: &ProjectConfig, config_path: Option<&Path>) -> Result<String> {
    let mut payload = serde_json::to_value(config).context("failed to serialize config")?;
    if let Some(map) = payload.as_object_mut() {
        map.insert(
            "source_path".to_string(),
            serde_json::Value::String(config_source_label(config_path)),
        );
    }
    serde_json::to_string_pretty(&payload).context("failed to serialize config to JSON")
}

fn print_reconcile(report: &ReconcileReport) {
    if report.skipped {
        println!("[paw] reconciliation already running elsewhere; skipped");
        return;
    }
    for name in &report.cleaned {
        println!("[paw] cleaned up merged task {name}");
    }
    for name in &report.orphans_closed {
        println!("[paw] closed orphaned window {name}");
    }
    for name in &report.relaunched {
        println!("[paw] relaunching {name}");
    }
    for name in &report.resumed {
        println!("[paw] resumed {name}");
    }
    for error in &report.errors {
        eprintln!("[paw] warning: {error}");
    }
}

/// Print the outcome with its remediation; fail the command unless it succeeded.
fn report_sync(operation: &str, task: &str, outcome: &SyncOutcome) -> Result<()> {
    println!("[paw] {operation} {task}: {outcome}");
    if outcome.is_success() {
        return Ok(());
    }
    let remediation = outcome.remediation();
    if !remediation.is_empty() {
        println!("To continue by hand:");
        for line in remediation {
            println!("  {line}");
        }
    }
    bail!("{operation} of '{task}' did not complete");
}

fn resolver_for(ctx: &Ctx, no_resolve: bool) -> Option<CommandResolver> {
    (!no_resolve && ctx.config.resolver.enabled)
        .then(|| CommandResolver::from_config(&ctx.config.resolver))
}

/// Take a monitor's single-instance lock. `None` means another instance runs.
fn monitor_lock(path: &Path, label: &str) -> Result<Option<LockHandle>> {
    match lock::acquire(path, label) {
        Ok(handle) => Ok(Some(handle)),
        Err(LockError::Locked { pid, .. }) => {
            info!(pid, "{label} already running; exiting");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn watch_wait(ctx: &Ctx, task: &Task) -> Result<()> {
    let label = format!("watch-wait {}", task.name);
    let Some(_lock) = monitor_lock(&task.watch_wait_lock(), &label)? else {
        return Ok(());
    };
    let Some(window) = ctx.find_task_window(task)? else {
        warn!(task = %task.name, "no window for task; nothing to watch");
        return Ok(());
    };

    let log = task.open_log();
    let notifier = Notifiers::from_config(&ctx.config.notify, &ctx.session);
    let mut monitor = WaitMonitor::new(
        ctx.mux,
        &notifier,
        &log,
        task,
        &window.id,
        ctx.config.notify.ask_timeout(),
    );
    let mut ticker = IntervalTicker::with_ctrlc(WAIT_INTERVAL);
    run_monitor(&mut monitor, &mut ticker, &log);
    Ok(())
}

fn watch_pr(ctx: &Ctx, task: &Task) -> Result<()> {
    let label = format!("watch-pr {}", task.name);
    let Some(_lock) = monitor_lock(&task.watch_pr_lock(), &label)? else {
        return Ok(());
    };
    let Some(window) = ctx.find_task_window(task)? else {
        warn!(task = %task.name, "no window for task; nothing to watch");
        return Ok(());
    };

    let log = task.open_log();
    let notifier = Notifiers::from_config(&ctx.config.notify, &ctx.session);
    let reviews = GhReviewSource::new(&ctx.root);
    let mut monitor = PrMonitor::new(ctx, &reviews, &notifier, &log, task, &window.id);
    let mut ticker = IntervalTicker::with_ctrlc(PR_INTERVAL);
    run_monitor(&mut monitor, &mut ticker, &log);
    Ok(())
}

fn set_status(ctx: &Ctx, task: &Task, wanted: &str, force: bool) -> Result<()> {
    let to: TaskStatus = wanted.parse()?;
    let Some(window) = ctx.find_task_window(task)? else {
        bail!("task '{}' has no window; run `paw attach` to restore it", task.name);
    };
    let result = if force {
        status::override_status(ctx.mux, &window.id, &task.name, to)?
    } else {
        status::transition(ctx.mux, &window.id, &task.name, to)?
    };
    match result {
        Transition::Applied { from, to } => {
            task.open_log().record(log::LogEvent::StatusChanged {
                from: from.to_string(),
                to: to.to_string(),
                source: "cli".to_string(),
            });
            println!("[paw] {}: {from} -> {to}", task.name);
        }
        Transition::Skipped(reason) => {
            println!("[paw] {}: unchanged ({reason})", task.name);
        }
    }
    Ok(())
}

fn list_tasks(ctx: &Ctx) -> Result<()> {
    let tasks = ctx.store().list()?;
    if tasks.is_empty() {
        println!("No tasks. Create one with `paw new <name>`.");
        return Ok(());
    }
    for task in &tasks {
        let status = match ctx.find_task_window(task)? {
            Some(window) => status::decode(&window.name)
                .map(|m| format!("{} {}", m.status.glyph(), m.status))
                .unwrap_or_else(|| "?".to_string()),
            None => "(no window)".to_string(),
        };
        let place = task
            .branch
            .clone()
            .unwrap_or_else(|| "(in place)".to_string());
        println!("{:<24} {:<16} {}", task.name, status, place);
    }
    Ok(())
}

fn init_tracing(verbose: u8, quiet_default: bool) {
    let filter = match verbose {
        0 if quiet_default => "paw=warn",
        0 => "paw=info",
        1 => "paw=debug",
        _ => "paw=trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let quiet_default = matches!(
        &cli.command,
        Command::Config { .. } | Command::List | Command::Status { .. }
    );
    init_tracing(cli.verbose, quiet_default);

    let cwd = std::env::current_dir().context("failed to get current directory (was it deleted?)")?;
    let (config, config_path) = ProjectConfig::load(&cwd)?;
    match config_path {
        Some(ref p) => info!("loaded config from {}", p.display()),
        None => info!("no .paw/config.toml found, using defaults"),
    }

    let root = paths::find_project_root(&cwd);
    let mux = TmuxClient;
    let spawner = ProcessSpawner::new(&root);
    let ctx = Ctx::new(&root, config, &mux, &spawner);

    match cli.command {
        Command::Start { detach } => {
            let version = tmux::check_tmux()?;
            info!("using {version}");
            paths::ensure_paw_dir(&root)?;
            ctx.ensure_session()?;
            print_reconcile(&reconcile::reconcile(&ctx)?);
            if detach {
                println!("[paw] session {} ready; attach with: paw attach", ctx.session);
            } else {
                mux.attach(&ctx.session)?;
            }
        }
        Command::Attach => {
            print_reconcile(&reconcile::reconcile(&ctx)?);
            mux.attach(&ctx.session)?;
        }
        Command::New {
            name,
            description,
            detach,
        } => {
            tmux::check_tmux()?;
            let task = ctx.store().create(
                &name,
                description.as_deref().unwrap_or_default(),
                &ctx.config.worktree,
            )?;
            let log = task.open_log();
            let outcome = launch::launch_task(&ctx, &task, false, &log)?;
            println!("[paw] {} started in window {}", task.name, outcome.window().id);
            if !detach {
                println!("[paw] attach with: paw attach");
            }
        }
        Command::Launch { name, resume } => {
            let task = ctx.store().load(&name)?;
            let log = task.open_log();
            let outcome = launch::launch_task(&ctx, &task, resume, &log)?;
            info!(task = %name, ?outcome, "launch finished");
        }
        Command::WatchWait { name } => watch_wait(&ctx, &ctx.store().load(&name)?)?,
        Command::WatchPr { name } => watch_pr(&ctx, &ctx.store().load(&name)?)?,
        Command::Status {
            name,
            status,
            force,
        } => set_status(&ctx, &ctx.store().load(&name)?, &status, force)?,
        Command::List => list_tasks(&ctx)?,
        Command::Sync { name, no_resolve } => {
            let task = ctx.store().load(&name)?;
            let resolver = resolver_for(&ctx, no_resolve);
            let outcome = sync::sync_task(
                &ctx,
                &task,
                resolver.as_ref().map(|r| r as &dyn ConflictResolver),
                &task.open_log(),
            )?;
            report_sync("sync", &name, &outcome)?;
        }
        Command::Merge { name, no_resolve } => {
            let task = ctx.store().load(&name)?;
            let resolver = resolver_for(&ctx, no_resolve);
            let outcome = sync::merge_task(
                &ctx,
                &task,
                resolver.as_ref().map(|r| r as &dyn ConflictResolver),
                &task.open_log(),
            )?;
            report_sync("merge", &name, &outcome)?;
        }
        Command::Finish {
            name,
            policy,
            no_resolve,
        } => {
            let mut task = ctx.store().load(&name)?;
            let policy = policy.unwrap_or(ctx.config.on_complete.policy);
            let resolver = resolver_for(&ctx, no_resolve);
            let log = task.open_log();
            let report = finish::finish_task(
                &ctx,
                &mut task,
                policy,
                resolver.as_ref().map(|r| r as &dyn ConflictResolver),
                &log,
            )?;
            if let Some(hash) = &report.committed {
                println!("[paw] committed leftover changes as {hash}");
            }
            if let Some(url) = &report.pr_url {
                println!("[paw] pull request: {url}");
            }
            if let Some(path) = &report.history {
                println!("[paw] history: {}", path.display());
            }
            if let Some(outcome) = &report.merge {
                report_sync("merge", &name, outcome)?;
            }
            println!("[paw] {name} finished ({})", policy.as_str());
        }
        Command::Reconcile => print_reconcile(&reconcile::reconcile(&ctx)?),
        Command::Config { json } => {
            if json {
                println!("{}", render_config_json(&ctx.config, config_path.as_deref())?);
            } else {
                print!("{}", render_config_human(&ctx.config, config_path.as_deref()));
            }
        }
    }

    Ok(())
}
