//! Long-running per-task monitors.
//!
//! A monitor is a detached `paw` process that polls one window. The loop is
//! split in two so tests never sleep:
//!
//! - `Monitor::tick` does one poll and decides whether to keep going;
//! - `Ticker::wait` blocks until the next tick, or reports cancellation.
//!
//! Ticks run strictly one after another. A failing tick is logged and the
//! loop carries on; only `TickOutcome::Exit` or a cancelled ticker end it.

pub mod pr;
pub mod wait;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::log::{LogEvent, TaskLog};

/// Poll interval of Watch-Wait.
pub const WAIT_INTERVAL: Duration = Duration::from_secs(2);
/// Poll interval of Watch-PR.
pub const PR_INTERVAL: Duration = Duration::from_secs(30);

/// Why a monitor stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorExit {
    /// The window (or its pane) no longer exists.
    WindowGone,
    /// The window now belongs to something else.
    Reassigned(String),
    /// The pull request was merged and the task cleaned up.
    Merged,
    /// The pull request was closed without merging.
    Closed,
    /// The ticker was cancelled (Ctrl-C / SIGTERM).
    Cancelled,
}

impl fmt::Display for MonitorExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorExit::WindowGone => write!(f, "window gone"),
            MonitorExit::Reassigned(why) => write!(f, "window reassigned: {why}"),
            MonitorExit::Merged => write!(f, "pull request merged"),
            MonitorExit::Closed => write!(f, "pull request closed"),
            MonitorExit::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Exit(MonitorExit),
}

pub trait Monitor {
    fn name(&self) -> &str;

    fn tick(&mut self) -> Result<TickOutcome>;
}

/// Source of poll ticks.
pub trait Ticker {
    /// Block until the next tick. `false` means stop.
    fn wait(&mut self) -> bool;
}

/// Sleeps a fixed interval, waking early when the stop flag is raised.
pub struct IntervalTicker {
    interval: Duration,
    stop: Arc<AtomicBool>,
}

const STOP_CHECK: Duration = Duration::from_millis(200);

impl IntervalTicker {
    pub fn new(interval: Duration, stop: Arc<AtomicBool>) -> Self {
        Self { interval, stop }
    }

    /// Ticker whose stop flag is raised by Ctrl-C / SIGTERM.
    pub fn with_ctrlc(interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = stop.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            stop_clone.store(true, Ordering::Relaxed);
        }) {
            warn!(error = %e, "failed to install signal handler");
        }
        Self::new(interval, stop)
    }
}

impl Ticker for IntervalTicker {
    fn wait(&mut self) -> bool {
        let start = Instant::now();
        while start.elapsed() < self.interval {
            if self.stop.load(Ordering::Relaxed) {
                return false;
            }
            std::thread::sleep(STOP_CHECK.min(self.interval));
        }
        !self.stop.load(Ordering::Relaxed)
    }
}

/// Drive `monitor` until it exits or `ticker` is cancelled.
pub fn run_monitor(monitor: &mut dyn Monitor, ticker: &mut dyn Ticker, log: &TaskLog) -> MonitorExit {
    let name = monitor.name().to_string();
    info!(monitor = %name, "monitor started");
    log.record(LogEvent::MonitorStarted {
        monitor: name.clone(),
    });

    let mut failures = 0u32;
    let exit = loop {
        match monitor.tick() {
            Ok(TickOutcome::Continue) => failures = 0,
            Ok(TickOutcome::Exit(exit)) => break exit,
            Err(e) => {
                failures += 1;
                warn!(monitor = %name, failures, error = %format!("{e:#}"), "tick failed; retrying");
            }
        }
        if !ticker.wait() {
            break MonitorExit::Cancelled;
        }
        debug!(monitor = %name, "tick");
    };

    info!(monitor = %name, reason = %exit, "monitor stopped");
    log.record(LogEvent::MonitorStopped {
        monitor: name,
        reason: exit.to_string(),
    });
    exit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualTicker;
    use anyhow::bail;

    struct Scripted {
        steps: Vec<Result<TickOutcome, String>>,
        ticks: usize,
    }

    impl Monitor for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn tick(&mut self) -> Result<TickOutcome> {
            let step = self.steps.get(self.ticks).cloned();
            self.ticks += 1;
            match step {
                Some(Ok(outcome)) => Ok(outcome),
                Some(Err(message)) => bail!(message),
                None => Ok(TickOutcome::Continue),
            }
        }
    }

    #[test]
    fn errors_are_retried_until_exit() {
        let mut monitor = Scripted {
            steps: vec![
                Err("capture failed".to_string()),
                Err("capture failed".to_string()),
                Ok(TickOutcome::Continue),
                Ok(TickOutcome::Exit(MonitorExit::WindowGone)),
            ],
            ticks: 0,
        };
        let exit = run_monitor(&mut monitor, &mut ManualTicker::new(10), &TaskLog::disabled());
        assert_eq!(exit, MonitorExit::WindowGone);
        assert_eq!(monitor.ticks, 4);
    }

    #[test]
    fn cancelled_ticker_stops_the_loop() {
        let mut monitor = Scripted {
            steps: Vec::new(),
            ticks: 0,
        };
        let exit = run_monitor(&mut monitor, &mut ManualTicker::new(2), &TaskLog::disabled());
        assert_eq!(exit, MonitorExit::Cancelled);
        assert_eq!(monitor.ticks, 3);
    }

    #[test]
    fn interval_ticker_honours_stop_flag() {
        let stop = Arc::new(AtomicBool::new(false));
        let mut ticker = IntervalTicker::new(Duration::from_millis(1), stop.clone());
        assert!(ticker.wait());
        stop.store(true, Ordering::Relaxed);
        assert!(!ticker.wait());
    }
}
