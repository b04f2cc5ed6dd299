//! Cross-process file locks with crash-tolerant staleness detection.
//!
//! A lock file holds two lines: a free-text label and the holder's PID.
//!
//! ```text
//! merge paw/fix-login
//! 48213
//! ```
//!
//! A lock is stale when the file is malformed, the PID does not parse, or the
//! process is gone. Stale locks are reclaimed by the next `acquire`, so a
//! holder that crashes never needs an external cleanup pass. Malformed files
//! count as stale on purpose: progress wins over safety here.
//!
//! Acquisition writes a private temp file and hard-links it into place, which
//! fails atomically when the lock already exists. Readers therefore never see
//! a half-written lock. Removing a stale lock happens under a short-lived
//! `.<name>.reclaim` guard, so two reclaimers cannot delete each other's
//! fresh lock.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tracing::{debug, info, warn};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Error)]
pub enum LockError {
    #[error("{} is held by pid {pid} ({label})", path.display())]
    Locked {
        path: PathBuf,
        label: String,
        pid: u32,
    },
    #[error("lock I/O failed for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LockError {
    fn io(path: &Path, source: io::Error) -> Self {
        LockError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Parsed content of a lock file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    pub label: String,
    pub pid: u32,
}

/// A held lock. Released explicitly or on drop.
#[derive(Debug)]
pub struct LockHandle {
    path: PathBuf,
    pid: u32,
    released: bool,
}

impl LockHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        // Never delete a lock someone else reclaimed from us.
        match read_lock(&self.path) {
            Some(info) if info.pid == self.pid => {
                if let Err(e) = fs::remove_file(&self.path) {
                    warn!(path = %self.path.display(), error = %e, "failed to remove lock file");
                }
            }
            _ => debug!(path = %self.path.display(), "lock no longer ours; leaving it"),
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Try to take the lock at `path` for the current process.
///
/// Never blocks: a live holder yields `LockError::Locked` and the caller
/// decides whether to retry.
pub fn acquire(path: &Path, label: &str) -> Result<LockHandle, LockError> {
    acquire_as(path, label, std::process::id())
}

/// Reclaim rounds before giving up with `Locked`. Every reclaim is followed
/// by another link attempt.
const ACQUIRE_ATTEMPTS: usize = 3;

fn acquire_as(path: &Path, label: &str, pid: u32) -> Result<LockHandle, LockError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| LockError::io(path, e))?;
    }
    let content = format!("{}\n{pid}\n", label.replace('\n', " "));

    for attempt in 0..=ACQUIRE_ATTEMPTS {
        if link_new(path, &content, pid)? {
            debug!(path = %path.display(), label = label, "lock acquired");
            return Ok(LockHandle {
                path: path.to_path_buf(),
                pid,
                released: false,
            });
        }
        if attempt == ACQUIRE_ATTEMPTS || !is_stale(path) {
            break;
        }
        reclaim_stale(path, pid)?;
    }
    Err(locked(path))
}

/// Write `content` to a private temp file and hard-link it to `path`.
/// `Ok(false)` when `path` already exists.
fn link_new(path: &Path, content: &str, pid: u32) -> Result<bool, LockError> {
    let tmp = temp_path(path, pid);
    fs::write(&tmp, content).map_err(|e| LockError::io(&tmp, e))?;
    let linked = fs::hard_link(&tmp, path);
    let _ = fs::remove_file(&tmp);
    match linked {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(LockError::io(path, e)),
    }
}

fn locked(path: &Path) -> LockError {
    let info = read_lock(path).unwrap_or(LockInfo {
        label: "(unreadable)".to_string(),
        pid: 0,
    });
    LockError::Locked {
        path: path.to_path_buf(),
        label: info.label,
        pid: info.pid,
    }
}

fn reclaim_guard(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "lock".to_string());
    path.with_file_name(format!(".{name}.reclaim"))
}

/// Remove the stale lock at `path` while holding its reclaim guard.
///
/// Only a guard holder deletes a lock file it does not own, and it re-checks
/// staleness under the guard. A stale file cannot turn live while it exists,
/// so the check and the removal cannot be split by another acquirer. When the
/// guard is busy this returns without touching `path`.
fn reclaim_stale(path: &Path, pid: u32) -> Result<(), LockError> {
    let guard = reclaim_guard(path);
    // A guard left behind by a crashed reclaimer.
    if is_stale(&guard) {
        warn!(path = %guard.display(), "removing abandoned reclaim guard");
        let _ = fs::remove_file(&guard);
    }
    if !link_new(&guard, &format!("reclaim\n{pid}\n"), pid)? {
        std::thread::yield_now();
        return Ok(());
    }

    let result = if is_stale(path) {
        info!(path = %path.display(), "reclaiming stale lock");
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LockError::io(path, e)),
        }
    } else {
        Ok(())
    };
    if let Err(e) = fs::remove_file(&guard) {
        warn!(path = %guard.display(), error = %e, "failed to remove reclaim guard");
    }
    result
}

fn temp_path(path: &Path, pid: u32) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "lock".to_string());
    let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(".{name}.{pid}.{seq}.tmp"))
}

/// Read and parse a lock file. `None` when missing or malformed.
pub fn read_lock(path: &Path) -> Option<LockInfo> {
    let content = fs::read_to_string(path).ok()?;
    parse_lock(&content)
}

fn parse_lock(content: &str) -> Option<LockInfo> {
    let mut lines = content.lines();
    let label = lines.next()?.to_string();
    let pid = lines.next()?.trim().parse().ok()?;
    Some(LockInfo { label, pid })
}

/// Whether an existing lock file may be discarded.
///
/// A missing file is not stale: there is nothing to reclaim.
pub fn is_stale(path: &Path) -> bool {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return false,
        Err(_) => return true,
    };
    match parse_lock(&content) {
        Some(info) => !process_alive(info.pid),
        None => true,
    }
}

/// Signal-0 liveness probe. Has no effect on the probed process.
pub fn process_alive(pid: u32) -> bool {
    // pid 0 would address our own process group.
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }

    #[cfg(unix)]
    {
        if unsafe { libc::kill(pid as i32, 0) } == 0 {
            return true;
        }
        // EPERM: the process exists but belongs to someone else.
        io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
    #[cfg(not(unix))]
    {
        true
    }
}
