//! Single-Instance Guard
//!
//! One gateway per home directory. The guard pairs an advisory exclusive
//! lock on `.futu_mcp_gateway.lock` with a PID file naming the holder, and
//! sweeps instances left behind by a previous run.
//!
//! Every filesystem and process step is best-effort: failures are logged
//! and never abort startup on their own.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

/// PID file name under the gateway home.
pub const PID_FILE_NAME: &str = ".futu_mcp_gateway.pid";

/// Lock file name under the gateway home.
pub const LOCK_FILE_NAME: &str = ".futu_mcp_gateway.lock";

/// How long a stale instance gets to exit after SIGTERM.
const TERMINATE_GRACE: Duration = Duration::from_secs(3);

/// Poll interval while waiting for a stale instance to exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// =============================================================================
// Guard
// =============================================================================

/// Locates the lock and PID files and recognises this service's processes.
#[derive(Debug, Clone)]
pub struct ProcessGuard {
    pid_path: PathBuf,
    lock_path: PathBuf,
    marker: String,
}

impl ProcessGuard {
    /// Guard rooted at `home`; processes whose command line contains
    /// `marker` are treated as instances of this service.
    #[must_use]
    pub fn new(home: &Path, marker: impl Into<String>) -> Self {
        Self {
            pid_path: home.join(PID_FILE_NAME),
            lock_path: home.join(LOCK_FILE_NAME),
            marker: marker.into(),
        }
    }

    /// PID file location.
    #[must_use]
    pub fn pid_path(&self) -> &Path {
        &self.pid_path
    }

    /// Lock file location.
    #[must_use]
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Take the single-instance lock.
    ///
    /// Returns `None` when another live instance owns the PID file or the
    /// lock is already held.
    #[must_use]
    pub fn acquire(&self) -> Option<InstanceLock> {
        let own = std::process::id();
        if let Some(pid) = self.recorded_pid()
            && pid != own
            && is_alive(pid)
            && self.is_service(pid)
        {
            tracing::error!(pid, "Another gateway instance is running");
            return None;
        }

        let file = match OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
        {
            Ok(file) => file,
            Err(e) => {
                tracing::error!(path = %self.lock_path.display(), error = %e, "Failed to open lock file");
                return None;
            }
        };

        if let Err(e) = file.try_lock_exclusive() {
            tracing::error!(path = %self.lock_path.display(), error = %e, "Instance lock is held");
            return None;
        }

        if let Err(e) = write_pid(&self.pid_path, own) {
            tracing::warn!(path = %self.pid_path.display(), error = %e, "Failed to write PID file");
        }

        tracing::info!(pid = own, lock = %self.lock_path.display(), "Instance lock acquired");
        Some(InstanceLock {
            file: Some(file),
            pid_path: self.pid_path.clone(),
            lock_path: self.lock_path.clone(),
        })
    }

    /// Terminate an instance left behind by a previous run and remove its
    /// files.
    ///
    /// A PID file naming this process is left untouched. A dead process or
    /// one that is not this service is never signalled.
    pub async fn cleanup_stale(&self) {
        let own = std::process::id();
        let recorded = self.recorded_pid();
        if recorded == Some(own) {
            return;
        }

        if let Some(pid) = recorded
            && is_alive(pid)
        {
            if self.is_service(pid) {
                terminate(pid).await;
            } else {
                tracing::info!(pid, "PID file names an unrelated process; not signalling it");
            }
        }

        remove_quietly(&self.pid_path);
        remove_quietly(&self.lock_path);
    }

    fn recorded_pid(&self) -> Option<u32> {
        let text = match fs::read_to_string(&self.pid_path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.pid_path.display(), error = %e, "Failed to read PID file");
                return None;
            }
        };
        match text.trim().parse::<u32>() {
            Ok(pid) if pid > 0 => Some(pid),
            _ => {
                tracing::warn!(path = %self.pid_path.display(), "PID file holds no usable pid");
                None
            }
        }
    }

    fn is_service(&self, pid: u32) -> bool {
        command_line(pid).is_some_and(|cmd| cmd.contains(&self.marker))
    }
}

// =============================================================================
// Lock Handle
// =============================================================================

/// Held single-instance lock. Released on drop.
#[derive(Debug)]
pub struct InstanceLock {
    file: Option<File>,
    pid_path: PathBuf,
    lock_path: PathBuf,
}

impl InstanceLock {
    /// Unlock and delete both files. Later calls do nothing.
    pub fn release(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };
        if let Err(e) = FileExt::unlock(&file) {
            tracing::warn!(error = %e, "Failed to unlock instance lock");
        }
        drop(file);
        remove_quietly(&self.pid_path);
        remove_quietly(&self.lock_path);
        tracing::info!("Instance lock released");
    }

    /// Whether the lock is still held.
    #[must_use]
    pub const fn is_held(&self) -> bool {
        self.file.is_some()
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        self.release();
    }
}

// =============================================================================
// Process Inspection
// =============================================================================

fn to_pid(pid: u32) -> Option<Pid> {
    i32::try_from(pid).ok().map(Pid::from_raw)
}

/// Signal-0 liveness; a process we may not signal still counts as alive.
/// Zombies count as dead.
fn is_alive(pid: u32) -> bool {
    let Some(target) = to_pid(pid) else {
        return false;
    };
    let alive = match kill(target, None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    };
    alive && !is_zombie(pid)
}

fn is_zombie(pid: u32) -> bool {
    fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| {
            stat.rsplit_once(')')
                .and_then(|(_, rest)| rest.split_whitespace().next().map(|s| s == "Z"))
        })
        .unwrap_or(false)
}

fn command_line(pid: u32) -> Option<String> {
    if let Ok(raw) = fs::read(format!("/proc/{pid}/cmdline"))
        && !raw.is_empty()
    {
        let parts: Vec<String> = raw
            .split(|b| *b == 0)
            .filter(|part| !part.is_empty())
            .map(|part| String::from_utf8_lossy(part).into_owned())
            .collect();
        return Some(parts.join(" "));
    }

    match std::process::Command::new("ps")
        .args(["-o", "command=", "-p", &pid.to_string()])
        .output()
    {
        Ok(output) if output.status.success() => {
            let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
            (!text.is_empty()).then_some(text)
        }
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(pid, error = %e, "Failed to inspect process command line");
            None
        }
    }
}

async fn terminate(pid: u32) {
    let Some(target) = to_pid(pid) else {
        return;
    };
    tracing::warn!(pid, "Terminating stale gateway instance");
    if let Err(e) = kill(target, Signal::SIGTERM) {
        tracing::warn!(pid, error = %e, "SIGTERM failed");
    }

    let deadline = Instant::now() + TERMINATE_GRACE;
    while Instant::now() < deadline {
        if !is_alive(pid) {
            tracing::info!(pid, "Stale instance exited");
            return;
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
    }

    tracing::warn!(pid, "Stale instance ignored SIGTERM; killing");
    if let Err(e) = kill(target, Signal::SIGKILL) {
        tracing::warn!(pid, error = %e, "SIGKILL failed");
    }
}

// =============================================================================
// Files
// =============================================================================

fn write_pid(path: &Path, pid: u32) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    writeln!(file, "{pid}")?;
    file.sync_all()
}

fn remove_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove file"),
    }
}

// =============================================================================
// Tests
// =============================================================================
