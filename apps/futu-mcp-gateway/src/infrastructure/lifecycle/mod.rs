//! Shutdown Coordination
//!
//! SIGINT, SIGTERM, the end of MCP input and runtime faults all arrive as a
//! [`ShutdownReason`] and converge on [`Lifecycle::shutdown`], which runs
//! at most once:
//!
//! 1. cancel the shared token (every server task stops),
//! 2. close the gateway sessions,
//! 3. release the instance lock,
//! 4. sweep stale instance files.
//!
//! OS signal listeners are installed when the shutdown channel is created,
//! so a signal that arrives during startup is held until someone waits.

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::services::ConnectionManager;
use crate::infrastructure::process::{InstanceLock, ProcessGuard};

/// Why the gateway is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// A transport finished normally, e.g. MCP stdin closed.
    Completed,
    /// SIGINT or SIGTERM.
    Signal,
    /// A server task failed.
    Fault,
}

impl ShutdownReason {
    /// Process exit code for this reason.
    #[must_use]
    pub fn exit_code(self) -> ExitCode {
        match self {
            Self::Completed | Self::Signal => ExitCode::SUCCESS,
            Self::Fault => ExitCode::FAILURE,
        }
    }

    /// Log tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Signal => "signal",
            Self::Fault => "fault",
        }
    }
}

/// Cloneable handle that server tasks use to request shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: mpsc::UnboundedSender<ShutdownReason>,
}

impl ShutdownTrigger {
    /// Request shutdown. Requests after the first are ignored.
    pub fn fire(&self, reason: ShutdownReason) {
        if self.tx.send(reason).is_err() {
            tracing::debug!(reason = reason.as_str(), "Shutdown already under way");
        }
    }
}

/// Receiving side of the shutdown channel.
pub struct ShutdownEvents {
    rx: mpsc::UnboundedReceiver<ShutdownReason>,
    signals: OsSignals,
}

impl std::fmt::Debug for ShutdownEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownEvents").finish_non_exhaustive()
    }
}

/// Create a shutdown channel and start listening for OS signals.
///
/// Must be called inside the runtime.
#[must_use]
pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownEvents) {
    let (tx, rx) = mpsc::unbounded_channel();
    let events = ShutdownEvents {
        rx,
        signals: OsSignals::install(),
    };
    (ShutdownTrigger { tx }, events)
}

impl ShutdownEvents {
    /// Wait for the first shutdown request or OS signal.
    ///
    /// Requests already queued win over signals.
    pub async fn wait(&mut self) -> ShutdownReason {
        tokio::select! {
            biased;
            reason = self.rx.recv() => reason.unwrap_or(ShutdownReason::Completed),
            signal = self.signals.next() => {
                tracing::info!(signal, "Received signal, initiating shutdown");
                ShutdownReason::Signal
            }
        }
    }
}

#[cfg(unix)]
struct OsSignals {
    interrupt: Option<tokio::signal::unix::Signal>,
    terminate: Option<tokio::signal::unix::Signal>,
}

#[cfg(unix)]
impl OsSignals {
    fn install() -> Self {
        use tokio::signal::unix::SignalKind;

        Self {
            interrupt: listen(SignalKind::interrupt(), "SIGINT"),
            terminate: listen(SignalKind::terminate(), "SIGTERM"),
        }
    }

    async fn next(&mut self) -> &'static str {
        tokio::select! {
            () = recv(self.interrupt.as_mut()) => "SIGINT",
            () = recv(self.terminate.as_mut()) => "SIGTERM",
        }
    }
}

#[cfg(unix)]
fn listen(
    kind: tokio::signal::unix::SignalKind,
    name: &'static str,
) -> Option<tokio::signal::unix::Signal> {
    match tokio::signal::unix::signal(kind) {
        Ok(stream) => Some(stream),
        Err(e) => {
            tracing::warn!(signal = name, error = %e, "Signal handler unavailable");
            None
        }
    }
}

#[cfg(unix)]
async fn recv(stream: Option<&mut tokio::signal::unix::Signal>) {
    match stream {
        Some(stream) => {
            stream.recv().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(not(unix))]
struct OsSignals;

#[cfg(not(unix))]
impl OsSignals {
    const fn install() -> Self {
        Self
    }

    async fn next(&mut self) -> &'static str {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
        "Ctrl+C"
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

/// Owns process-wide teardown.
pub struct Lifecycle {
    cancel: CancellationToken,
    connections: Arc<ConnectionManager>,
    guard: ProcessGuard,
    lock: Mutex<Option<InstanceLock>>,
    shutting_down: AtomicBool,
}

impl Lifecycle {
    /// Create a lifecycle holding `lock` until shutdown.
    #[must_use]
    pub fn new(
        cancel: CancellationToken,
        connections: Arc<ConnectionManager>,
        guard: ProcessGuard,
        lock: Option<InstanceLock>,
    ) -> Self {
        Self {
            cancel,
            connections,
            guard,
            lock: Mutex::new(lock),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Token every server task watches.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether teardown has started.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Tear everything down once. Returns `false` if teardown already ran.
    pub async fn shutdown(&self, reason: ShutdownReason) -> bool {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            tracing::debug!(reason = reason.as_str(), "Shutdown already in progress");
            return false;
        }
        tracing::info!(reason = reason.as_str(), "Shutting down");

        self.cancel.cancel();
        self.connections.cleanup().await;

        let lock = self.lock.lock().take();
        if let Some(mut lock) = lock {
            lock.release();
        }

        self.guard.cleanup_stale().await;
        tracing::info!("Shutdown complete");
        true
    }
}

// =============================================================================
// Tests
// =============================================================================
