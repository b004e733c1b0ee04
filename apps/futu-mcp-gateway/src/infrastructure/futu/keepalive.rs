//! Keep-alive Manager
//!
//! OpenD drops sessions that stay silent for longer than the interval it
//! announces in the `InitConnect` reply. The manager ticks at that interval
//! and asks the session to send a keep-alive; if an acknowledgement is
//! overdue it reports a timeout instead.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Keep-alive timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAliveConfig {
    /// Interval between keep-alives.
    pub interval: Duration,
    /// How long an unacknowledged keep-alive may stay outstanding.
    pub ack_timeout: Duration,
}

impl KeepAliveConfig {
    /// Configuration for the interval announced by the gateway, in seconds.
    ///
    /// Non-positive values fall back to ten seconds. Acknowledgements may
    /// lag by up to two intervals.
    #[must_use]
    pub fn from_gateway_interval(secs: i64) -> Self {
        let secs = u64::try_from(secs).ok().filter(|s| *s > 0).unwrap_or(10);
        let interval = Duration::from_secs(secs);
        Self {
            interval,
            ack_timeout: interval * 2,
        }
    }
}

/// Events emitted by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveEvent {
    /// Send a keep-alive now.
    Send,
    /// An acknowledgement is overdue; the session should be torn down.
    Timeout,
}

/// State shared between the manager and the session driving it.
#[derive(Debug)]
pub struct KeepAliveState {
    last_ack: RwLock<Instant>,
    awaiting_ack: AtomicBool,
}

impl Default for KeepAliveState {
    fn default() -> Self {
        Self::new()
    }
}

impl KeepAliveState {
    /// Fresh state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_ack: RwLock::new(Instant::now()),
            awaiting_ack: AtomicBool::new(false),
        }
    }

    /// A keep-alive reply arrived.
    pub fn record_ack(&self) {
        *self.last_ack.write() = Instant::now();
        self.awaiting_ack.store(false, Ordering::SeqCst);
    }

    /// A keep-alive went out.
    pub fn mark_sent(&self) {
        self.awaiting_ack.store(true, Ordering::SeqCst);
    }

    /// Whether a keep-alive is outstanding.
    #[must_use]
    pub fn is_awaiting_ack(&self) -> bool {
        self.awaiting_ack.load(Ordering::SeqCst)
    }

    /// Time since the last acknowledgement.
    #[must_use]
    pub fn time_since_ack(&self) -> Duration {
        self.last_ack.read().elapsed()
    }
}

/// Interval-driven keep-alive scheduler.
pub struct KeepAliveManager {
    config: KeepAliveConfig,
    state: Arc<KeepAliveState>,
    event_tx: mpsc::Sender<KeepAliveEvent>,
    cancel: CancellationToken,
}

impl KeepAliveManager {
    /// Create a manager.
    #[must_use]
    pub const fn new(
        config: KeepAliveConfig,
        state: Arc<KeepAliveState>,
        event_tx: mpsc::Sender<KeepAliveEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled, the event receiver goes away, or a timeout.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; the handshake just happened.
        interval.tick().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Keep-alive manager cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if !self.tick().await {
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&self) -> bool {
        if self.state.is_awaiting_ack() {
            let elapsed = self.state.time_since_ack();
            if elapsed > self.config.ack_timeout {
                tracing::warn!(
                    elapsed_secs = elapsed.as_secs(),
                    timeout_secs = self.config.ack_timeout.as_secs(),
                    "Keep-alive acknowledgement overdue"
                );
                let _ = self.event_tx.send(KeepAliveEvent::Timeout).await;
                return false;
            }
        }

        if self.event_tx.send(KeepAliveEvent::Send).await.is_err() {
            tracing::debug!("Keep-alive receiver dropped");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_interval_sets_timeout() {
        let config = KeepAliveConfig::from_gateway_interval(10);
        assert_eq!(config.interval, Duration::from_secs(10));
        assert_eq!(config.ack_timeout, Duration::from_secs(20));
    }

    #[test]
    fn non_positive_interval_falls_back() {
        assert_eq!(
            KeepAliveConfig::from_gateway_interval(0).interval,
            Duration::from_secs(10)
        );
        assert_eq!(
            KeepAliveConfig::from_gateway_interval(-3).interval,
            Duration::from_secs(10)
        );
    }

    #[test]
    fn ack_clears_outstanding() {
        let state = KeepAliveState::new();
        state.mark_sent();
        assert!(state.is_awaiting_ack());
        state.record_ack();
        assert!(!state.is_awaiting_ack());
    }

    #[tokio::test]
    async fn manager_requests_keepalives() {
        let config = KeepAliveConfig {
            interval: Duration::from_millis(20),
            ack_timeout: Duration::from_secs(1),
        };
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            KeepAliveManager::new(config, Arc::new(KeepAliveState::new()), tx, cancel.clone())
                .run(),
        );

        let event = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("should tick")
            .expect("channel open");
        assert_eq!(event, KeepAliveEvent::Send);

        cancel.cancel();
        handle.await.expect("manager exits");
    }

    #[tokio::test]
    async fn manager_reports_overdue_ack() {
        let config = KeepAliveConfig {
            interval: Duration::from_millis(20),
            ack_timeout: Duration::from_millis(30),
        };
        let state = Arc::new(KeepAliveState::new());
        state.mark_sent();
        *state.last_ack.write() = Instant::now()
            .checked_sub(Duration::from_millis(100))
            .unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let handle = tokio::spawn(
            KeepAliveManager::new(config, state, tx, CancellationToken::new()).run(),
        );

        let event = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("should report")
            .expect("channel open");
        assert_eq!(event, KeepAliveEvent::Timeout);
        handle.await.expect("manager exits after timeout");
    }
}
