//! Push Fan-out
//!
//! Distributes vendor push frames to every connected push-feed session
//! through a single tokio broadcast channel. Each session filters events by
//! its own subscriptions, so the hub itself carries no per-client state.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;

use crate::domain::market::{FeedType, Symbol};
use crate::domain::payload::Record;

// =============================================================================
// Push Event
// =============================================================================

/// One decoded vendor push for a single security and feed.
#[derive(Debug, Clone, PartialEq)]
pub struct PushEvent {
    /// Security the update is for.
    pub symbol: Symbol,
    /// Feed that produced the update.
    pub feed: FeedType,
    /// Vendor push protocol id.
    pub proto_id: u32,
    /// Flattened update rows.
    pub records: Vec<Record>,
}

// =============================================================================
// Push Hub
// =============================================================================

/// Default channel capacity.
pub const DEFAULT_PUSH_CAPACITY: usize = 4096;

/// Delivery counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct PushStats {
    /// Events handed to at least one receiver.
    pub delivered: u64,
    /// Events published while nobody was listening.
    pub unobserved: u64,
    /// Receivers currently attached.
    pub receivers: usize,
}

/// Broadcast hub for vendor pushes.
///
/// # Example
///
/// ```rust
/// use futu_mcp_gateway::infrastructure::broadcast::{PushHub, DEFAULT_PUSH_CAPACITY};
///
/// let hub = PushHub::new(DEFAULT_PUSH_CAPACITY);
/// let _rx = hub.subscribe_rx();
/// assert_eq!(hub.stats().receivers, 1);
/// ```
#[derive(Debug)]
pub struct PushHub {
    tx: broadcast::Sender<PushEvent>,
    delivered: AtomicU64,
    unobserved: AtomicU64,
}

impl PushHub {
    /// Create a hub whose receivers may lag by at most `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            tx: broadcast::channel(capacity.max(1)).0,
            delivered: AtomicU64::new(0),
            unobserved: AtomicU64::new(0),
        }
    }

    /// Publish an event.
    ///
    /// Returns the number of receivers that got it, or `None` if there are
    /// no active receivers.
    pub fn send(&self, event: PushEvent) -> Option<usize> {
        let feed = event.feed.as_str();
        if let Ok(count) = self.tx.send(event) {
            self.delivered.fetch_add(1, Ordering::Relaxed);
            crate::infrastructure::metrics::record_push_delivered(feed);
            Some(count)
        } else {
            self.unobserved.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Attach a new receiver.
    #[must_use]
    pub fn subscribe_rx(&self) -> broadcast::Receiver<PushEvent> {
        self.tx.subscribe()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> PushStats {
        PushStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            unobserved: self.unobserved.load(Ordering::Relaxed),
            receivers: self.tx.receiver_count(),
        }
    }
}

impl Default for PushHub {
    fn default() -> Self {
        Self::new(DEFAULT_PUSH_CAPACITY)
    }
}
