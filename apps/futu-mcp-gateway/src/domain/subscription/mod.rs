//! Subscription Registry
//!
//! Tracks which real-time feeds each push-feed client has asked for.
//!
//! # Design
//!
//! The registry tracks:
//! - A per-client map of symbol to the set of feed types held
//! - Reference counts per (symbol, feed) across all clients
//!
//! Reference counting lets several clients share one vendor subscription:
//! a pair is released at the vendor only when its last holder lets go.
//! Empty sets and empty client entries are never retained.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use parking_lot::RwLock;

use crate::domain::market::{FeedType, Symbol};

// =============================================================================
// Types
// =============================================================================

/// Identifier a push-feed client connects with.
pub type ClientId = String;

/// One client's interest set: symbol to feed types.
pub type SubscriptionSet = BTreeMap<Symbol, BTreeSet<FeedType>>;

/// A single (symbol, feed) subscription.
pub type FeedKey = (Symbol, FeedType);

#[derive(Debug, Default)]
struct RegistryState {
    clients: HashMap<ClientId, SubscriptionSet>,
    holders: HashMap<FeedKey, usize>,
}

impl RegistryState {
    fn add(&mut self, client: &str, symbol: &Symbol, feed: FeedType) -> bool {
        let feeds = self
            .clients
            .entry(client.to_string())
            .or_default()
            .entry(symbol.clone())
            .or_default();

        if !feeds.insert(feed) {
            return false;
        }

        *self.holders.entry((symbol.clone(), feed)).or_insert(0) += 1;
        true
    }

    fn remove(&mut self, client: &str, symbol: &Symbol, feed: FeedType) -> bool {
        let Some(set) = self.clients.get_mut(client) else {
            return false;
        };
        let Some(feeds) = set.get_mut(symbol) else {
            return false;
        };
        if !feeds.remove(&feed) {
            return false;
        }

        if feeds.is_empty() {
            set.remove(symbol);
        }
        if set.is_empty() {
            self.clients.remove(client);
        }

        self.release(symbol.clone(), feed);
        true
    }

    /// Decrement a holder count; `true` when the pair has no holders left.
    fn release(&mut self, symbol: Symbol, feed: FeedType) -> bool {
        let key = (symbol, feed);
        let Some(count) = self.holders.get_mut(&key) else {
            return false;
        };
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.holders.remove(&key);
            return true;
        }
        false
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Thread-safe registry of per-client subscriptions.
///
/// # Example
///
/// ```rust
/// use futu_mcp_gateway::domain::market::FeedType;
/// use futu_mcp_gateway::domain::subscription::SubscriptionRegistry;
///
/// let registry = SubscriptionRegistry::new();
/// let tencent = "HK.00700".parse().unwrap();
///
/// assert!(registry.add("alice", &tencent, FeedType::Quote));
/// assert!(registry.add("bob", &tencent, FeedType::Quote));
/// assert_eq!(registry.holder_count(&tencent, FeedType::Quote), 2);
///
/// // Alice leaves; Bob still holds the pair, nothing to release upstream
/// assert!(registry.drop_client("alice").is_empty());
///
/// // Bob leaves; the pair is orphaned
/// let orphaned = registry.drop_client("bob");
/// assert_eq!(orphaned, vec![(tencent, FeedType::Quote)]);
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    state: RwLock<RegistryState>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `client` holds `feed` for `symbol`.
    ///
    /// Returns `false` if the client already held it.
    pub fn add(&self, client: &str, symbol: &Symbol, feed: FeedType) -> bool {
        self.state.write().add(client, symbol, feed)
    }

    /// Forget that `client` holds `feed` for `symbol`.
    ///
    /// Returns `false` if the client did not hold it.
    pub fn remove(&self, client: &str, symbol: &Symbol, feed: FeedType) -> bool {
        self.state.write().remove(client, symbol, feed)
    }

    /// Snapshot of a client's subscriptions; empty for unknown clients.
    #[must_use]
    pub fn get(&self, client: &str) -> SubscriptionSet {
        self.state
            .read()
            .clients
            .get(client)
            .cloned()
            .unwrap_or_default()
    }

    /// Remove every subscription held by `client`.
    ///
    /// Returns the pairs no other client still holds, which are due for
    /// release at the vendor.
    pub fn drop_client(&self, client: &str) -> Vec<FeedKey> {
        let mut state = self.state.write();
        let Some(set) = state.clients.remove(client) else {
            return vec![];
        };

        let mut orphaned = Vec::new();
        for (symbol, feeds) in set {
            for feed in feeds {
                if state.release(symbol.clone(), feed) {
                    orphaned.push((symbol.clone(), feed));
                }
            }
        }
        orphaned
    }

    /// Whether `client` currently holds `feed` for `symbol`.
    #[must_use]
    pub fn is_subscribed(&self, client: &str, symbol: &Symbol, feed: FeedType) -> bool {
        self.state
            .read()
            .clients
            .get(client)
            .and_then(|set| set.get(symbol))
            .is_some_and(|feeds| feeds.contains(&feed))
    }

    /// Number of clients holding `feed` for `symbol`.
    #[must_use]
    pub fn holder_count(&self, symbol: &Symbol, feed: FeedType) -> usize {
        self.state
            .read()
            .holders
            .get(&(symbol.clone(), feed))
            .copied()
            .unwrap_or(0)
    }

    /// Every (symbol, feed) pair held by at least one client, sorted.
    #[must_use]
    pub fn pairs(&self) -> Vec<FeedKey> {
        let mut pairs: Vec<FeedKey> = self.state.read().holders.keys().cloned().collect();
        pairs.sort();
        pairs
    }

    /// Current registry size.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let state = self.state.read();
        SubscriptionStats {
            client_count: state.clients.len(),
            pair_count: state.holders.len(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry size for health reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SubscriptionStats {
    /// Clients with at least one subscription.
    pub client_count: usize,
    /// Distinct (symbol, feed) pairs held by anyone.
    pub pair_count: usize,
}

// =============================================================================
// Tests
// =============================================================================
