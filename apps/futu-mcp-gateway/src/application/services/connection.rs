//! Connection Manager
//!
//! Owns the quote and trade sessions. Each is established lazily, verified
//! before it is published, and torn down on cleanup.
//!
//! # State Machine
//!
//! ```text
//! Absent ──init──► Initializing ──verified──► Ready
//!    ▲                  │                       │
//!    └──── failure ─────┘◄──────── cleanup ─────┘
//! ```
//!
//! A session slot only ever holds a verified session, so no partially
//! initialised connection is observable. Failures are reported to the caller
//! and never retried here. A session the gateway has dropped is evicted the
//! next time its slot is touched, which puts the slot back to `Absent`; the
//! following init dials again.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::application::ports::{
    GatewayConnector, GatewayError, QuoteChannel, QuoteQuery, TradeAccount, TradeChannel,
    TradeScope,
};
use crate::domain::market::{MarketParseError, SecurityFirm, TrdEnv, TrdMarket};

// =============================================================================
// Settings
// =============================================================================

/// Connection behaviour.
///
/// Trade selectors stay raw strings until the first trade tool runs, so a
/// bad value degrades only the trade tools.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Trading market tag, e.g. `HK`.
    pub trd_market: String,
    /// Security firm tag, e.g. `FUTUSECURITIES`.
    pub security_firm: String,
    /// Trading environment tag, `SIMULATE` or `REAL`.
    pub trd_env: String,
    /// Pause between opening a trade session and verifying it.
    pub trade_settle: Duration,
    /// Pause after closing sessions.
    pub teardown_settle: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            trd_market: TrdMarket::default().as_str().to_string(),
            security_firm: SecurityFirm::default().as_str().to_string(),
            trd_env: TrdEnv::default().as_str().to_string(),
            trade_settle: Duration::from_secs(1),
            teardown_settle: Duration::from_millis(500),
        }
    }
}

impl ConnectionSettings {
    /// Resolve the trade selectors.
    ///
    /// # Errors
    ///
    /// Returns the first selector that fails to parse.
    pub fn trade_scope(&self) -> Result<TradeScope, MarketParseError> {
        Ok(TradeScope {
            market: TrdMarket::from_str_case_insensitive(&self.trd_market)?,
            firm: SecurityFirm::from_str_case_insensitive(&self.security_firm)?,
            env: TrdEnv::from_str_case_insensitive(&self.trd_env)?,
        })
    }
}

// =============================================================================
// Channel Status
// =============================================================================

/// Lifecycle state of one session slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    /// No session.
    Absent,
    /// Session being opened and verified.
    Initializing,
    /// Verified session available.
    Ready,
}

/// Observable status of a session slot, read by health and metrics.
#[derive(Debug)]
pub struct ChannelStatus {
    state: RwLock<ChannelState>,
    connected_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    init_attempts: AtomicU64,
}

impl Default for ChannelStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelStatus {
    /// Absent, never attempted.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: RwLock::new(ChannelState::Absent),
            connected_at: RwLock::new(None),
            last_error: RwLock::new(None),
            init_attempts: AtomicU64::new(0),
        }
    }

    fn begin(&self) {
        *self.state.write() = ChannelState::Initializing;
        self.init_attempts.fetch_add(1, Ordering::Relaxed);
    }

    fn set_ready(&self) {
        *self.state.write() = ChannelState::Ready;
        *self.connected_at.write() = Some(Utc::now());
        *self.last_error.write() = None;
    }

    fn set_error(&self, message: String) {
        *self.state.write() = ChannelState::Absent;
        *self.last_error.write() = Some(message);
    }

    fn set_absent(&self) {
        *self.state.write() = ChannelState::Absent;
        *self.connected_at.write() = None;
    }

    fn set_lost(&self) {
        self.set_absent();
        *self.last_error.write() = Some(SESSION_LOST.to_string());
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        *self.state.read()
    }

    /// Point-in-time copy for reporting.
    #[must_use]
    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            state: self.state(),
            connected_at: *self.connected_at.read(),
            last_error: self.last_error.read().clone(),
            init_attempts: self.init_attempts.load(Ordering::Relaxed),
        }
    }
}

/// Recorded when a ready session is found closed.
pub const SESSION_LOST: &str = "session closed by gateway";

/// Serializable copy of a [`ChannelStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelSnapshot {
    /// Slot state.
    pub state: ChannelState,
    /// When the current session became ready.
    pub connected_at: Option<DateTime<Utc>>,
    /// Most recent initialisation failure.
    pub last_error: Option<String>,
    /// Initialisation attempts so far.
    pub init_attempts: u64,
}

// =============================================================================
// Trade Session
// =============================================================================

/// A verified trade session and the accounts it may use.
#[derive(Clone)]
pub struct TradeSession {
    channel: Arc<dyn TradeChannel>,
    scope: TradeScope,
    accounts: Vec<TradeAccount>,
}

impl TradeSession {
    /// Underlying channel.
    #[must_use]
    pub fn channel(&self) -> &Arc<dyn TradeChannel> {
        &self.channel
    }

    /// Scope the session was opened with.
    #[must_use]
    pub const fn scope(&self) -> TradeScope {
        self.scope
    }

    /// Accounts verified at initialisation. Never empty.
    #[must_use]
    pub fn accounts(&self) -> &[TradeAccount] {
        &self.accounts
    }

    /// Pick an account by id, or the default (first) account.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::UnknownAccount` if `acc_id` is not in this
    /// session.
    pub fn account(&self, acc_id: Option<u64>) -> Result<&TradeAccount, GatewayError> {
        match acc_id {
            Some(id) => self
                .accounts
                .iter()
                .find(|a| a.acc_id == id)
                .ok_or(GatewayError::UnknownAccount(id)),
            None => self.accounts.first().ok_or(GatewayError::NoAccounts {
                market: self.scope.market.as_str(),
                env: self.scope.env.as_str(),
            }),
        }
    }
}

impl std::fmt::Debug for TradeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradeSession")
            .field("scope", &self.scope)
            .field("accounts", &self.accounts.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Connection Manager
// =============================================================================

/// Lazily establishes, verifies and tears down gateway sessions.
pub struct ConnectionManager {
    connector: Arc<dyn GatewayConnector>,
    settings: ConnectionSettings,
    quote: Mutex<Option<Arc<dyn QuoteChannel>>>,
    trade: Mutex<Option<TradeSession>>,
    quote_status: ChannelStatus,
    trade_status: ChannelStatus,
    quote_generation: AtomicU64,
}

impl ConnectionManager {
    /// Create a manager with both slots absent.
    #[must_use]
    pub fn new(connector: Arc<dyn GatewayConnector>, settings: ConnectionSettings) -> Self {
        Self {
            connector,
            settings,
            quote: Mutex::new(None),
            trade: Mutex::new(None),
            quote_status: ChannelStatus::new(),
            trade_status: ChannelStatus::new(),
            quote_generation: AtomicU64::new(0),
        }
    }

    /// Return the quote session, establishing it first if absent.
    ///
    /// A transient probe session must answer a global-state query before the
    /// long-lived session is opened. Concurrent callers wait for one
    /// initialisation. A cached session that has closed is discarded and
    /// replaced.
    ///
    /// # Errors
    ///
    /// Returns the connect or probe failure; the slot stays absent.
    pub async fn init_quote(&self) -> Result<Arc<dyn QuoteChannel>, GatewayError> {
        let mut slot = self.quote.lock().await;
        if let Some(channel) = slot.as_ref()
            && channel.is_open()
        {
            return Ok(Arc::clone(channel));
        }
        if slot.take().is_some() {
            self.quote_status.set_lost();
            tracing::warn!("Quote channel closed by the gateway; reconnecting");
        }

        self.quote_status.begin();
        match self.open_verified_quote().await {
            Ok(channel) => {
                *slot = Some(Arc::clone(&channel));
                self.quote_generation.fetch_add(1, Ordering::AcqRel);
                self.quote_status.set_ready();
                tracing::info!("Quote channel ready");
                Ok(channel)
            }
            Err(e) => {
                self.quote_status.set_error(e.to_string());
                tracing::warn!(error = %e, "Quote channel initialisation failed");
                Err(e)
            }
        }
    }

    async fn open_verified_quote(&self) -> Result<Arc<dyn QuoteChannel>, GatewayError> {
        let probe = self.connector.open_quote().await?;
        let probed = probe.query(QuoteQuery::GlobalState).await;
        probe.close().await;
        probed?;

        self.connector.open_quote().await
    }

    /// Quote session if one is ready and still open; never dials.
    pub async fn current_quote(&self) -> Option<Arc<dyn QuoteChannel>> {
        self.quote
            .lock()
            .await
            .as_ref()
            .filter(|channel| channel.is_open())
            .map(Arc::clone)
    }

    /// Number of quote sessions established so far.
    ///
    /// Changes whenever a new session replaces a lost one, which tells
    /// callers that vendor-side subscriptions were reset.
    #[must_use]
    pub fn quote_generation(&self) -> u64 {
        self.quote_generation.load(Ordering::Acquire)
    }

    /// Evict sessions the gateway has closed so status reflects them.
    ///
    /// Slots busy initialising are left alone.
    pub fn reap_closed(&self) {
        if let Ok(mut slot) = self.quote.try_lock()
            && slot.as_ref().is_some_and(|channel| !channel.is_open())
        {
            slot.take();
            self.quote_status.set_lost();
            tracing::warn!("Quote channel closed by the gateway");
        }
        if let Ok(mut slot) = self.trade.try_lock()
            && slot.as_ref().is_some_and(|session| !session.channel.is_open())
        {
            slot.take();
            self.trade_status.set_lost();
            tracing::warn!("Trade channel closed by the gateway");
        }
    }

    /// Return the trade session, establishing it first if absent.
    ///
    /// Resolves the trade selectors, opens a scoped session, waits for it to
    /// settle and verifies it with an account-list query. A session with no
    /// accounts in the configured environment is closed and rejected. A
    /// cached session that has closed is discarded and replaced.
    ///
    /// # Errors
    ///
    /// Returns a configuration, connect, vendor or no-accounts failure; the
    /// slot stays absent.
    pub async fn init_trade(&self) -> Result<TradeSession, GatewayError> {
        let mut slot = self.trade.lock().await;
        if let Some(session) = slot.as_ref()
            && session.channel.is_open()
        {
            return Ok(session.clone());
        }
        if slot.take().is_some() {
            self.trade_status.set_lost();
            tracing::warn!("Trade channel closed by the gateway; reconnecting");
        }

        let scope = match self.settings.trade_scope() {
            Ok(scope) => scope,
            Err(e) => {
                tracing::warn!(error = %e, "Trade configuration invalid; trade tools unavailable");
                let err = GatewayError::Config(e.to_string());
                self.trade_status.set_error(err.to_string());
                return Err(err);
            }
        };

        self.trade_status.begin();
        match self.open_verified_trade(scope).await {
            Ok(session) => {
                *slot = Some(session.clone());
                self.trade_status.set_ready();
                tracing::info!(
                    market = scope.market.as_str(),
                    env = scope.env.as_str(),
                    firm = scope.firm.as_str(),
                    accounts = session.accounts.len(),
                    "Trade channel ready"
                );
                Ok(session)
            }
            Err(e) => {
                self.trade_status.set_error(e.to_string());
                tracing::warn!(error = %e, "Trade channel initialisation failed");
                Err(e)
            }
        }
    }

    async fn open_verified_trade(&self, scope: TradeScope) -> Result<TradeSession, GatewayError> {
        let channel = self.connector.open_trade(scope).await?;
        tokio::time::sleep(self.settings.trade_settle).await;

        let accounts = match channel.account_list().await {
            Ok(accounts) => accounts,
            Err(failure) => {
                channel.close().await;
                return Err(failure.into());
            }
        };

        let accounts: Vec<_> = accounts
            .into_iter()
            .filter(|a| a.trd_env == scope.env)
            .collect();
        if accounts.is_empty() {
            channel.close().await;
            return Err(GatewayError::NoAccounts {
                market: scope.market.as_str(),
                env: scope.env.as_str(),
            });
        }

        Ok(TradeSession {
            channel,
            scope,
            accounts,
        })
    }

    /// Close whichever sessions are open, then wait the teardown delay.
    pub async fn cleanup(&self) {
        let quote = self.quote.lock().await.take();
        if let Some(channel) = quote {
            channel.close().await;
            tracing::info!("Quote channel closed");
        }
        self.quote_status.set_absent();

        let trade = self.trade.lock().await.take();
        if let Some(session) = trade {
            session.channel.close().await;
            tracing::info!("Trade channel closed");
        }
        self.trade_status.set_absent();

        tokio::time::sleep(self.settings.teardown_settle).await;
    }

    /// Quote slot status.
    #[must_use]
    pub const fn quote_status(&self) -> &ChannelStatus {
        &self.quote_status
    }

    /// Trade slot status.
    #[must_use]
    pub const fn trade_status(&self) -> &ChannelStatus {
        &self.trade_status
    }
}

// =============================================================================
// Tests
// =============================================================================
