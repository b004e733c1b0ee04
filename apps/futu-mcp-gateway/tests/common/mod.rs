//! Shared stubs for integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use futu_mcp_gateway::application::ports::{
    GatewayConnector, GatewayError, HistoryKlineQuery, HistoryPage, QuoteChannel, QuoteQuery,
    TradeAccount, TradeChannel, TradeQuery, TradeScope,
};
use futu_mcp_gateway::application::services::{
    ConnectionManager, ConnectionSettings, ToolDispatcher,
};
use futu_mcp_gateway::domain::market::{FeedType, Symbol, TrdEnv};
use futu_mcp_gateway::domain::payload::{PageCursor, Record, Table, VendorFailure, VendorPayload};
use futu_mcp_gateway::domain::subscription::SubscriptionRegistry;

/// Settings with no settle delays.
pub fn fast_settings() -> ConnectionSettings {
    ConnectionSettings {
        trade_settle: Duration::ZERO,
        teardown_settle: Duration::ZERO,
        ..ConnectionSettings::default()
    }
}

/// Record from a JSON object literal.
pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

/// Rows `{seq: start..end}`.
pub fn seq_rows(start: u64, end: u64) -> Vec<Record> {
    (start..end).map(|i| record(json!({"seq": i}))).collect()
}

// =============================================================================
// Quote
// =============================================================================

/// Scripted market-data session.
#[derive(Default)]
pub struct StubQuote {
    /// Reply to every non-history query; defaults to an empty record list.
    pub reply: Mutex<Option<Result<VendorPayload, VendorFailure>>>,
    /// History pages keyed by the cursor they answer (`None` = first page).
    pub pages: Mutex<HashMap<Option<String>, Result<HistoryPage, VendorFailure>>>,
    /// Cursors requested, in order.
    pub page_requests: Mutex<Vec<Option<String>>>,
    /// Pairs the vendor refuses to subscribe.
    pub reject: Mutex<Vec<(Symbol, FeedType)>>,
    /// Vendor subscribe calls, in order.
    pub subscribed: Mutex<Vec<(Symbol, FeedType)>>,
    /// Vendor unsubscribe calls, in order.
    pub unsubscribed: Mutex<Vec<(Symbol, FeedType)>>,
    /// Queries received, in order.
    pub queries: Mutex<Vec<QuoteQuery>>,
    /// Pairs currently subscribed at the vendor.
    pub held: Mutex<BTreeSet<(Symbol, FeedType)>>,
    /// Latency of vendor subscribe and unsubscribe calls.
    pub vendor_delay: Mutex<Duration>,
    /// Set when the gateway has dropped the session.
    pub lost: Mutex<bool>,
}

impl StubQuote {
    /// Answer every query with `reply`.
    pub fn replying(reply: Result<VendorPayload, VendorFailure>) -> Arc<Self> {
        let stub = Self::default();
        *stub.reply.lock() = Some(reply);
        Arc::new(stub)
    }

    /// Script one history page.
    pub fn page(&self, cursor: Option<&str>, rows: Vec<Record>, next: Option<&str>) {
        self.pages.lock().insert(
            cursor.map(str::to_string),
            Ok(HistoryPage {
                table: Table::from_records(&rows),
                next: PageCursor::from_vendor(next),
            }),
        );
    }

    /// Whether the vendor currently holds `symbol`/`feed`.
    pub fn holds(&self, symbol: &Symbol, feed: FeedType) -> bool {
        self.held.lock().contains(&(symbol.clone(), feed))
    }

    /// Simulate the gateway dropping the session.
    pub fn drop_session(&self) {
        *self.lost.lock() = true;
        self.held.lock().clear();
    }

    async fn vendor_latency(&self) {
        let delay = *self.vendor_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Script a failing history page.
    pub fn failing_page(&self, cursor: Option<&str>, message: &str) {
        self.pages
            .lock()
            .insert(cursor.map(str::to_string), Err(VendorFailure::new(message)));
    }
}

#[async_trait]
impl QuoteChannel for StubQuote {
    async fn query(&self, query: QuoteQuery) -> Result<VendorPayload, VendorFailure> {
        self.queries.lock().push(query);
        self.reply
            .lock()
            .clone()
            .unwrap_or_else(|| Ok(VendorPayload::Records(Vec::new())))
    }

    async fn history_kline_page(
        &self,
        _query: &HistoryKlineQuery,
        cursor: Option<&PageCursor>,
    ) -> Result<HistoryPage, VendorFailure> {
        let key = cursor.map(|c| c.as_str().to_string());
        self.page_requests.lock().push(key.clone());
        self.pages
            .lock()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Err(VendorFailure::new("no such page")))
    }

    async fn subscribe(&self, symbol: &Symbol, feed: FeedType) -> Result<(), VendorFailure> {
        let pair = (symbol.clone(), feed);
        if self.reject.lock().contains(&pair) {
            return Err(VendorFailure::new(format!("subscription quota exceeded for {symbol}")));
        }
        self.vendor_latency().await;
        self.held.lock().insert(pair.clone());
        self.subscribed.lock().push(pair);
        Ok(())
    }

    async fn unsubscribe(&self, symbol: &Symbol, feed: FeedType) -> Result<(), VendorFailure> {
        let pair = (symbol.clone(), feed);
        self.vendor_latency().await;
        self.held.lock().remove(&pair);
        self.unsubscribed.lock().push(pair);
        Ok(())
    }

    fn is_open(&self) -> bool {
        !*self.lost.lock()
    }

    async fn close(&self) {}
}

// =============================================================================
// Trade
// =============================================================================

/// Trading session with a fixed account list.
pub struct StubTrade {
    /// Accounts the vendor reports.
    pub accounts: Vec<TradeAccount>,
    /// Reply to fund/position/order queries.
    pub reply: Result<VendorPayload, VendorFailure>,
    /// Times `close` ran.
    pub closed: Mutex<usize>,
}

impl StubTrade {
    /// Session reporting `accounts`.
    pub fn with_accounts(accounts: Vec<TradeAccount>) -> Arc<Self> {
        Arc::new(Self {
            accounts,
            reply: Ok(VendorPayload::Records(Vec::new())),
            closed: Mutex::new(0),
        })
    }
}

/// Account in `env` with id `acc_id`.
pub fn account(acc_id: u64, env: TrdEnv) -> TradeAccount {
    TradeAccount {
        acc_id,
        trd_env: env,
        record: record(json!({"acc_id": acc_id, "trd_env": env.as_str()})),
    }
}

#[async_trait]
impl TradeChannel for StubTrade {
    async fn account_list(&self) -> Result<Vec<TradeAccount>, VendorFailure> {
        Ok(self.accounts.clone())
    }

    async fn query(
        &self,
        _account: &TradeAccount,
        _query: TradeQuery,
    ) -> Result<VendorPayload, VendorFailure> {
        self.reply.clone()
    }

    fn is_open(&self) -> bool {
        true
    }

    async fn close(&self) {
        *self.closed.lock() += 1;
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Hands out the same stub sessions on every open. Reopening revives a
/// dropped quote session.
pub struct StubConnector {
    /// Quote session; `None` refuses to connect.
    pub quote: Option<Arc<StubQuote>>,
    /// Trade session; `None` refuses to connect.
    pub trade: Option<Arc<StubTrade>>,
}

#[async_trait]
impl GatewayConnector for StubConnector {
    async fn open_quote(&self) -> Result<Arc<dyn QuoteChannel>, GatewayError> {
        match &self.quote {
            Some(quote) => {
                *quote.lost.lock() = false;
                Ok(Arc::clone(quote) as Arc<dyn QuoteChannel>)
            }
            None => Err(refused()),
        }
    }

    async fn open_trade(&self, _scope: TradeScope) -> Result<Arc<dyn TradeChannel>, GatewayError> {
        match &self.trade {
            Some(trade) => Ok(Arc::clone(trade) as Arc<dyn TradeChannel>),
            None => Err(refused()),
        }
    }
}

fn refused() -> GatewayError {
    GatewayError::Connect {
        endpoint: "127.0.0.1:11111".to_string(),
        message: "connection refused".to_string(),
    }
}

/// Dispatcher over stub sessions.
pub fn dispatcher(quote: Arc<StubQuote>, trade: Option<Arc<StubTrade>>) -> Arc<ToolDispatcher> {
    let connector = Arc::new(StubConnector {
        quote: Some(quote),
        trade,
    });
    let connections = Arc::new(ConnectionManager::new(connector, fast_settings()));
    Arc::new(ToolDispatcher::new(
        connections,
        Arc::new(SubscriptionRegistry::new()),
        10,
    ))
}
