//! Tool Dispatcher
//!
//! Request/response façade over the gateway sessions. Every call ensures the
//! session it needs, runs the vendor query and folds the outcome into a
//! [`ToolResult`]; nothing raised below this point reaches a caller.
//!
//! # Subscriptions
//!
//! Subscribe and unsubscribe walk the symbol × feed cross-product and stop
//! at the first vendor failure. Pairs the vendor accepted before the failure
//! stay in effect and are recorded, so the registry always mirrors what the
//! vendor holds. Reference counts let clients share one vendor subscription.
//!
//! Subscription mutations are serialized: the holder check, the vendor call
//! and the registry update of one request complete before the next request
//! starts. When the quote session is replaced, every registered pair is
//! subscribed again on the new session before any mutation proceeds.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::Mutex;

use super::connection::ConnectionManager;
use crate::application::ports::{
    GatewayError, HistoryKlineQuery, QuoteChannel, QuoteQuery, TradeQuery,
};
use crate::application::tools::{ToolCall, ToolCallError};
use crate::domain::market::{FeedType, Symbol};
use crate::domain::payload::{Record, Table, ToolResult, VendorPayload, normalize};
use crate::domain::subscription::{SubscriptionRegistry, SubscriptionSet};

/// Default candles per history page.
pub const DEFAULT_HISTORY_PAGE_SIZE: u32 = 1000;

/// Routes parsed tool calls to the gateway sessions.
pub struct ToolDispatcher {
    connections: Arc<ConnectionManager>,
    registry: Arc<SubscriptionRegistry>,
    history_page_size: u32,
    subscription_gate: Mutex<()>,
    synced_generation: AtomicU64,
}

impl ToolDispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub fn new(
        connections: Arc<ConnectionManager>,
        registry: Arc<SubscriptionRegistry>,
        history_page_size: u32,
    ) -> Self {
        Self {
            connections,
            registry,
            history_page_size,
            subscription_gate: Mutex::new(()),
            synced_generation: AtomicU64::new(0),
        }
    }

    /// Shared subscription registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Shared connection manager.
    #[must_use]
    pub const fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Parse and run a named tool on behalf of `client`.
    ///
    /// # Errors
    ///
    /// Returns `ToolCallError` if the name or parameters are invalid. Vendor
    /// and connection failures are reported inside the `ToolResult`.
    pub async fn call_named(
        &self,
        client: &str,
        name: &str,
        params: Value,
    ) -> Result<ToolResult, ToolCallError> {
        let call = ToolCall::parse(name, params)?;
        Ok(self.call(client, call).await)
    }

    /// Run a parsed tool on behalf of `client`.
    pub async fn call(&self, client: &str, call: ToolCall) -> ToolResult {
        tracing::debug!(client, tool = call.name(), "Dispatching tool call");
        match call {
            ToolCall::GetGlobalState => self.quote(QuoteQuery::GlobalState).await,
            ToolCall::GetStockQuote { symbols } => {
                self.quote(QuoteQuery::BasicQuote { symbols }).await
            }
            ToolCall::GetMarketSnapshot { symbols } => {
                self.quote(QuoteQuery::Snapshot { symbols }).await
            }
            ToolCall::GetCurKline {
                symbol,
                ktype,
                count,
            } => {
                self.quote(QuoteQuery::CurrentKline {
                    symbol,
                    kl_type: ktype,
                    count,
                })
                .await
            }
            ToolCall::GetHistoryKline {
                symbol,
                ktype,
                start,
                end,
                count,
            } => {
                let query = HistoryKlineQuery {
                    symbol,
                    kl_type: ktype,
                    start,
                    end,
                    page_size: count.unwrap_or(self.history_page_size),
                };
                match self.quote_session().await {
                    Ok(quote) => history_kline(quote.as_ref(), &query).await,
                    Err(e) => gateway_failure(e),
                }
            }
            ToolCall::GetRtData { symbol } => self.quote(QuoteQuery::RtData { symbol }).await,
            ToolCall::GetTicker { symbol, num } => {
                self.quote(QuoteQuery::Ticker { symbol, count: num }).await
            }
            ToolCall::GetOrderBook { symbol, num } => {
                self.quote(QuoteQuery::OrderBook { symbol, depth: num })
                    .await
            }
            ToolCall::GetBrokerQueue { symbol } => {
                self.quote(QuoteQuery::BrokerQueue { symbol }).await
            }
            ToolCall::Subscribe { symbols, sub_types } => {
                self.subscribe(client, &symbols, &sub_types).await
            }
            ToolCall::Unsubscribe { symbols, sub_types } => {
                self.unsubscribe(client, &symbols, &sub_types).await
            }
            ToolCall::GetSubscription => subscription_rows(&self.subscriptions(client)),
            ToolCall::GetOptionChain { symbol, start, end } => {
                self.quote(QuoteQuery::OptionChain {
                    owner: symbol,
                    start,
                    end,
                })
                .await
            }
            ToolCall::GetOptionExpirationDate { symbol } => {
                self.quote(QuoteQuery::OptionExpirationDates { owner: symbol })
                    .await
            }
            ToolCall::GetMarketState { symbols } => {
                self.quote(QuoteQuery::MarketState { symbols }).await
            }
            ToolCall::GetSecurityInfo { symbols } => {
                self.quote(QuoteQuery::SecurityInfo { symbols }).await
            }
            ToolCall::GetSecurityList { market, sec_type } => {
                self.quote(QuoteQuery::SecurityList { market, sec_type })
                    .await
            }
            ToolCall::GetAccountList => self.account_list().await,
            ToolCall::GetAssetInfo { acc_id } => self.trade(acc_id, TradeQuery::Funds).await,
            ToolCall::GetPositions { acc_id } => {
                self.trade(acc_id, TradeQuery::Positions).await
            }
            ToolCall::GetOrders { acc_id } => self.trade(acc_id, TradeQuery::Orders).await,
        }
    }

    async fn quote(&self, query: QuoteQuery) -> ToolResult {
        match self.quote_session().await {
            Ok(quote) => normalize(quote.query(query).await),
            Err(e) => gateway_failure(e),
        }
    }

    /// Quote session with registered subscriptions restored on it.
    async fn quote_session(&self) -> Result<Arc<dyn QuoteChannel>, GatewayError> {
        let quote = self.connections.init_quote().await?;
        if self.synced_generation.load(Ordering::Acquire) != self.connections.quote_generation() {
            let _gate = self.subscription_gate.lock().await;
            self.restore_subscriptions(quote.as_ref()).await;
        }
        Ok(quote)
    }

    /// Re-subscribe every registered pair on a replacement quote session.
    ///
    /// Caller holds the subscription gate. Failures are logged; the pair
    /// stays registered so the next replacement retries it.
    async fn restore_subscriptions(&self, quote: &dyn QuoteChannel) {
        let generation = self.connections.quote_generation();
        let previous = self.synced_generation.swap(generation, Ordering::AcqRel);
        if previous == generation || previous == 0 {
            return;
        }

        let pairs = self.registry.pairs();
        tracing::info!(pairs = pairs.len(), generation, "Restoring subscriptions on new quote session");
        for (symbol, feed) in pairs {
            if let Err(failure) = quote.subscribe(&symbol, feed).await {
                tracing::warn!(
                    symbol = %symbol,
                    feed = feed.as_str(),
                    error = %failure,
                    "Failed to restore subscription"
                );
            }
        }
    }

    async fn account_list(&self) -> ToolResult {
        let session = match self.connections.init_trade().await {
            Ok(session) => session,
            Err(e) => return gateway_failure(e),
        };
        match session.channel().account_list().await {
            Ok(accounts) => ToolResult::Success(accounts.into_iter().map(|a| a.record).collect()),
            Err(failure) => failure.into(),
        }
    }

    async fn trade(&self, acc_id: Option<u64>, query: TradeQuery) -> ToolResult {
        let session = match self.connections.init_trade().await {
            Ok(session) => session,
            Err(e) => return gateway_failure(e),
        };
        let account = match session.account(acc_id) {
            Ok(account) => account,
            Err(e) => return gateway_failure(e),
        };
        tracing::debug!(acc_id = account.acc_id, query = query.as_str(), "Trade query");
        normalize(session.channel().query(account, query).await)
    }

    /// Subscribe `client` to every symbol × feed pair.
    ///
    /// Stops at the first vendor failure and returns it; earlier pairs stay
    /// subscribed and recorded.
    pub async fn subscribe(
        &self,
        client: &str,
        symbols: &[Symbol],
        feeds: &[FeedType],
    ) -> ToolResult {
        let _gate = self.subscription_gate.lock().await;
        let quote = match self.connections.init_quote().await {
            Ok(quote) => quote,
            Err(e) => return gateway_failure(e),
        };
        self.restore_subscriptions(quote.as_ref()).await;

        for symbol in symbols {
            for &feed in feeds {
                if self.registry.is_subscribed(client, symbol, feed) {
                    continue;
                }
                // Only the first holder dials the vendor.
                if self.registry.holder_count(symbol, feed) == 0
                    && let Err(failure) = quote.subscribe(symbol, feed).await
                {
                    tracing::warn!(
                        client,
                        symbol = %symbol,
                        feed = feed.as_str(),
                        error = %failure,
                        "Subscribe rejected by vendor"
                    );
                    return failure.into();
                }
                self.registry.add(client, symbol, feed);
            }
        }

        tracing::info!(client, symbols = symbols.len(), feeds = feeds.len(), "Subscribed");
        status_success()
    }

    /// Unsubscribe `client` from every symbol × feed pair.
    ///
    /// Pairs the client does not hold are skipped. The vendor is only asked
    /// to unsubscribe when the client is the last holder.
    pub async fn unsubscribe(
        &self,
        client: &str,
        symbols: &[Symbol],
        feeds: &[FeedType],
    ) -> ToolResult {
        let _gate = self.subscription_gate.lock().await;
        let quote = match self.connections.init_quote().await {
            Ok(quote) => quote,
            Err(e) => return gateway_failure(e),
        };
        self.restore_subscriptions(quote.as_ref()).await;

        for symbol in symbols {
            for &feed in feeds {
                if !self.registry.is_subscribed(client, symbol, feed) {
                    continue;
                }
                if self.registry.holder_count(symbol, feed) == 1
                    && let Err(failure) = quote.unsubscribe(symbol, feed).await
                {
                    tracing::warn!(
                        client,
                        symbol = %symbol,
                        feed = feed.as_str(),
                        error = %failure,
                        "Unsubscribe rejected by vendor"
                    );
                    return failure.into();
                }
                self.registry.remove(client, symbol, feed);
            }
        }

        tracing::info!(client, symbols = symbols.len(), feeds = feeds.len(), "Unsubscribed");
        status_success()
    }

    /// A client's current subscriptions.
    #[must_use]
    pub fn subscriptions(&self, client: &str) -> SubscriptionSet {
        self.registry.get(client)
    }

    /// Forget a disconnected client and release pairs nobody else holds.
    ///
    /// Vendor failures are logged; the registry entry is removed regardless.
    pub async fn release_client(&self, client: &str) {
        let _gate = self.subscription_gate.lock().await;
        let orphaned = self.registry.drop_client(client);
        if orphaned.is_empty() {
            return;
        }
        let Some(quote) = self.connections.current_quote().await else {
            return;
        };
        for (symbol, feed) in orphaned {
            if let Err(failure) = quote.unsubscribe(&symbol, feed).await {
                tracing::warn!(
                    client,
                    symbol = %symbol,
                    feed = feed.as_str(),
                    error = %failure,
                    "Failed to release orphaned subscription"
                );
            }
        }
    }
}

/// Fetch every page of a historical K-line query and concatenate them.
///
/// Pages are requested with the previous page's cursor until none is
/// returned. A failure on any page discards earlier pages and returns only
/// that failure.
pub async fn history_kline(quote: &dyn QuoteChannel, query: &HistoryKlineQuery) -> ToolResult {
    let mut table = Table::new();
    let mut cursor = None;
    let mut pages = 0_u32;

    loop {
        let page = match quote.history_kline_page(query, cursor.as_ref()).await {
            Ok(page) => page,
            Err(failure) => {
                tracing::warn!(
                    symbol = %query.symbol,
                    page = pages + 1,
                    error = %failure,
                    "History page failed"
                );
                return failure.into();
            }
        };
        pages += 1;
        table.concat(page.table);

        match page.next {
            Some(next) if cursor.as_ref() == Some(&next) => {
                tracing::warn!(symbol = %query.symbol, "Vendor repeated history cursor; stopping");
                break;
            }
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    tracing::debug!(symbol = %query.symbol, pages, rows = table.row_count(), "History fetched");
    normalize(Ok(VendorPayload::Table(table)))
}

fn gateway_failure(error: GatewayError) -> ToolResult {
    match error {
        GatewayError::Vendor(failure) => failure.into(),
        other => ToolResult::error(other.to_string()),
    }
}

fn status_success() -> ToolResult {
    let mut record = Record::new();
    record.insert("status".to_string(), Value::String("success".to_string()));
    ToolResult::single(record)
}

fn subscription_rows(set: &SubscriptionSet) -> ToolResult {
    ToolResult::Success(
        set.iter()
            .map(|(symbol, feeds)| {
                let mut record = Record::new();
                record.insert("symbol".to_string(), Value::String(symbol.to_string()));
                record.insert(
                    "sub_types".to_string(),
                    Value::Array(
                        feeds
                            .iter()
                            .map(|f| Value::String(f.as_str().to_string()))
                            .collect(),
                    ),
                );
                record
            })
            .collect(),
    )
}
