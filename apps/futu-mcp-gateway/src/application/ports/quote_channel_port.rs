//! Quote Channel Port (Driven Port)
//!
//! Interface to an open market-data session with the brokerage gateway.

use async_trait::async_trait;

use crate::domain::market::{FeedType, KlType, QotMarket, SecType, Symbol};
use crate::domain::payload::{PageCursor, Table, VendorFailure, VendorPayload};

/// A single-shot market-data query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuoteQuery {
    /// Gateway login and market status.
    GlobalState,
    /// Basic quotes (requires a `QUOTE` subscription).
    BasicQuote {
        /// Securities to quote.
        symbols: Vec<Symbol>,
    },
    /// Market snapshots.
    Snapshot {
        /// Securities to snapshot.
        symbols: Vec<Symbol>,
    },
    /// Most recent candles (requires a matching K-line subscription).
    CurrentKline {
        /// Security.
        symbol: Symbol,
        /// Candle period.
        kl_type: KlType,
        /// Number of candles.
        count: u32,
    },
    /// Intraday time-sharing data.
    RtData {
        /// Security.
        symbol: Symbol,
    },
    /// Recent tick-by-tick trades.
    Ticker {
        /// Security.
        symbol: Symbol,
        /// Number of ticks.
        count: u32,
    },
    /// Order book depth.
    OrderBook {
        /// Security.
        symbol: Symbol,
        /// Levels per side.
        depth: u32,
    },
    /// Broker queue.
    BrokerQueue {
        /// Security.
        symbol: Symbol,
    },
    /// Option chain for an underlying.
    OptionChain {
        /// Underlying security.
        owner: Symbol,
        /// First expiry date, `yyyy-MM-dd`.
        start: Option<String>,
        /// Last expiry date, `yyyy-MM-dd`.
        end: Option<String>,
    },
    /// Option expiry dates for an underlying.
    OptionExpirationDates {
        /// Underlying security.
        owner: Symbol,
    },
    /// Trading session state per security.
    MarketState {
        /// Securities to check.
        symbols: Vec<Symbol>,
    },
    /// Static information for given securities.
    SecurityInfo {
        /// Securities to describe.
        symbols: Vec<Symbol>,
    },
    /// Static information for every security of a kind in a market.
    SecurityList {
        /// Market to list.
        market: QotMarket,
        /// Security category.
        sec_type: SecType,
    },
}

/// Parameters of a paginated historical K-line query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryKlineQuery {
    /// Security.
    pub symbol: Symbol,
    /// Candle period.
    pub kl_type: KlType,
    /// First date, `yyyy-MM-dd`.
    pub start: String,
    /// Last date, `yyyy-MM-dd`.
    pub end: String,
    /// Maximum candles per page.
    pub page_size: u32,
}

/// One page of historical candles.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryPage {
    /// Candles on this page.
    pub table: Table,
    /// Cursor for the next page; `None` on the last page.
    pub next: Option<PageCursor>,
}

/// Port for market-data sessions.
#[async_trait]
pub trait QuoteChannel: Send + Sync {
    /// Run a single-shot query.
    async fn query(&self, query: QuoteQuery) -> Result<VendorPayload, VendorFailure>;

    /// Fetch one page of historical candles, continuing from `cursor`.
    async fn history_kline_page(
        &self,
        query: &HistoryKlineQuery,
        cursor: Option<&PageCursor>,
    ) -> Result<HistoryPage, VendorFailure>;

    /// Start receiving `feed` pushes for `symbol`.
    async fn subscribe(&self, symbol: &Symbol, feed: FeedType) -> Result<(), VendorFailure>;

    /// Stop receiving `feed` pushes for `symbol`.
    async fn unsubscribe(&self, symbol: &Symbol, feed: FeedType) -> Result<(), VendorFailure>;

    /// Whether the session can still carry requests. Turns `false` once the
    /// gateway drops the connection or the session is closed.
    fn is_open(&self) -> bool;

    /// Close the session. Never fails; problems are logged.
    async fn close(&self);
}
