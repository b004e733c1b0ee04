//! Quote session adapter.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Local, NaiveDate};
use serde_json::{Value, json};

use super::client::FutuClient;
use super::messages::{ReplyShape, list_rows, security, security_list, shape_payload};
use super::protocol;
use crate::application::ports::{HistoryKlineQuery, HistoryPage, QuoteChannel, QuoteQuery};
use crate::domain::market::{FeedType, Symbol};
use crate::domain::payload::{PageCursor, Table, VendorFailure, VendorPayload};

/// Forward-adjusted prices.
const REHAB_FORWARD: i32 = 1;
/// Option chain window used when no dates are given.
const OPTION_CHAIN_WINDOW_DAYS: i64 = 30;
const DATE_FORMAT: &str = "%Y-%m-%d";

/// [`QuoteChannel`] over an OpenD session.
pub struct FutuQuoteChannel {
    client: Arc<FutuClient>,
}

impl FutuQuoteChannel {
    /// Wrap an initialized session.
    #[must_use]
    pub const fn new(client: Arc<FutuClient>) -> Self {
        Self { client }
    }

    async fn call(&self, proto_id: u32, c2s: Value) -> Result<Value, VendorFailure> {
        Ok(self.client.request(proto_id, c2s).await?)
    }

    async fn sub(&self, symbol: &Symbol, feed: FeedType, on: bool) -> Result<(), VendorFailure> {
        self.call(
            protocol::QOT_SUB,
            json!({
                "securityList": [security(symbol)],
                "subTypeList": [feed.sub_type_code()],
                "isSubOrUnSub": on,
                "isRegOrUnRegPush": on,
                "isFirstPush": on,
            }),
        )
        .await?;
        Ok(())
    }
}

/// Request for a single-shot query: proto id, body, reply shape.
fn plan(query: &QuoteQuery) -> (u32, Value, ReplyShape) {
    match query {
        QuoteQuery::GlobalState => (
            protocol::GET_GLOBAL_STATE,
            json!({ "userID": 0 }),
            ReplyShape::Single,
        ),
        QuoteQuery::BasicQuote { symbols } => (
            protocol::QOT_GET_BASIC_QOT,
            json!({ "securityList": security_list(symbols) }),
            ReplyShape::List("basicQotList"),
        ),
        QuoteQuery::Snapshot { symbols } => (
            protocol::QOT_GET_SECURITY_SNAPSHOT,
            json!({ "securityList": security_list(symbols) }),
            ReplyShape::List("snapshotList"),
        ),
        QuoteQuery::CurrentKline {
            symbol,
            kl_type,
            count,
        } => (
            protocol::QOT_GET_KL,
            json!({
                "rehabType": REHAB_FORWARD,
                "klType": kl_type.code(),
                "security": security(symbol),
                "reqNum": count,
            }),
            ReplyShape::List("klList"),
        ),
        QuoteQuery::RtData { symbol } => (
            protocol::QOT_GET_RT,
            json!({ "security": security(symbol) }),
            ReplyShape::List("rtList"),
        ),
        QuoteQuery::Ticker { symbol, count } => (
            protocol::QOT_GET_TICKER,
            json!({ "security": security(symbol), "maxRetNum": count }),
            ReplyShape::List("tickerList"),
        ),
        QuoteQuery::OrderBook { symbol, depth } => (
            protocol::QOT_GET_ORDER_BOOK,
            json!({ "security": security(symbol), "num": depth }),
            ReplyShape::Sided {
                ask: "orderBookAskList",
                bid: "orderBookBidList",
            },
        ),
        QuoteQuery::BrokerQueue { symbol } => (
            protocol::QOT_GET_BROKER,
            json!({ "security": security(symbol) }),
            ReplyShape::Sided {
                ask: "brokerAskList",
                bid: "brokerBidList",
            },
        ),
        QuoteQuery::OptionChain { owner, start, end } => {
            let (begin, finish) = option_chain_window(start.as_deref(), end.as_deref(), today());
            (
                protocol::QOT_GET_OPTION_CHAIN,
                json!({
                    "owner": security(owner),
                    "beginTime": begin,
                    "endTime": finish,
                }),
                ReplyShape::OptionChain,
            )
        }
        QuoteQuery::OptionExpirationDates { owner } => (
            protocol::QOT_GET_OPTION_EXPIRATION_DATE,
            json!({ "owner": security(owner) }),
            ReplyShape::List("dateList"),
        ),
        QuoteQuery::MarketState { symbols } => (
            protocol::QOT_GET_MARKET_STATE,
            json!({ "securityList": security_list(symbols) }),
            ReplyShape::List("marketInfoList"),
        ),
        QuoteQuery::SecurityInfo { symbols } => (
            protocol::QOT_GET_STATIC_INFO,
            json!({ "securityList": security_list(symbols) }),
            ReplyShape::List("staticInfoList"),
        ),
        QuoteQuery::SecurityList { market, sec_type } => (
            protocol::QOT_GET_STATIC_INFO,
            json!({ "market": market.code(), "secType": sec_type.code() }),
            ReplyShape::List("staticInfoList"),
        ),
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Fill in a missing end of the option chain window.
///
/// With neither end given the window starts today. Unparseable dates are
/// passed through for the gateway to reject.
fn option_chain_window(start: Option<&str>, end: Option<&str>, today: NaiveDate) -> (String, String) {
    let window = ChronoDuration::days(OPTION_CHAIN_WINDOW_DAYS);
    let parse = |s: &str| NaiveDate::parse_from_str(s, DATE_FORMAT).ok();
    let fmt = |d: NaiveDate| d.format(DATE_FORMAT).to_string();

    match (start, end) {
        (Some(s), Some(e)) => (s.to_string(), e.to_string()),
        (Some(s), None) => {
            let end = parse(s).map_or_else(|| s.to_string(), |d| fmt(d + window));
            (s.to_string(), end)
        }
        (None, Some(e)) => {
            let start = parse(e).map_or_else(|| e.to_string(), |d| fmt(d - window));
            (start, e.to_string())
        }
        (None, None) => (fmt(today), fmt(today + window)),
    }
}

#[async_trait]
impl QuoteChannel for FutuQuoteChannel {
    async fn query(&self, query: QuoteQuery) -> Result<VendorPayload, VendorFailure> {
        let (proto_id, c2s, shape) = plan(&query);
        let s2c = self.call(proto_id, c2s).await?;
        Ok(shape_payload(s2c, shape))
    }

    async fn history_kline_page(
        &self,
        query: &HistoryKlineQuery,
        cursor: Option<&PageCursor>,
    ) -> Result<HistoryPage, VendorFailure> {
        let mut c2s = json!({
            "rehabType": REHAB_FORWARD,
            "klType": query.kl_type.code(),
            "security": security(&query.symbol),
            "beginTime": query.start,
            "endTime": query.end,
            "maxAckKLNum": query.page_size,
        });
        if let Some(cursor) = cursor {
            c2s["nextReqKey"] = Value::String(cursor.as_str().to_string());
        }

        let s2c = self.call(protocol::QOT_REQUEST_HISTORY_KL, c2s).await?;
        let rows = list_rows(&s2c, "klList").unwrap_or_default();
        let next = PageCursor::from_vendor(s2c.get("nextReqKey").and_then(Value::as_str));
        Ok(HistoryPage {
            table: Table::from_records(&rows),
            next,
        })
    }

    async fn subscribe(&self, symbol: &Symbol, feed: FeedType) -> Result<(), VendorFailure> {
        self.sub(symbol, feed, true).await
    }

    async fn unsubscribe(&self, symbol: &Symbol, feed: FeedType) -> Result<(), VendorFailure> {
        self.sub(symbol, feed, false).await
    }

    fn is_open(&self) -> bool {
        self.client.is_open()
    }

    async fn close(&self) {
        self.client.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::{KlType, QotMarket, SecType};

    fn tencent() -> Symbol {
        Symbol::new(QotMarket::Hk, "00700")
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    #[test]
    fn current_kline_request() {
        let (proto_id, c2s, shape) = plan(&QuoteQuery::CurrentKline {
            symbol: tencent(),
            kl_type: KlType::KDay,
            count: 100,
        });
        assert_eq!(proto_id, protocol::QOT_GET_KL);
        assert_eq!(c2s["klType"], json!(2));
        assert_eq!(c2s["reqNum"], json!(100));
        assert_eq!(c2s["security"], json!({"market": 1, "code": "00700"}));
        assert_eq!(shape, ReplyShape::List("klList"));
    }

    #[test]
    fn security_list_request_uses_market_and_type() {
        let (proto_id, c2s, _) = plan(&QuoteQuery::SecurityList {
            market: QotMarket::Us,
            sec_type: SecType::Etf,
        });
        assert_eq!(proto_id, protocol::QOT_GET_STATIC_INFO);
        assert_eq!(c2s, json!({"market": 11, "secType": 4}));
    }

    #[test]
    fn option_window_defaults_to_next_thirty_days() {
        let (start, end) = option_chain_window(None, None, date("2024-03-01"));
        assert_eq!(start, "2024-03-01");
        assert_eq!(end, "2024-03-31");
    }

    #[test]
    fn option_window_extends_from_given_start() {
        let (start, end) = option_chain_window(Some("2024-01-10"), None, date("2024-03-01"));
        assert_eq!((start.as_str(), end.as_str()), ("2024-01-10", "2024-02-09"));
    }

    #[test]
    fn option_window_reaches_back_from_given_end() {
        let (start, end) = option_chain_window(None, Some("2024-02-09"), date("2024-03-01"));
        assert_eq!((start.as_str(), end.as_str()), ("2024-01-10", "2024-02-09"));
    }

    #[test]
    fn option_window_keeps_both_ends() {
        let (start, end) =
            option_chain_window(Some("2024-01-01"), Some("2024-12-31"), date("2024-03-01"));
        assert_eq!((start.as_str(), end.as_str()), ("2024-01-01", "2024-12-31"));
    }
}
