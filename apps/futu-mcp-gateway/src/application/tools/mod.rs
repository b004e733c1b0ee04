//! Tool Catalogue
//!
//! The named operations exposed to callers, their parameter parsing and the
//! JSON schemas advertised over MCP. Both transports parse requests through
//! [`ToolCall::parse`], so a tool behaves the same wherever it is called.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::domain::market::{FeedType, KlType, QotMarket, SecType, Symbol};

/// Candles returned by `get_cur_kline` when no count is given.
pub const DEFAULT_KLINE_COUNT: u32 = 100;
const DEFAULT_TICKER_COUNT: u32 = 500;
const DEFAULT_ORDER_BOOK_DEPTH: u32 = 10;

// =============================================================================
// Errors
// =============================================================================

/// Failure to turn a (name, params) pair into a [`ToolCall`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolCallError {
    /// No tool has this name.
    #[error("Unknown method: {0}")]
    UnknownTool(String),

    /// Parameters did not match the tool's schema.
    #[error("Invalid params for {tool}: {message}")]
    InvalidParams {
        /// Tool name.
        tool: String,
        /// Parse error.
        message: String,
    },
}

// =============================================================================
// Tool Call
// =============================================================================

/// A parsed tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    /// Gateway login and market status.
    GetGlobalState,
    /// Basic quotes.
    GetStockQuote {
        /// Securities.
        symbols: Vec<Symbol>,
    },
    /// Market snapshots.
    GetMarketSnapshot {
        /// Securities.
        symbols: Vec<Symbol>,
    },
    /// Most recent candles.
    GetCurKline {
        /// Security.
        symbol: Symbol,
        /// Candle period.
        ktype: KlType,
        /// Number of candles.
        count: u32,
    },
    /// Historical candles across every page.
    GetHistoryKline {
        /// Security.
        symbol: Symbol,
        /// Candle period.
        ktype: KlType,
        /// First date, `yyyy-MM-dd`.
        start: String,
        /// Last date, `yyyy-MM-dd`.
        end: String,
        /// Candles per page; configured default when absent.
        count: Option<u32>,
    },
    /// Intraday time-sharing data.
    GetRtData {
        /// Security.
        symbol: Symbol,
    },
    /// Recent ticks.
    GetTicker {
        /// Security.
        symbol: Symbol,
        /// Number of ticks.
        num: u32,
    },
    /// Order book.
    GetOrderBook {
        /// Security.
        symbol: Symbol,
        /// Levels per side.
        num: u32,
    },
    /// Broker queue.
    GetBrokerQueue {
        /// Security.
        symbol: Symbol,
    },
    /// Subscribe to real-time feeds.
    Subscribe {
        /// Securities.
        symbols: Vec<Symbol>,
        /// Feed types.
        sub_types: Vec<FeedType>,
    },
    /// Unsubscribe from real-time feeds.
    Unsubscribe {
        /// Securities.
        symbols: Vec<Symbol>,
        /// Feed types.
        sub_types: Vec<FeedType>,
    },
    /// The caller's current subscriptions.
    GetSubscription,
    /// Option chain.
    GetOptionChain {
        /// Underlying.
        symbol: Symbol,
        /// First expiry date.
        start: Option<String>,
        /// Last expiry date.
        end: Option<String>,
    },
    /// Option expiry dates.
    GetOptionExpirationDate {
        /// Underlying.
        symbol: Symbol,
    },
    /// Trading session state.
    GetMarketState {
        /// Securities.
        symbols: Vec<Symbol>,
    },
    /// Static security information.
    GetSecurityInfo {
        /// Securities.
        symbols: Vec<Symbol>,
    },
    /// Every security of a kind in a market.
    GetSecurityList {
        /// Market.
        market: QotMarket,
        /// Security category.
        sec_type: SecType,
    },
    /// Trading accounts.
    GetAccountList,
    /// Account funds.
    GetAssetInfo {
        /// Account; default account when absent.
        acc_id: Option<u64>,
    },
    /// Account positions.
    GetPositions {
        /// Account; default account when absent.
        acc_id: Option<u64>,
    },
    /// Account orders.
    GetOrders {
        /// Account; default account when absent.
        acc_id: Option<u64>,
    },
}

/// Session a tool needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolScope {
    /// Market-data session.
    Quote,
    /// Trading session.
    Trade,
    /// Local subscription registry only.
    Registry,
}

#[derive(Deserialize)]
struct SymbolsParams {
    symbols: Vec<Symbol>,
}

#[derive(Deserialize)]
struct SymbolParams {
    symbol: Symbol,
}

#[derive(Deserialize)]
struct KlineParams {
    symbol: Symbol,
    ktype: KlType,
    #[serde(default = "default_kline_count")]
    count: u32,
}

#[derive(Deserialize)]
struct HistoryKlineParams {
    symbol: Symbol,
    ktype: KlType,
    start: String,
    end: String,
    #[serde(default)]
    count: Option<u32>,
}

#[derive(Deserialize)]
struct TickerParams {
    symbol: Symbol,
    #[serde(default = "default_ticker_count")]
    num: u32,
}

#[derive(Deserialize)]
struct OrderBookParams {
    symbol: Symbol,
    #[serde(default = "default_order_book_depth")]
    num: u32,
}

#[derive(Deserialize)]
struct SubscriptionParams {
    symbols: Vec<Symbol>,
    sub_types: Vec<FeedType>,
}

#[derive(Deserialize)]
struct OptionChainParams {
    symbol: Symbol,
    #[serde(default)]
    start: Option<String>,
    #[serde(default)]
    end: Option<String>,
}

#[derive(Deserialize)]
struct SecurityListParams {
    market: String,
    #[serde(default)]
    sec_type: Option<String>,
}

#[derive(Deserialize)]
struct AccountParams {
    #[serde(default)]
    acc_id: Option<u64>,
}

const fn default_kline_count() -> u32 {
    DEFAULT_KLINE_COUNT
}

const fn default_ticker_count() -> u32 {
    DEFAULT_TICKER_COUNT
}

const fn default_order_book_depth() -> u32 {
    DEFAULT_ORDER_BOOK_DEPTH
}

impl ToolCall {
    /// Parse a tool name and its JSON parameters.
    ///
    /// `null` parameters are treated as an empty object.
    ///
    /// # Errors
    ///
    /// Returns `UnknownTool` for an unrecognised name and `InvalidParams`
    /// when the parameters do not fit the tool.
    pub fn parse(name: &str, params: Value) -> Result<Self, ToolCallError> {
        let params = if params.is_null() { json!({}) } else { params };

        let call = match name {
            "get_global_state" => Self::GetGlobalState,
            "get_stock_quote" => {
                let p: SymbolsParams = decode(name, params)?;
                Self::GetStockQuote { symbols: p.symbols }
            }
            "get_market_snapshot" => {
                let p: SymbolsParams = decode(name, params)?;
                Self::GetMarketSnapshot { symbols: p.symbols }
            }
            "get_cur_kline" => {
                let p: KlineParams = decode(name, params)?;
                Self::GetCurKline {
                    symbol: p.symbol,
                    ktype: p.ktype,
                    count: p.count,
                }
            }
            "get_history_kline" => {
                let p: HistoryKlineParams = decode(name, params)?;
                Self::GetHistoryKline {
                    symbol: p.symbol,
                    ktype: p.ktype,
                    start: p.start,
                    end: p.end,
                    count: p.count,
                }
            }
            "get_rt_data" => {
                let p: SymbolParams = decode(name, params)?;
                Self::GetRtData { symbol: p.symbol }
            }
            "get_ticker" => {
                let p: TickerParams = decode(name, params)?;
                Self::GetTicker {
                    symbol: p.symbol,
                    num: p.num,
                }
            }
            "get_order_book" => {
                let p: OrderBookParams = decode(name, params)?;
                Self::GetOrderBook {
                    symbol: p.symbol,
                    num: p.num,
                }
            }
            "get_broker_queue" => {
                let p: SymbolParams = decode(name, params)?;
                Self::GetBrokerQueue { symbol: p.symbol }
            }
            "subscribe" => {
                let p: SubscriptionParams = decode(name, params)?;
                Self::Subscribe {
                    symbols: p.symbols,
                    sub_types: p.sub_types,
                }
            }
            "unsubscribe" => {
                let p: SubscriptionParams = decode(name, params)?;
                Self::Unsubscribe {
                    symbols: p.symbols,
                    sub_types: p.sub_types,
                }
            }
            "get_subscription" => Self::GetSubscription,
            "get_option_chain" => {
                let p: OptionChainParams = decode(name, params)?;
                Self::GetOptionChain {
                    symbol: p.symbol,
                    start: p.start,
                    end: p.end,
                }
            }
            "get_option_expiration_date" => {
                let p: SymbolParams = decode(name, params)?;
                Self::GetOptionExpirationDate { symbol: p.symbol }
            }
            "get_market_state" => {
                let p: SymbolsParams = decode(name, params)?;
                Self::GetMarketState { symbols: p.symbols }
            }
            "get_security_info" => {
                let p: SymbolsParams = decode(name, params)?;
                Self::GetSecurityInfo { symbols: p.symbols }
            }
            "get_security_list" => {
                let p: SecurityListParams = decode(name, params)?;
                let invalid = |e: crate::domain::market::MarketParseError| {
                    ToolCallError::InvalidParams {
                        tool: name.to_string(),
                        message: e.to_string(),
                    }
                };
                Self::GetSecurityList {
                    market: QotMarket::from_str_case_insensitive(&p.market).map_err(invalid)?,
                    sec_type: p
                        .sec_type
                        .as_deref()
                        .map(SecType::from_str_case_insensitive)
                        .transpose()
                        .map_err(invalid)?
                        .unwrap_or_default(),
                }
            }
            "get_account_list" => Self::GetAccountList,
            "get_asset_info" => {
                let p: AccountParams = decode(name, params)?;
                Self::GetAssetInfo { acc_id: p.acc_id }
            }
            "get_positions" => {
                let p: AccountParams = decode(name, params)?;
                Self::GetPositions { acc_id: p.acc_id }
            }
            "get_orders" => {
                let p: AccountParams = decode(name, params)?;
                Self::GetOrders { acc_id: p.acc_id }
            }
            other => return Err(ToolCallError::UnknownTool(other.to_string())),
        };
        Ok(call)
    }

    /// Tool name, as advertised.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::GetGlobalState => "get_global_state",
            Self::GetStockQuote { .. } => "get_stock_quote",
            Self::GetMarketSnapshot { .. } => "get_market_snapshot",
            Self::GetCurKline { .. } => "get_cur_kline",
            Self::GetHistoryKline { .. } => "get_history_kline",
            Self::GetRtData { .. } => "get_rt_data",
            Self::GetTicker { .. } => "get_ticker",
            Self::GetOrderBook { .. } => "get_order_book",
            Self::GetBrokerQueue { .. } => "get_broker_queue",
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::GetSubscription => "get_subscription",
            Self::GetOptionChain { .. } => "get_option_chain",
            Self::GetOptionExpirationDate { .. } => "get_option_expiration_date",
            Self::GetMarketState { .. } => "get_market_state",
            Self::GetSecurityInfo { .. } => "get_security_info",
            Self::GetSecurityList { .. } => "get_security_list",
            Self::GetAccountList => "get_account_list",
            Self::GetAssetInfo { .. } => "get_asset_info",
            Self::GetPositions { .. } => "get_positions",
            Self::GetOrders { .. } => "get_orders",
        }
    }

    /// Session this tool needs.
    #[must_use]
    pub const fn scope(&self) -> ToolScope {
        match self {
            Self::GetSubscription => ToolScope::Registry,
            Self::GetAccountList
            | Self::GetAssetInfo { .. }
            | Self::GetPositions { .. }
            | Self::GetOrders { .. } => ToolScope::Trade,
            _ => ToolScope::Quote,
        }
    }
}

fn decode<T: DeserializeOwned>(tool: &str, params: Value) -> Result<T, ToolCallError> {
    serde_json::from_value(params).map_err(|e| ToolCallError::InvalidParams {
        tool: tool.to_string(),
        message: e.to_string(),
    })
}

// =============================================================================
// Catalogue
// =============================================================================

/// Advertised description of one tool.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    /// Tool name.
    pub name: &'static str,
    /// One-line description.
    pub description: &'static str,
    /// JSON schema of the parameters object.
    pub input_schema: Value,
}

fn symbols_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "symbols": {
                "type": "array",
                "items": {"type": "string"},
                "description": "Market-prefixed codes, e.g. HK.00700"
            }
        },
        "required": ["symbols"]
    })
}

fn symbol_schema(extra: &Value, required: &[&str]) -> Value {
    let mut properties = json!({
        "symbol": {"type": "string", "description": "Market-prefixed code, e.g. HK.00700"}
    });
    if let (Some(props), Some(extra)) = (properties.as_object_mut(), extra.as_object()) {
        props.extend(extra.clone());
    }
    let mut required_fields = vec!["symbol"];
    required_fields.extend_from_slice(required);
    json!({"type": "object", "properties": properties, "required": required_fields})
}

fn empty_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

fn account_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "acc_id": {"type": "integer", "description": "Account id; default account when omitted"}
        }
    })
}

fn subscription_schema() -> Value {
    let tags: Vec<&str> = FeedType::all().iter().map(FeedType::as_str).collect();
    json!({
        "type": "object",
        "properties": {
            "symbols": {"type": "array", "items": {"type": "string"}},
            "sub_types": {"type": "array", "items": {"type": "string", "enum": tags}}
        },
        "required": ["symbols", "sub_types"]
    })
}

fn ktype_property() -> Value {
    let tags: Vec<&str> = KlType::all().iter().map(KlType::as_str).collect();
    json!({"type": "string", "enum": tags})
}

/// Every tool, in advertised order.
#[must_use]
pub fn catalog() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "get_global_state",
            description: "Get gateway login state and market status",
            input_schema: empty_schema(),
        },
        ToolSpec {
            name: "get_stock_quote",
            description: "Get stock quote data for given symbols",
            input_schema: symbols_schema(),
        },
        ToolSpec {
            name: "get_market_snapshot",
            description: "Get market snapshot for given symbols",
            input_schema: symbols_schema(),
        },
        ToolSpec {
            name: "get_cur_kline",
            description: "Get current K-line data",
            input_schema: symbol_schema(
                &json!({"ktype": ktype_property(), "count": {"type": "integer", "default": DEFAULT_KLINE_COUNT}}),
                &["ktype"],
            ),
        },
        ToolSpec {
            name: "get_history_kline",
            description: "Get historical K-line data across all pages",
            input_schema: symbol_schema(
                &json!({
                    "ktype": ktype_property(),
                    "start": {"type": "string", "description": "yyyy-MM-dd"},
                    "end": {"type": "string", "description": "yyyy-MM-dd"},
                    "count": {"type": "integer", "description": "Candles per page"}
                }),
                &["ktype", "start", "end"],
            ),
        },
        ToolSpec {
            name: "get_rt_data",
            description: "Get real-time data",
            input_schema: symbol_schema(&json!({}), &[]),
        },
        ToolSpec {
            name: "get_ticker",
            description: "Get ticker data",
            input_schema: symbol_schema(
                &json!({"num": {"type": "integer", "default": DEFAULT_TICKER_COUNT}}),
                &[],
            ),
        },
        ToolSpec {
            name: "get_order_book",
            description: "Get order book data",
            input_schema: symbol_schema(
                &json!({"num": {"type": "integer", "default": DEFAULT_ORDER_BOOK_DEPTH}}),
                &[],
            ),
        },
        ToolSpec {
            name: "get_broker_queue",
            description: "Get broker queue data",
            input_schema: symbol_schema(&json!({}), &[]),
        },
        ToolSpec {
            name: "subscribe",
            description: "Subscribe to real-time data",
            input_schema: subscription_schema(),
        },
        ToolSpec {
            name: "unsubscribe",
            description: "Unsubscribe from real-time data",
            input_schema: subscription_schema(),
        },
        ToolSpec {
            name: "get_subscription",
            description: "List current subscriptions",
            input_schema: empty_schema(),
        },
        ToolSpec {
            name: "get_option_chain",
            description: "Get option chain data",
            input_schema: symbol_schema(
                &json!({
                    "start": {"type": "string", "description": "yyyy-MM-dd"},
                    "end": {"type": "string", "description": "yyyy-MM-dd"}
                }),
                &[],
            ),
        },
        ToolSpec {
            name: "get_option_expiration_date",
            description: "Get option expiration dates",
            input_schema: symbol_schema(&json!({}), &[]),
        },
        ToolSpec {
            name: "get_market_state",
            description: "Get market state",
            input_schema: symbols_schema(),
        },
        ToolSpec {
            name: "get_security_info",
            description: "Get security information",
            input_schema: symbols_schema(),
        },
        ToolSpec {
            name: "get_security_list",
            description: "Get security list",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "market": {"type": "string", "enum": ["HK", "US", "SH", "SZ"]},
                    "sec_type": {"type": "string", "default": "STOCK"}
                },
                "required": ["market"]
            }),
        },
        ToolSpec {
            name: "get_account_list",
            description: "Get account list",
            input_schema: empty_schema(),
        },
        ToolSpec {
            name: "get_asset_info",
            description: "Get asset information",
            input_schema: account_schema(),
        },
        ToolSpec {
            name: "get_positions",
            description: "Get position list",
            input_schema: account_schema(),
        },
        ToolSpec {
            name: "get_orders",
            description: "Get order list",
            input_schema: account_schema(),
        },
    ]
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn parse_symbols_tool() {
        let call = ToolCall::parse("get_stock_quote", json!({"symbols": ["HK.00700"]})).unwrap();
        assert_eq!(
            call,
            ToolCall::GetStockQuote {
                symbols: vec!["HK.00700".parse().unwrap()]
            }
        );
        assert_eq!(call.scope(), ToolScope::Quote);
    }

    #[test]
    fn parse_applies_defaults() {
        let call =
            ToolCall::parse("get_cur_kline", json!({"symbol": "US.AAPL", "ktype": "K_DAY"}))
                .unwrap();
        assert_eq!(
            call,
            ToolCall::GetCurKline {
                symbol: "US.AAPL".parse().unwrap(),
                ktype: KlType::KDay,
                count: 100,
            }
        );
    }

    #[test]
    fn parse_null_params_as_empty() {
        assert_eq!(
            ToolCall::parse("get_account_list", Value::Null).unwrap(),
            ToolCall::GetAccountList
        );
        assert_eq!(
            ToolCall::parse("get_asset_info", Value::Null).unwrap(),
            ToolCall::GetAssetInfo { acc_id: None }
        );
    }

    #[test]
    fn parse_subscription_lists() {
        let call = ToolCall::parse(
            "subscribe",
            json!({"symbols": ["HK.00700", "US.AAPL"], "sub_types": ["QUOTE", "K_1M"]}),
        )
        .unwrap();
        let ToolCall::Subscribe { symbols, sub_types } = call else {
            panic!("expected subscribe");
        };
        assert_eq!(symbols.len(), 2);
        assert_eq!(sub_types, vec![FeedType::Quote, FeedType::Kline(KlType::K1m)]);
    }

    #[test]
    fn parse_security_list_defaults_to_stock() {
        let call = ToolCall::parse("get_security_list", json!({"market": "hk"})).unwrap();
        assert_eq!(
            call,
            ToolCall::GetSecurityList {
                market: QotMarket::Hk,
                sec_type: SecType::Stock,
            }
        );
    }

    #[test]
    fn unknown_tool() {
        assert_eq!(
            ToolCall::parse("place_order", json!({})).unwrap_err().to_string(),
            "Unknown method: place_order"
        );
    }

    #[test_case("get_stock_quote", json!({}) ; "missing symbols")]
    #[test_case("get_stock_quote", json!({"symbols": ["00700"]}) ; "unprefixed symbol")]
    #[test_case("get_cur_kline", json!({"symbol": "HK.00700", "ktype": "K_2M"}) ; "bad ktype")]
    #[test_case("subscribe", json!({"symbols": ["HK.00700"], "sub_types": ["NOPE"]}) ; "bad feed")]
    #[test_case("get_security_list", json!({"market": "XX"}) ; "bad market")]
    fn invalid_params(name: &str, params: Value) {
        assert!(matches!(
            ToolCall::parse(name, params),
            Err(ToolCallError::InvalidParams { .. })
        ));
    }

    #[test]
    fn catalog_names_all_parse() {
        let catalog = catalog();
        assert_eq!(catalog.len(), 21);
        for spec in &catalog {
            // Every advertised tool is recognised, even if params are rejected.
            assert!(!matches!(
                ToolCall::parse(spec.name, json!({})),
                Err(ToolCallError::UnknownTool(_))
            ));
            assert_eq!(spec.input_schema["type"], "object");
        }
    }

    #[test]
    fn trade_tools_are_trade_scoped() {
        for name in ["get_account_list", "get_asset_info", "get_positions", "get_orders"] {
            assert_eq!(ToolCall::parse(name, json!({})).unwrap().scope(), ToolScope::Trade);
        }
        assert_eq!(
            ToolCall::parse("get_subscription", json!({})).unwrap().scope(),
            ToolScope::Registry
        );
    }
}
