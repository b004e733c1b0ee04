//! OpenD JSON Messages
//!
//! Request bodies wrap their payload as `{"c2s": {...}}`. Replies carry
//! `retType`, `retMsg`, `errCode` and the payload under `s2c`.
//!
//! Reply payloads are flattened into rows before they leave this module:
//! keys become `snake_case`, nested `security` objects collapse to a
//! `code` column holding the market-prefixed symbol, and `basic` plus
//! `*ExData` sub-objects are hoisted into the row.

use serde_json::{Map, Value, json};

use super::protocol::{self, RET_OK};
use crate::domain::market::{FeedType, KlType, QotMarket, Symbol};
use crate::domain::payload::{Record, VendorFailure, VendorPayload};
use crate::infrastructure::broadcast::PushEvent;

// =============================================================================
// Requests
// =============================================================================

/// Wrap a payload as a request body.
#[must_use]
pub fn request_body(c2s: Value) -> Vec<u8> {
    json!({ "c2s": c2s }).to_string().into_bytes()
}

/// Wire form of a security.
#[must_use]
pub fn security(symbol: &Symbol) -> Value {
    json!({ "market": symbol.market().code(), "code": symbol.code() })
}

/// Wire form of a security list.
#[must_use]
pub fn security_list(symbols: &[Symbol]) -> Value {
    Value::Array(symbols.iter().map(security).collect())
}

// =============================================================================
// Replies
// =============================================================================

/// Parse a reply body, returning its `s2c` payload on success.
///
/// # Errors
///
/// Returns the vendor's message when `retType` is not zero, or a
/// description of the problem when the body is not a reply.
pub fn parse_reply(body: &[u8]) -> Result<Value, VendorFailure> {
    let mut reply: Value = serde_json::from_slice(body)
        .map_err(|e| VendorFailure::new(format!("malformed reply: {e}")))?;

    let ret_type = reply.get("retType").and_then(as_i64).unwrap_or(RET_OK);
    if ret_type != RET_OK {
        let message = reply
            .get("retMsg")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .map_or_else(|| format!("request failed (retType {ret_type})"), str::to_string);
        return Err(match reply.get("errCode").and_then(as_i64) {
            Some(code) if code != 0 => VendorFailure::with_code(message, code),
            _ => VendorFailure::new(message),
        });
    }

    Ok(reply
        .get_mut("s2c")
        .map(Value::take)
        .unwrap_or(Value::Object(Map::new())))
}

/// Read an integer that may be encoded as a JSON number or string.
///
/// 64-bit ids such as `accID` arrive as strings to avoid precision loss.
#[must_use]
pub fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Unsigned variant of [`as_i64`].
#[must_use]
pub fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

// =============================================================================
// Flattening
// =============================================================================

/// How a reply payload turns into rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyShape {
    /// `s2c` itself is the single row.
    Single,
    /// Rows under `s2c[key]`; a top-level `security` is copied onto each.
    List(&'static str),
    /// The object under `s2c[key]` is the single row.
    Nested(&'static str),
    /// Ask and bid rows under two keys, tagged with a `side` column.
    Sided {
        /// Ask-side list key.
        ask: &'static str,
        /// Bid-side list key.
        bid: &'static str,
    },
    /// Option chain: one row per call or put contract.
    OptionChain,
}

/// Convert a reply payload into the payload shape callers expect.
///
/// Anything that does not have the expected structure is returned as
/// [`VendorPayload::Opaque`].
#[must_use]
pub fn shape_payload(s2c: Value, shape: ReplyShape) -> VendorPayload {
    match shape {
        ReplyShape::Single => match s2c {
            Value::Object(map) => VendorPayload::Records(vec![flatten_object(&map)]),
            other => VendorPayload::Opaque(other),
        },
        ReplyShape::List(key) => match list_rows(&s2c, key) {
            Some(rows) => VendorPayload::Records(rows),
            None => VendorPayload::Opaque(s2c),
        },
        ReplyShape::Nested(key) => match s2c.get(key) {
            Some(Value::Object(map)) => VendorPayload::Records(vec![flatten_object(map)]),
            _ => VendorPayload::Opaque(s2c),
        },
        ReplyShape::Sided { ask, bid } => match sided_rows(&s2c, ask, bid) {
            Some(rows) => VendorPayload::Records(rows),
            None => VendorPayload::Opaque(s2c),
        },
        ReplyShape::OptionChain => match option_chain_rows(&s2c) {
            Some(rows) => VendorPayload::Records(rows),
            None => VendorPayload::Opaque(s2c),
        },
    }
}

/// Rows of the list at `s2c[key]`, or `None` if it is not a list.
#[must_use]
pub fn list_rows(s2c: &Value, key: &str) -> Option<Vec<Record>> {
    let items = s2c.get(key)?.as_array()?;
    let owner = s2c.get("security").and_then(symbol_of);
    Some(
        items
            .iter()
            .map(|item| {
                let mut row = Record::new();
                if let Some(owner) = &owner {
                    row.insert("code".to_string(), Value::String(owner.to_string()));
                }
                merge_item(&mut row, item);
                row
            })
            .collect(),
    )
}

fn sided_rows(s2c: &Value, ask: &str, bid: &str) -> Option<Vec<Record>> {
    if s2c.get(ask).is_none() && s2c.get(bid).is_none() {
        return None;
    }
    let mut rows = Vec::new();
    for (key, side) in [(ask, "ASK"), (bid, "BID")] {
        let Some(side_rows) = list_rows(s2c, key) else {
            continue;
        };
        rows.extend(side_rows.into_iter().map(|mut row| {
            row.insert("side".to_string(), Value::String(side.to_string()));
            row
        }));
    }
    Some(rows)
}

fn option_chain_rows(s2c: &Value) -> Option<Vec<Record>> {
    let chain = s2c.get("optionChain")?.as_array()?;
    let mut rows = Vec::new();
    for expiry in chain {
        let strike_time = expiry.get("strikeTime").cloned().unwrap_or(Value::Null);
        let Some(options) = expiry.get("option").and_then(Value::as_array) else {
            continue;
        };
        for pair in options {
            for (key, option_type) in [("call", "CALL"), ("put", "PUT")] {
                let Some(Value::Object(contract)) = pair.get(key) else {
                    continue;
                };
                let mut row = flatten_object(contract);
                row.insert("option_type".to_string(), Value::String(option_type.to_string()));
                row.entry("strike_time".to_string())
                    .or_insert_with(|| strike_time.clone());
                rows.push(row);
            }
        }
    }
    Some(rows)
}

fn merge_item(row: &mut Record, item: &Value) {
    match item {
        Value::Object(map) => row.extend(flatten_object(map)),
        other => {
            row.insert("value".to_string(), other.clone());
        }
    }
}

/// Flatten one vendor object into a row.
#[must_use]
pub fn flatten_object(map: &Map<String, Value>) -> Record {
    let mut row = Record::new();
    flatten_into(&mut row, map);
    row
}

fn flatten_into(row: &mut Record, map: &Map<String, Value>) {
    for (key, value) in map {
        if let Value::Object(inner) = value {
            if key == "security" || key == "owner" {
                if let Some(symbol) = symbol_of(value) {
                    let column = if key == "security" { "code" } else { "owner" };
                    row.insert(column.to_string(), Value::String(symbol.to_string()));
                    continue;
                }
            } else if key == "basic" || key.ends_with("ExData") {
                flatten_into(row, inner);
                continue;
            }
        }
        row.insert(snake_case(key), value.clone());
    }
}

fn symbol_of(value: &Value) -> Option<Symbol> {
    let market = QotMarket::from_code(value.get("market").and_then(as_i64)?)?;
    let code = value.get("code")?.as_str()?;
    Some(Symbol::new(market, code))
}

/// `curPrice` → `cur_price`, `peTTMRate` → `pe_ttm_rate`.
#[must_use]
pub fn snake_case(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    let mut out = String::with_capacity(key.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1).copied();
            let boundary = match prev {
                Some(p) if p.is_ascii_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_ascii_uppercase() => next.is_some_and(|n| n.is_ascii_lowercase()),
                _ => false,
            };
            if boundary {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

// =============================================================================
// Pushes
// =============================================================================

/// Decode a push frame body into per-security events.
///
/// Frames that fail, or whose shape is not recognized, yield no events.
#[must_use]
pub fn decode_push(proto_id: u32, body: &[u8]) -> Vec<PushEvent> {
    let s2c = match parse_reply(body) {
        Ok(s2c) => s2c,
        Err(failure) => {
            tracing::debug!(proto_id, error = %failure, "Discarding failed push");
            return Vec::new();
        }
    };

    match proto_id {
        protocol::QOT_UPDATE_BASIC_QOT => basic_quote_events(&s2c),
        protocol::QOT_UPDATE_KL => {
            let Some(kl_type) = s2c.get("klType").and_then(as_i64).and_then(KlType::from_code)
            else {
                return Vec::new();
            };
            single_event(&s2c, proto_id, FeedType::Kline(kl_type), list_rows(&s2c, "klList"))
        }
        protocol::QOT_UPDATE_RT => {
            single_event(&s2c, proto_id, FeedType::RtData, list_rows(&s2c, "rtList"))
        }
        protocol::QOT_UPDATE_TICKER => {
            single_event(&s2c, proto_id, FeedType::Ticker, list_rows(&s2c, "tickerList"))
        }
        protocol::QOT_UPDATE_ORDER_BOOK => single_event(
            &s2c,
            proto_id,
            FeedType::OrderBook,
            sided_rows(&s2c, "orderBookAskList", "orderBookBidList"),
        ),
        protocol::QOT_UPDATE_BROKER => single_event(
            &s2c,
            proto_id,
            FeedType::Broker,
            sided_rows(&s2c, "brokerAskList", "brokerBidList"),
        ),
        _ => Vec::new(),
    }
}

fn basic_quote_events(s2c: &Value) -> Vec<PushEvent> {
    let Some(items) = s2c.get("basicQotList").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let symbol = item.get("security").and_then(symbol_of)?;
            let Value::Object(map) = item else {
                return None;
            };
            Some(PushEvent {
                symbol,
                feed: FeedType::Quote,
                proto_id: protocol::QOT_UPDATE_BASIC_QOT,
                records: vec![flatten_object(map)],
            })
        })
        .collect()
}

fn single_event(
    s2c: &Value,
    proto_id: u32,
    feed: FeedType,
    records: Option<Vec<Record>>,
) -> Vec<PushEvent> {
    let (Some(symbol), Some(records)) = (s2c.get("security").and_then(symbol_of), records) else {
        return Vec::new();
    };
    vec![PushEvent {
        symbol,
        feed,
        proto_id,
        records,
    }]
}
