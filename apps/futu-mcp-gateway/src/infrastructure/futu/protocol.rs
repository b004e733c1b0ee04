//! OpenD protocol identifiers and frame constants.

use crate::domain::market::FeedType;

/// Frame header length in bytes.
pub const HEADER_LEN: usize = 44;
/// Magic prefix of every frame.
pub const HEADER_FLAG: [u8; 2] = *b"FT";
/// Body serialization: JSON.
pub const FORMAT_JSON: u8 = 1;
/// Header version.
pub const PROTO_VERSION: u8 = 0;
/// Largest body the reader accepts.
pub const MAX_BODY_LEN: u32 = 64 * 1024 * 1024;

/// Return type of a successful reply.
pub const RET_OK: i64 = 0;

// System
/// Handshake.
pub const INIT_CONNECT: u32 = 1001;
/// Login and market status.
pub const GET_GLOBAL_STATE: u32 = 1002;
/// Heartbeat.
pub const KEEP_ALIVE: u32 = 1004;

// Trade
/// Trading accounts.
pub const TRD_GET_ACC_LIST: u32 = 2001;
/// Account funds.
pub const TRD_GET_FUNDS: u32 = 2101;
/// Open positions.
pub const TRD_GET_POSITION_LIST: u32 = 2102;
/// Today's orders.
pub const TRD_GET_ORDER_LIST: u32 = 2201;

// Quote
/// Subscribe or unsubscribe.
pub const QOT_SUB: u32 = 3001;
/// Basic quotes.
pub const QOT_GET_BASIC_QOT: u32 = 3004;
/// Basic quote push.
pub const QOT_UPDATE_BASIC_QOT: u32 = 3005;
/// Current candles.
pub const QOT_GET_KL: u32 = 3006;
/// Candle push.
pub const QOT_UPDATE_KL: u32 = 3007;
/// Time-sharing data.
pub const QOT_GET_RT: u32 = 3008;
/// Time-sharing push.
pub const QOT_UPDATE_RT: u32 = 3009;
/// Tick-by-tick trades.
pub const QOT_GET_TICKER: u32 = 3010;
/// Ticker push.
pub const QOT_UPDATE_TICKER: u32 = 3011;
/// Order book.
pub const QOT_GET_ORDER_BOOK: u32 = 3012;
/// Order book push.
pub const QOT_UPDATE_ORDER_BOOK: u32 = 3013;
/// Broker queue.
pub const QOT_GET_BROKER: u32 = 3014;
/// Broker queue push.
pub const QOT_UPDATE_BROKER: u32 = 3015;
/// Paged historical candles.
pub const QOT_REQUEST_HISTORY_KL: u32 = 3103;
/// Static security info.
pub const QOT_GET_STATIC_INFO: u32 = 3202;
/// Market snapshot.
pub const QOT_GET_SECURITY_SNAPSHOT: u32 = 3203;
/// Option chain.
pub const QOT_GET_OPTION_CHAIN: u32 = 3209;
/// Trading session state.
pub const QOT_GET_MARKET_STATE: u32 = 3223;
/// Option expiry dates.
pub const QOT_GET_OPTION_EXPIRATION_DATE: u32 = 3224;

/// Whether `proto_id` is a server-initiated push.
#[must_use]
pub const fn is_push(proto_id: u32) -> bool {
    matches!(
        proto_id,
        QOT_UPDATE_BASIC_QOT
            | QOT_UPDATE_KL
            | QOT_UPDATE_RT
            | QOT_UPDATE_TICKER
            | QOT_UPDATE_ORDER_BOOK
            | QOT_UPDATE_BROKER
    )
}

/// Feed carried by a push id. K-line pushes carry their period in the body,
/// so they are resolved by the decoder instead.
#[must_use]
pub const fn push_feed(proto_id: u32) -> Option<FeedType> {
    match proto_id {
        QOT_UPDATE_BASIC_QOT => Some(FeedType::Quote),
        QOT_UPDATE_RT => Some(FeedType::RtData),
        QOT_UPDATE_TICKER => Some(FeedType::Ticker),
        QOT_UPDATE_ORDER_BOOK => Some(FeedType::OrderBook),
        QOT_UPDATE_BROKER => Some(FeedType::Broker),
        _ => None,
    }
}
