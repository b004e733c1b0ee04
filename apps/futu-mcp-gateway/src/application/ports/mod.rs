//! Application Ports (Driven)
//!
//! Interfaces the gateway uses to reach the brokerage. Infrastructure
//! adapters implement them against OpenD; tests implement them with stubs.

mod connector_port;
mod quote_channel_port;
mod trade_channel_port;

pub use connector_port::{GatewayConnector, GatewayError};
pub use quote_channel_port::{HistoryKlineQuery, HistoryPage, QuoteChannel, QuoteQuery};
pub use trade_channel_port::{TradeAccount, TradeChannel, TradeQuery, TradeScope};
