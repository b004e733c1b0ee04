//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `ConnectionManager`: Lazy, verified quote and trade sessions
//! - `ToolDispatcher`: Tool execution and result normalisation

mod connection;
mod dispatcher;

pub use connection::{
    ChannelSnapshot, ChannelState, ChannelStatus, ConnectionManager, ConnectionSettings,
    SESSION_LOST, TradeSession,
};
pub use dispatcher::{DEFAULT_HISTORY_PAGE_SIZE, ToolDispatcher, history_kline};
