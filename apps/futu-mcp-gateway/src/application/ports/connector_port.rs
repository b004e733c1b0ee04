//! Gateway Connector Port (Driven Port)
//!
//! Opens sessions against the brokerage gateway.

use std::sync::Arc;

use async_trait::async_trait;

use super::quote_channel_port::QuoteChannel;
use super::trade_channel_port::{TradeChannel, TradeScope};
use crate::domain::payload::VendorFailure;

/// Failure to obtain or verify a gateway session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// TCP connect or handshake failed.
    #[error("failed to connect to gateway at {endpoint}: {message}")]
    Connect {
        /// `host:port` dialled.
        endpoint: String,
        /// Error details.
        message: String,
    },

    /// The gateway answered with a failure.
    #[error("{0}")]
    Vendor(#[from] VendorFailure),

    /// Trade selectors in configuration are invalid.
    #[error("trade configuration invalid: {0}")]
    Config(String),

    /// The trade session has no usable accounts.
    #[error("no trading accounts available for {market} ({env})")]
    NoAccounts {
        /// Trading market tag.
        market: &'static str,
        /// Trading environment tag.
        env: &'static str,
    },

    /// Unknown account id requested.
    #[error("account {0} is not available in this session")]
    UnknownAccount(u64),
}

/// Port for opening gateway sessions.
#[async_trait]
pub trait GatewayConnector: Send + Sync {
    /// Open a market-data session.
    async fn open_quote(&self) -> Result<Arc<dyn QuoteChannel>, GatewayError>;

    /// Open a trading session scoped to `scope`.
    async fn open_trade(&self, scope: TradeScope) -> Result<Arc<dyn TradeChannel>, GatewayError>;
}
