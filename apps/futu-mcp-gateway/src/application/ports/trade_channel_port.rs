//! Trade Channel Port (Driven Port)
//!
//! Interface to an open, market-scoped trading session. Read-only: the
//! gateway queries accounts, funds, positions and orders.

use async_trait::async_trait;

use crate::domain::market::{SecurityFirm, TrdEnv, TrdMarket};
use crate::domain::payload::{Record, VendorFailure, VendorPayload};

/// What a trade session is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TradeScope {
    /// Trading market.
    pub market: TrdMarket,
    /// Broker entity.
    pub firm: SecurityFirm,
    /// Simulated or real accounts.
    pub env: TrdEnv,
}

/// A trading account visible to the session.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeAccount {
    /// Vendor account id.
    pub acc_id: u64,
    /// Environment the account trades in.
    pub trd_env: TrdEnv,
    /// Flattened vendor row describing the account.
    pub record: Record,
}

/// Account-scoped query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeQuery {
    /// Cash, buying power and asset totals.
    Funds,
    /// Open positions.
    Positions,
    /// Today's orders.
    Orders,
}

impl TradeQuery {
    /// Short name for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Funds => "funds",
            Self::Positions => "positions",
            Self::Orders => "orders",
        }
    }
}

/// Port for trading sessions.
#[async_trait]
pub trait TradeChannel: Send + Sync {
    /// List the accounts this session may use.
    async fn account_list(&self) -> Result<Vec<TradeAccount>, VendorFailure>;

    /// Run an account-scoped query.
    async fn query(
        &self,
        account: &TradeAccount,
        query: TradeQuery,
    ) -> Result<VendorPayload, VendorFailure>;

    /// Whether the session can still carry requests.
    fn is_open(&self) -> bool;

    /// Close the session. Never fails; problems are logged.
    async fn close(&self);
}
