//! [`GatewayConnector`] that dials OpenD.

use std::sync::Arc;

use async_trait::async_trait;

use super::client::{ClientConfig, ClientError, FutuClient};
use super::quote::FutuQuoteChannel;
use super::trade::FutuTradeChannel;
use crate::application::ports::{
    GatewayConnector, GatewayError, QuoteChannel, TradeChannel, TradeScope,
};
use crate::infrastructure::broadcast::PushHub;

/// Opens OpenD sessions. Quote sessions publish pushes to the hub.
pub struct FutuConnector {
    config: ClientConfig,
    pushes: Arc<PushHub>,
}

impl FutuConnector {
    /// Create a connector.
    #[must_use]
    pub const fn new(config: ClientConfig, pushes: Arc<PushHub>) -> Self {
        Self { config, pushes }
    }

    fn gateway_error(&self, error: ClientError) -> GatewayError {
        match error {
            ClientError::Vendor(failure) => GatewayError::Vendor(failure),
            other => GatewayError::Connect {
                endpoint: self.config.endpoint(),
                message: other.to_string(),
            },
        }
    }
}

#[async_trait]
impl GatewayConnector for FutuConnector {
    async fn open_quote(&self) -> Result<Arc<dyn QuoteChannel>, GatewayError> {
        let client = FutuClient::connect(&self.config, Some(Arc::clone(&self.pushes)))
            .await
            .map_err(|e| self.gateway_error(e))?;
        Ok(Arc::new(FutuQuoteChannel::new(client)))
    }

    async fn open_trade(&self, scope: TradeScope) -> Result<Arc<dyn TradeChannel>, GatewayError> {
        let client = FutuClient::connect(&self.config, None)
            .await
            .map_err(|e| self.gateway_error(e))?;
        Ok(Arc::new(FutuTradeChannel::new(client, scope)))
    }
}
