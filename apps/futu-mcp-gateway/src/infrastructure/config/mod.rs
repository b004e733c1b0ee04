//! Configuration Module
//!
//! Configuration loading for the gateway service.

mod settings;

pub use settings::{
    ConfigError, DEFAULT_SERVICE_MARKER, FutuSettings, GatewayConfig, ServerSettings,
};
