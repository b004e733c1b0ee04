//! Gateway Configuration Settings
//!
//! Configuration types for the gateway, loaded from environment variables.
//! Unset or unparseable optional values fall back to their defaults; values
//! the gateway cannot run without being valid raise [`ConfigError`].

use std::path::PathBuf;
use std::time::Duration;

use crate::application::services::{ConnectionSettings, DEFAULT_HISTORY_PAGE_SIZE};
use crate::infrastructure::broadcast::DEFAULT_PUSH_CAPACITY;
use crate::infrastructure::futu::ClientConfig;

/// Default process marker used to recognize stale instances.
pub const DEFAULT_SERVICE_MARKER: &str = "futu-mcp-gateway";

/// OpenD endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FutuSettings {
    /// OpenD host.
    pub host: String,
    /// OpenD API port.
    pub port: u16,
    /// Client id sent in the handshake.
    pub client_id: String,
    /// Per-request reply timeout.
    pub request_timeout: Duration,
}

impl Default for FutuSettings {
    fn default() -> Self {
        let client = ClientConfig::default();
        Self {
            host: client.host,
            port: client.port,
            client_id: client.client_id,
            request_timeout: client.request_timeout,
        }
    }
}

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Serve MCP on stdin/stdout.
    pub mcp_stdio_enabled: bool,
    /// Serve the WebSocket push feed.
    pub push_feed_enabled: bool,
    /// Push feed bind host.
    pub push_feed_host: String,
    /// Push feed port.
    pub push_feed_port: u16,
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            mcp_stdio_enabled: true,
            push_feed_enabled: true,
            push_feed_host: "0.0.0.0".to_string(),
            push_feed_port: 8000,
            health_port: 8082,
        }
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// OpenD endpoint.
    pub futu: FutuSettings,
    /// Session selectors and settle delays.
    pub connection: ConnectionSettings,
    /// Candles per history page.
    pub history_page_size: u32,
    /// Listeners.
    pub server: ServerSettings,
    /// Push fan-out capacity.
    pub push_capacity: usize,
    /// Directory holding the PID file, lock file and logs.
    pub home: PathBuf,
    /// Command-line marker identifying gateway processes.
    pub service_marker: String,
}

impl GatewayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a port or page size is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if a port or page size is present but invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);
        let futu_defaults = FutuSettings::default();
        let connection_defaults = ConnectionSettings::default();
        let server_defaults = ServerSettings::default();

        let futu = FutuSettings {
            host: env.string("FUTU_HOST", &futu_defaults.host)?,
            port: env.port("FUTU_PORT", futu_defaults.port)?,
            client_id: env.string("FUTU_CLIENT_ID", &futu_defaults.client_id)?,
            request_timeout: env.duration_secs(
                "FUTU_REQUEST_TIMEOUT_SECS",
                futu_defaults.request_timeout,
            ),
        };

        // Trade selectors stay raw; a bad value only disables trade tools.
        let connection = ConnectionSettings {
            trd_market: env.raw("FUTU_TRD_MARKET", &connection_defaults.trd_market),
            security_firm: env.raw("FUTU_SECURITY_FIRM", &connection_defaults.security_firm),
            trd_env: env.raw("FUTU_TRD_ENV", &connection_defaults.trd_env),
            trade_settle: env.duration_millis(
                "FUTU_TRADE_SETTLE_MS",
                connection_defaults.trade_settle,
            ),
            teardown_settle: env.duration_millis(
                "FUTU_TEARDOWN_SETTLE_MS",
                connection_defaults.teardown_settle,
            ),
        };

        let history_page_size = match env.parsed::<u32>("FUTU_HISTORY_PAGE_SIZE") {
            None => DEFAULT_HISTORY_PAGE_SIZE,
            Some(Ok(size)) if size > 0 => size,
            Some(_) => {
                return Err(env.invalid("FUTU_HISTORY_PAGE_SIZE"));
            }
        };

        let server = ServerSettings {
            mcp_stdio_enabled: env.flag("MCP_STDIO_ENABLED", server_defaults.mcp_stdio_enabled),
            push_feed_enabled: env.flag("PUSH_FEED_ENABLED", server_defaults.push_feed_enabled),
            push_feed_host: env.string("PUSH_FEED_HOST", &server_defaults.push_feed_host)?,
            push_feed_port: env.port("PUSH_FEED_PORT", server_defaults.push_feed_port)?,
            health_port: env.port_or_disabled("HEALTH_PORT", server_defaults.health_port)?,
        };

        let push_capacity = env
            .parsed::<usize>("PUSH_CHANNEL_CAPACITY")
            .and_then(Result::ok)
            .filter(|c| *c > 0)
            .unwrap_or(DEFAULT_PUSH_CAPACITY);

        let home = lookup("FUTU_MCP_HOME")
            .filter(|v| !v.trim().is_empty())
            .map_or_else(|| PathBuf::from("."), PathBuf::from);

        let service_marker = env.string("FUTU_MCP_SERVICE_MARKER", DEFAULT_SERVICE_MARKER)?;

        Ok(Self {
            futu,
            connection,
            history_page_size,
            server,
            push_capacity,
            home,
            service_marker,
        })
    }

    /// Settings for the OpenD client.
    #[must_use]
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            host: self.futu.host.clone(),
            port: self.futu.port,
            client_id: self.futu.client_id.clone(),
            request_timeout: self.futu.request_timeout,
            ..ClientConfig::default()
        }
    }

    /// Directory for rolling log files.
    #[must_use]
    pub fn log_dir(&self) -> PathBuf {
        self.home.join("logs")
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has an unusable value.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string())
    }

    fn invalid(&self, key: &str) -> ConfigError {
        ConfigError::InvalidValue {
            key: key.to_string(),
            value: self.get(key).unwrap_or_default(),
        }
    }

    fn raw(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn string(&self, key: &str, default: &str) -> Result<String, ConfigError> {
        match self.get(key) {
            None => Ok(default.to_string()),
            Some(v) if v.is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
            Some(v) => Ok(v),
        }
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str) -> Option<Result<T, T::Err>> {
        self.get(key).filter(|v| !v.is_empty()).map(|v| v.parse())
    }

    fn port(&self, key: &str, default: u16) -> Result<u16, ConfigError> {
        match self.parsed::<u16>(key) {
            None => Ok(default),
            Some(Ok(port)) if port > 0 => Ok(port),
            Some(_) => Err(self.invalid(key)),
        }
    }

    fn port_or_disabled(&self, key: &str, default: u16) -> Result<u16, ConfigError> {
        match self.parsed::<u16>(key) {
            None => Ok(default),
            Some(Ok(port)) => Ok(port),
            Some(Err(_)) => Err(self.invalid(key)),
        }
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.get(key).map_or(default, |v| {
            match v.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => default,
            }
        })
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.parsed::<u64>(key)
            .and_then(Result::ok)
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.parsed::<u64>(key)
            .and_then(Result::ok)
            .map_or(default, Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<GatewayConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        GatewayConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = config(&[]).unwrap();
        assert_eq!(config.futu.host, "127.0.0.1");
        assert_eq!(config.futu.port, 11111);
        assert_eq!(config.futu.request_timeout, Duration::from_secs(30));
        assert_eq!(config.connection.trd_env, "SIMULATE");
        assert_eq!(config.connection.trd_market, "HK");
        assert_eq!(config.connection.trade_settle, Duration::from_secs(1));
        assert_eq!(config.connection.teardown_settle, Duration::from_millis(500));
        assert_eq!(config.history_page_size, 1000);
        assert!(config.server.mcp_stdio_enabled);
        assert!(config.server.push_feed_enabled);
        assert_eq!(config.server.push_feed_port, 8000);
        assert_eq!(config.server.health_port, 8082);
        assert_eq!(config.push_capacity, DEFAULT_PUSH_CAPACITY);
        assert_eq!(config.home, PathBuf::from("."));
        assert_eq!(config.service_marker, DEFAULT_SERVICE_MARKER);
    }

    #[test]
    fn overrides_are_applied() {
        let config = config(&[
            ("FUTU_HOST", "10.0.0.5"),
            ("FUTU_PORT", "22222"),
            ("FUTU_TRD_ENV", "REAL"),
            ("FUTU_TRADE_SETTLE_MS", "0"),
            ("PUSH_FEED_ENABLED", "false"),
            ("HEALTH_PORT", "0"),
            ("FUTU_MCP_HOME", "/var/lib/futu"),
        ])
        .unwrap();
        assert_eq!(config.client_config().endpoint(), "10.0.0.5:22222");
        assert_eq!(config.connection.trd_env, "REAL");
        assert_eq!(config.connection.trade_settle, Duration::ZERO);
        assert!(!config.server.push_feed_enabled);
        assert_eq!(config.server.health_port, 0);
        assert_eq!(config.log_dir(), PathBuf::from("/var/lib/futu/logs"));
    }

    #[test]
    fn invalid_port_is_rejected() {
        assert_eq!(
            config(&[("FUTU_PORT", "eleven")]).unwrap_err(),
            ConfigError::InvalidValue {
                key: "FUTU_PORT".to_string(),
                value: "eleven".to_string(),
            }
        );
        assert!(config(&[("PUSH_FEED_PORT", "0")]).is_err());
    }

    #[test]
    fn zero_page_size_is_rejected() {
        assert!(config(&[("FUTU_HISTORY_PAGE_SIZE", "0")]).is_err());
    }

    #[test]
    fn empty_host_is_rejected() {
        assert_eq!(
            config(&[("FUTU_HOST", " ")]).unwrap_err(),
            ConfigError::EmptyValue("FUTU_HOST".to_string())
        );
    }

    #[test]
    fn bad_trade_selector_is_kept_raw() {
        let config = config(&[("FUTU_TRD_MARKET", "MARS")]).unwrap();
        assert_eq!(config.connection.trd_market, "MARS");
        assert!(config.connection.trade_scope().is_err());
    }

    #[test]
    fn unparseable_optional_values_fall_back() {
        let config = config(&[
            ("FUTU_REQUEST_TIMEOUT_SECS", "soon"),
            ("PUSH_CHANNEL_CAPACITY", "0"),
            ("MCP_STDIO_ENABLED", "maybe"),
        ])
        .unwrap();
        assert_eq!(config.futu.request_timeout, Duration::from_secs(30));
        assert_eq!(config.push_capacity, DEFAULT_PUSH_CAPACITY);
        assert!(config.server.mcp_stdio_enabled);
    }
}
