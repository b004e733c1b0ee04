//! Futu MCP Gateway Binary
//!
//! Starts the gateway: MCP on stdio, the WebSocket push feed and the health
//! endpoint, all backed by one OpenD quote session.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin futu-mcp-gateway
//! ```
//!
//! # Environment Variables
//!
//! - `FUTU_HOST` / `FUTU_PORT`: OpenD endpoint (default: 127.0.0.1:11111)
//! - `FUTU_TRD_MARKET`, `FUTU_SECURITY_FIRM`, `FUTU_TRD_ENV`: trade selectors
//! - `FUTU_MCP_HOME`: directory for the PID file, lock file and logs (default: .)
//! - `MCP_STDIO_ENABLED`: serve MCP on stdio (default: true)
//! - `PUSH_FEED_ENABLED` / `PUSH_FEED_HOST` / `PUSH_FEED_PORT`: push feed (default: 0.0.0.0:8000)
//! - `HEALTH_PORT`: health endpoint, 0 disables (default: 8082)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use futu_mcp_gateway::application::services::{ConnectionManager, ToolDispatcher};
use futu_mcp_gateway::domain::subscription::SubscriptionRegistry;
use futu_mcp_gateway::infrastructure::broadcast::PushHub;
use futu_mcp_gateway::infrastructure::futu::FutuConnector;
use futu_mcp_gateway::infrastructure::health::{HealthServer, HealthServerState};
use futu_mcp_gateway::infrastructure::lifecycle::{
    Lifecycle, ShutdownReason, ShutdownTrigger, shutdown_channel,
};
use futu_mcp_gateway::infrastructure::mcp::McpServer;
use futu_mcp_gateway::infrastructure::process::ProcessGuard;
use futu_mcp_gateway::infrastructure::push::{PushFeedServer, PushFeedState};
use futu_mcp_gateway::infrastructure::telemetry;
use futu_mcp_gateway::{GatewayConfig, TelemetryConfig, init_metrics};
use tokio_util::sync::CancellationToken;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Bound on waiting for blocking tasks (the stdin reader) at exit.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

fn main() -> ExitCode {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };
    let code = runtime.block_on(run());
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    code
}

async fn run() -> ExitCode {
    load_dotenv();

    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _telemetry_guard = telemetry::init(TelemetryConfig::from_env(Some(config.log_dir())));
    tracing::info!(version = VERSION, "Starting Futu MCP gateway");
    log_config(&config);

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder unavailable");
    }

    // Listen for signals before any slow startup step.
    let (trigger, mut events) = shutdown_channel();

    let guard = ProcessGuard::new(&config.home, config.service_marker.clone());
    guard.cleanup_stale().await;
    let Some(lock) = guard.acquire() else {
        tracing::error!(home = %config.home.display(), "Another gateway instance holds the lock");
        return ExitCode::FAILURE;
    };

    let pushes = Arc::new(PushHub::new(config.push_capacity));
    let connector = Arc::new(FutuConnector::new(config.client_config(), Arc::clone(&pushes)));
    let connections = Arc::new(ConnectionManager::new(connector, config.connection.clone()));
    let registry = Arc::new(SubscriptionRegistry::new());
    let dispatcher = Arc::new(ToolDispatcher::new(
        Arc::clone(&connections),
        Arc::clone(&registry),
        config.history_page_size,
    ));

    let shutdown_token = CancellationToken::new();
    let lifecycle = Lifecycle::new(
        shutdown_token.clone(),
        Arc::clone(&connections),
        guard,
        Some(lock),
    );

    let startup = tokio::select! {
        result = connections.init_quote() => Ok(result),
        reason = events.wait() => Err(reason),
    };
    match startup {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            tracing::error!(error = %e, endpoint = %config.client_config().endpoint(), "Quote session unavailable");
            lifecycle.shutdown(ShutdownReason::Fault).await;
            return ExitCode::FAILURE;
        }
        Err(reason) => {
            tracing::info!(reason = reason.as_str(), "Shutdown requested during startup");
            lifecycle.shutdown(reason).await;
            return reason.exit_code();
        }
    }

    if config.server.health_port != 0 {
        let state = Arc::new(HealthServerState::new(
            VERSION.to_string(),
            Arc::clone(&connections),
            Arc::clone(&registry),
            Arc::clone(&pushes),
        ));
        let server = HealthServer::new(config.server.health_port, state, shutdown_token.clone());
        let trigger = trigger.clone();
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                tracing::error!(error = %e, "Health server error");
                trigger.fire(ShutdownReason::Fault);
            }
        });
    }

    if config.server.push_feed_enabled {
        spawn_push_feed(&config, &dispatcher, &pushes, &shutdown_token, trigger.clone());
    }

    if config.server.mcp_stdio_enabled {
        let server = McpServer::new(
            Arc::clone(&dispatcher),
            VERSION.to_string(),
            shutdown_token.clone(),
        );
        let trigger = trigger.clone();
        tokio::spawn(async move {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            match server.run(stdin, tokio::io::stdout()).await {
                Ok(()) => trigger.fire(ShutdownReason::Completed),
                Err(e) => {
                    tracing::error!(error = %e, "MCP server error");
                    trigger.fire(ShutdownReason::Fault);
                }
            }
        });
    }

    tracing::info!("Gateway ready");

    let reason = events.wait().await;
    lifecycle.shutdown(reason).await;

    tracing::info!(reason = reason.as_str(), "Gateway stopped");
    reason.exit_code()
}

fn spawn_push_feed(
    config: &GatewayConfig,
    dispatcher: &Arc<ToolDispatcher>,
    pushes: &Arc<PushHub>,
    shutdown_token: &CancellationToken,
    trigger: ShutdownTrigger,
) {
    let state = Arc::new(PushFeedState::new(
        Arc::clone(dispatcher),
        Arc::clone(pushes),
        shutdown_token.clone(),
    ));
    let server = PushFeedServer::new(
        config.server.push_feed_host.clone(),
        config.server.push_feed_port,
        state,
    );
    tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!(error = %e, "Push feed error");
            trigger.fire(ShutdownReason::Fault);
        }
    });
}

/// Log the parsed configuration.
fn log_config(config: &GatewayConfig) {
    tracing::info!(
        opend = %config.client_config().endpoint(),
        trd_market = %config.connection.trd_market,
        trd_env = %config.connection.trd_env,
        mcp_stdio = config.server.mcp_stdio_enabled,
        push_feed = config.server.push_feed_enabled,
        push_feed_port = config.server.push_feed_port,
        health_port = config.server.health_port,
        home = %config.home.display(),
        "Configuration loaded"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}
