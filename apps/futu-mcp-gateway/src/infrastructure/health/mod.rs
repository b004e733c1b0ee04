//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, session status and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (quote session ready)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{ChannelSnapshot, ChannelState, ConnectionManager};
use crate::domain::subscription::{SubscriptionRegistry, SubscriptionStats};
use crate::infrastructure::broadcast::{PushHub, PushStats};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Gateway version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Session slots.
    pub channels: ChannelsStatus,
    /// Registry size.
    pub subscriptions: SubscriptionStats,
    /// Push fan-out counters.
    pub push: PushStats,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational.
    Healthy,
    /// Quote data available, trade session failing.
    Degraded,
    /// No quote session.
    Unhealthy,
}

/// Status of both session slots.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelsStatus {
    /// Market-data session.
    pub quote: ChannelSnapshot,
    /// Trading session.
    pub trade: ChannelSnapshot,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    connections: Arc<ConnectionManager>,
    registry: Arc<SubscriptionRegistry>,
    pushes: Arc<PushHub>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        connections: Arc<ConnectionManager>,
        registry: Arc<SubscriptionRegistry>,
        pushes: Arc<PushHub>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            connections,
            registry,
            pushes,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    state.connections.reap_closed();
    if state.connections.quote_status().state() == ChannelState::Ready {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let stats = state.registry.stats();
    crate::infrastructure::metrics::set_subscriptions(stats.client_count, stats.pair_count);

    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    state.connections.reap_closed();
    let channels = ChannelsStatus {
        quote: state.connections.quote_status().snapshot(),
        trade: state.connections.trade_status().snapshot(),
    };

    HealthResponse {
        status: determine_health_status(&channels.quote, &channels.trade),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        channels,
        subscriptions: state.registry.stats(),
        push: state.pushes.stats(),
    }
}

fn determine_health_status(quote: &ChannelSnapshot, trade: &ChannelSnapshot) -> HealthStatus {
    if quote.state != ChannelState::Ready {
        return HealthStatus::Unhealthy;
    }
    // Trade sessions are lazy; only a failed attempt degrades health.
    if trade.state != ChannelState::Ready && trade.last_error.is_some() {
        return HealthStatus::Degraded;
    }
    HealthStatus::Healthy
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(state: ChannelState, last_error: Option<&str>) -> ChannelSnapshot {
        ChannelSnapshot {
            state,
            connected_at: None,
            last_error: last_error.map(str::to_string),
            init_attempts: 1,
        }
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn quote_ready_and_trade_untouched_is_healthy() {
        let status = determine_health_status(
            &snapshot(ChannelState::Ready, None),
            &snapshot(ChannelState::Absent, None),
        );
        assert_eq!(status, HealthStatus::Healthy);
    }

    #[test]
    fn failed_trade_degrades() {
        let status = determine_health_status(
            &snapshot(ChannelState::Ready, None),
            &snapshot(ChannelState::Absent, Some("no trading accounts")),
        );
        assert_eq!(status, HealthStatus::Degraded);
    }

    #[test]
    fn missing_quote_is_unhealthy() {
        let status = determine_health_status(
            &snapshot(ChannelState::Initializing, None),
            &snapshot(ChannelState::Ready, None),
        );
        assert_eq!(status, HealthStatus::Unhealthy);
    }
}
