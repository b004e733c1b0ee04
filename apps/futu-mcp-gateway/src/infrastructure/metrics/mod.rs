//! Prometheus Metrics Module
//!
//! Exposes gateway metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Vendor**: OpenD request counts and latency by protocol id
//! - **Tools**: Tool calls by name, transport and outcome
//! - **Push**: Vendor pushes fanned out and frames dropped for slow sessions
//! - **Subscriptions**: Registry size and live push-feed sessions
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Later calls return the same handle.
///
/// # Errors
///
/// Returns an error if another recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "futu_gateway_vendor_requests_total",
        "OpenD requests by protocol id and outcome"
    );
    describe_histogram!(
        "futu_gateway_vendor_request_seconds",
        "OpenD request round-trip time"
    );

    describe_counter!(
        "futu_gateway_tool_calls_total",
        "Tool calls by name, transport and outcome"
    );
    describe_histogram!(
        "futu_gateway_tool_call_seconds",
        "Tool call duration including session setup"
    );

    describe_counter!(
        "futu_gateway_pushes_total",
        "Vendor pushes published to push-feed sessions"
    );
    describe_counter!(
        "futu_gateway_pushes_dropped_total",
        "Pushes skipped by sessions that fell behind"
    );

    describe_gauge!(
        "futu_gateway_push_sessions",
        "Connected push-feed sessions"
    );
    describe_gauge!(
        "futu_gateway_subscription_clients",
        "Clients holding at least one subscription"
    );
    describe_gauge!(
        "futu_gateway_subscription_pairs",
        "Distinct symbol and feed pairs subscribed at the vendor"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Transport a tool call arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// MCP over stdio.
    Mcp,
    /// JSON-RPC over the push-feed WebSocket.
    PushFeed,
}

impl Transport {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Mcp => "mcp",
            Self::PushFeed => "push_feed",
        }
    }
}

const fn outcome(ok: bool) -> &'static str {
    if ok { "ok" } else { "error" }
}

/// Record an OpenD request.
pub fn record_vendor_request(proto_id: u32, ok: bool, latency: Duration) {
    counter!(
        "futu_gateway_vendor_requests_total",
        "proto_id" => proto_id.to_string(),
        "outcome" => outcome(ok)
    )
    .increment(1);
    histogram!(
        "futu_gateway_vendor_request_seconds",
        "proto_id" => proto_id.to_string()
    )
    .record(latency.as_secs_f64());
}

/// Record a completed tool call.
pub fn record_tool_call(tool: &'static str, transport: Transport, ok: bool, latency: Duration) {
    counter!(
        "futu_gateway_tool_calls_total",
        "tool" => tool,
        "transport" => transport.as_str(),
        "outcome" => outcome(ok)
    )
    .increment(1);
    histogram!(
        "futu_gateway_tool_call_seconds",
        "tool" => tool
    )
    .record(latency.as_secs_f64());
}

/// Record a push handed to the fan-out channel.
pub fn record_push_delivered(feed: &'static str) {
    counter!("futu_gateway_pushes_total", "feed" => feed).increment(1);
}

/// Record pushes a lagging session skipped.
pub fn record_pushes_dropped(count: u64) {
    counter!("futu_gateway_pushes_dropped_total").increment(count);
}

/// Update the push-feed session count.
#[allow(clippy::cast_precision_loss)]
pub fn set_push_sessions(count: usize) {
    gauge!("futu_gateway_push_sessions").set(count as f64);
}

/// Update registry size gauges.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(clients: usize, pairs: usize) {
    gauge!("futu_gateway_subscription_clients").set(clients as f64);
    gauge!("futu_gateway_subscription_pairs").set(pairs as f64);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_as_str() {
        assert_eq!(Transport::Mcp.as_str(), "mcp");
        assert_eq!(Transport::PushFeed.as_str(), "push_feed");
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(outcome(true), "ok");
        assert_eq!(outcome(false), "error");
    }

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        record_vendor_request(3004, true, Duration::from_millis(3));
        record_tool_call("get_stock_quote", Transport::Mcp, false, Duration::ZERO);
        set_subscriptions(1, 2);
    }
}
