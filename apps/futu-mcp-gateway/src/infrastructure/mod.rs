//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the OpenD adapters behind the application ports,
//! the client-facing transports and the process-level plumbing.

/// Push fan-out from the quote session to push-feed clients.
pub mod broadcast;

/// Configuration loading.
pub mod config;

/// OpenD TCP client and channel adapters.
pub mod futu;

/// Health check HTTP endpoint.
pub mod health;

/// Signal handling and ordered teardown.
pub mod lifecycle;

/// MCP server over stdio.
pub mod mcp;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Single-instance lock and stale-process sweep.
pub mod process;

/// WebSocket push feed.
pub mod push;

/// JSON-RPC envelopes.
pub mod rpc;

/// Logging, file rotation and OpenTelemetry.
pub mod telemetry;
