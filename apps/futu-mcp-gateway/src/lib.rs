#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Futu MCP Gateway - Brokerage Tool Gateway
//!
//! Wraps a local Futu OpenD gateway and exposes its market-data and account
//! queries as tools: over MCP on stdio, and as JSON-RPC over a WebSocket
//! push feed that also forwards live quote pushes to subscribers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure gateway types
//!   - `market`: Symbols, feed types, K-line periods, trading selectors
//!   - `payload`: Vendor payload shapes and the uniform tool result
//!   - `subscription`: Per-client subscription registry
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Quote, trade and connector interfaces
//!   - `services`: Connection manager and tool dispatcher
//!   - `tools`: Tool names, parameter parsing and schemas
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `futu`: OpenD TCP client, codec and channel adapters
//!   - `mcp`: MCP stdio server
//!   - `push`: WebSocket push feed
//!   - `process`: Single-instance lock
//!   - `lifecycle`: Signal handling and teardown
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                 ┌──────────────┐     ┌────────────┐
//! MCP stdio  ────►│              │     │            │
//!                 │    Tool      │────►│  OpenD     │
//! WS push feed ──►│  Dispatcher  │     │  sessions  │
//!        ▲        └──────────────┘     └─────┬──────┘
//!        │                                   │ pushes
//!        └────────────── PushHub ◄───────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core gateway types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market::{FeedType, KlType, QotMarket, Symbol};
pub use domain::payload::{ToolResult, VendorFailure, VendorPayload};
pub use domain::subscription::{SubscriptionRegistry, SubscriptionSet, SubscriptionStats};

// Application services
pub use application::services::{ConnectionManager, ConnectionSettings, ToolDispatcher};
pub use application::tools::{ToolCall, ToolCallError};

// Infrastructure config
pub use infrastructure::config::{ConfigError, GatewayConfig, ServerSettings};

// Servers
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::mcp::McpServer;
pub use infrastructure::push::{PushFeedServer, PushFeedState};

// Process plumbing
pub use infrastructure::lifecycle::{Lifecycle, ShutdownReason};
pub use infrastructure::process::{InstanceLock, ProcessGuard};

// Push fan-out
pub use infrastructure::broadcast::{PushEvent, PushHub};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
