//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with the brokerage gateway.

/// Port interfaces for the brokerage gateway.
pub mod ports;

/// Connection management and tool dispatch.
pub mod services;

/// Tool names, parameters and schemas.
pub mod tools;
