//! OpenD Adapter
//!
//! Speaks the OpenD TCP protocol (JSON body format) and implements the
//! quote, trade and connector ports on top of it.
//!
//! # Modules
//!
//! - `protocol` - Protocol ids and frame constants
//! - `codec` - Frame header encoding and digest verification
//! - `messages` - Request bodies, reply flattening, push decoding
//! - `keepalive` - Keep-alive scheduling
//! - `client` - Multiplexed request/reply session
//! - `quote` / `trade` - Port implementations
//! - `connector` - Session factory

pub mod client;
pub mod codec;
pub mod connector;
pub mod keepalive;
pub mod messages;
pub mod protocol;
pub mod quote;
pub mod trade;

pub use client::{ClientConfig, ClientError, FutuClient};
pub use connector::FutuConnector;
pub use quote::FutuQuoteChannel;
pub use trade::FutuTradeChannel;
