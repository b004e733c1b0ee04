//! Domain Layer - Core gateway types and bookkeeping.
//!
//! Pure types with no I/O: market identifiers, the payload and result
//! envelopes tools produce, and the push-feed subscription registry.

/// Symbols, feed types and trading selectors.
pub mod market;

/// Vendor payload shapes and the uniform tool result.
pub mod payload;

/// Per-client subscription tracking.
pub mod subscription;
