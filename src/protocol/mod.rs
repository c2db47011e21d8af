//! Native-messaging protocol message types.
//!
//! This module defines the messages exchanged between the bridge and the
//! attestation host, and the framing that carries them.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | [`Query`] | Bridge → Host | Operation request, keyed by `query` |
//! | [`Reply`] | Host → Bridge | Operation result, shape depends on `query` |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `framing` | Length-prefixed JSON codec |
//! | `query` | Query discriminators and validation |
//! | `reply` | Typed reply views |

// ============================================================================
// Submodules
// ============================================================================

/// Length-prefixed JSON codec.
pub mod framing;

/// Query message types.
pub mod query;

/// Reply message types.
pub mod reply;

// ============================================================================
// Constants
// ============================================================================

/// Field holding the operation discriminator.
pub const DISCRIMINATOR_FIELD: &str = "query";

/// Field carrying the correlation ID in request-id mode.
pub const REQUEST_ID_FIELD: &str = "request-id";

// ============================================================================
// Re-exports
// ============================================================================

pub use framing::{
    Frame, MAX_BROWSER_MESSAGE, MAX_HOST_MESSAGE, read_frame, read_message, write_frame,
    write_message,
};
pub use query::{Query, QueryKind, VerifyRequest};
pub use reply::{Quote, Reply, Verdict};
