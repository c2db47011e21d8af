//! Native host side of the wire contract.
//!
//! A host binary wires its TPM code into a [`QueryHandler`] and runs
//! [`NativeHost::serve`] over stdin/stdout.

// ============================================================================
// Submodules
// ============================================================================

/// Operation seam.
pub mod handler;

/// Serve loop.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use handler::{HandlerError, HandlerResult, QueryHandler};
pub use server::NativeHost;
