//! Native bridge module.
//!
//! Turns the fire-and-forget transport channel into awaited requests.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`NativeBridge`] | Request/response front of one native host |
//! | [`BridgeBuilder`] | Fluent configuration builder |
//! | [`BridgeOptions`] | Timeout, correlation mode and pending limit |
//! | [`CorrelationMode`] | How replies are matched to requests |
//! | [`Requester`] | Seam used by the page client |
//!
//! # Example
//!
//! ```no_run
//! use attester_bridge::{NativeBridge, Result};
//!
//! # async fn example() -> Result<()> {
//! let bridge = NativeBridge::builder().connect().await?;
//!
//! let ak_pub = bridge.get_ak_pub().await?;
//! let quote = bridge.get_tpm_quote(vec![0, 1, 7]).await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for bridge configuration.
pub mod builder;

/// Core bridge implementation.
pub mod core;

/// Bridge options.
pub mod options;

/// Pending request bookkeeping.
mod correlation;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::BridgeBuilder;
pub use core::{NativeBridge, Requester};
pub use options::{BridgeOptions, CorrelationMode, DEFAULT_MAX_PENDING, DEFAULT_REQUEST_TIMEOUT};
