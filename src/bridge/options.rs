//! Bridge behaviour options.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use attester_bridge::bridge::{BridgeOptions, CorrelationMode};
//!
//! let options = BridgeOptions::new()
//!     .with_timeout(Duration::from_secs(10))
//!     .with_correlation(CorrelationMode::RequestId)
//!     .with_max_pending(8);
//!
//! assert!(options.validate().is_ok());
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default time a request waits for its reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default limit on requests in flight plus queued.
pub const DEFAULT_MAX_PENDING: usize = 100;

// ============================================================================
// CorrelationMode
// ============================================================================

/// How replies are matched to requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CorrelationMode {
    /// One request on the wire at a time, others wait in FIFO order.
    ///
    /// The next inbound message answers the request on the wire. Works
    /// with hosts that cannot echo a correlation ID.
    #[default]
    Sequential,

    /// Each request carries a `request-id` the host must echo back.
    ///
    /// Several requests may be on the wire at once.
    RequestId,
}

// ============================================================================
// BridgeOptions
// ============================================================================

/// Bridge configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeOptions {
    /// How long a request waits for its reply.
    pub timeout: Duration,

    /// Reply matching strategy.
    pub correlation: CorrelationMode,

    /// Limit on requests in flight plus queued.
    pub max_pending: usize,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl BridgeOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            timeout: DEFAULT_REQUEST_TIMEOUT,
            correlation: CorrelationMode::Sequential,
            max_pending: DEFAULT_MAX_PENDING,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl BridgeOptions {
    /// Sets the request timeout.
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the correlation mode.
    #[inline]
    #[must_use]
    pub fn with_correlation(mut self, correlation: CorrelationMode) -> Self {
        self.correlation = correlation;
        self
    }

    /// Sets the pending request limit.
    #[inline]
    #[must_use]
    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the timeout or limit is zero.
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(Error::config("Request timeout must be greater than zero"));
        }
        if self.max_pending == 0 {
            return Err(Error::config("max_pending must be greater than zero"));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
