//! Error types for the attester bridge.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use attester_bridge::{NativeBridge, Result};
//! use serde_json::json;
//!
//! async fn example(bridge: &NativeBridge) -> Result<()> {
//!     let reply = bridge.request(json!({ "query": "get-ak-pub" })).await?;
//!     println!("{reply}");
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidHostName`] |
//! | Connection | [`Error::HostNotFound`], [`Error::ProcessLaunchFailed`], [`Error::Connection`], [`Error::NoConnection`] |
//! | Query | [`Error::MalformedQuery`], [`Error::InvalidQuery`] |
//! | Protocol | [`Error::Protocol`], [`Error::FrameTooLarge`], [`Error::TooManyPending`] |
//! | Execution | [`Error::RequestTimeout`] |
//! | External | [`Error::Io`], [`Error::Json`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::path::PathBuf;
use std::result::Result as StdResult;

use thiserror::Error;

use crate::identifiers::RequestId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when bridge options or a host manifest are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Native host name violates the browser naming rule.
    #[error("Invalid native host name: {name}")]
    InvalidHostName {
        /// The rejected name.
        name: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// No manifest or binary could be located for the host.
    #[error("Native host not found: {name}")]
    HostNotFound {
        /// Host name or path that was looked up.
        name: String,
    },

    /// Failed to spawn the native host process.
    #[error("Failed to launch native host {path}: {message}")]
    ProcessLaunchFailed {
        /// Executable that failed to start.
        path: PathBuf,
        /// Description of the launch failure.
        message: String,
    },

    /// Channel could not be set up.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// The channel is disconnected (or was never opened).
    ///
    /// Returned for requests issued after disconnect and for requests
    /// still pending when the disconnect happened.
    #[error("No connection to native host")]
    NoConnection,

    // ========================================================================
    // Query Errors
    // ========================================================================
    /// User input is not valid JSON.
    #[error("Malformed query: {message}")]
    MalformedQuery {
        /// Parser error message.
        message: String,
    },

    /// JSON input does not describe a known query.
    #[error("Invalid query: {message}")]
    InvalidQuery {
        /// Description of what is wrong with the query.
        message: String,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation or unexpected message shape.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// A frame exceeds the native-messaging size limit.
    #[error("Frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge {
        /// Announced or actual frame length.
        len: usize,
        /// Limit for this direction.
        max: usize,
    },

    /// Too many requests in flight or queued.
    #[error("Too many pending requests: {pending}/{max}")]
    TooManyPending {
        /// Requests currently tracked by the bridge.
        pending: usize,
        /// Configured limit.
        max: usize,
    },

    // ========================================================================
    // Execution Errors
    // ========================================================================
    /// Request timeout.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        request_id: RequestId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid host name error.
    #[inline]
    pub fn invalid_host_name(name: impl Into<String>) -> Self {
        Self::InvalidHostName { name: name.into() }
    }

    /// Creates a host not found error.
    #[inline]
    pub fn host_not_found(name: impl Into<String>) -> Self {
        Self::HostNotFound { name: name.into() }
    }

    /// Creates a process launch failed error.
    #[inline]
    pub fn process_launch_failed(path: impl Into<PathBuf>, err: &IoError) -> Self {
        Self::ProcessLaunchFailed {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a malformed query error.
    #[inline]
    pub fn malformed_query(message: impl Into<String>) -> Self {
        Self::MalformedQuery {
            message: message.into(),
        }
    }

    /// Creates an invalid query error.
    #[inline]
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a frame too large error.
    #[inline]
    pub fn frame_too_large(len: usize, max: usize) -> Self {
        Self::FrameTooLarge { len, max }
    }

    /// Creates a too many pending error.
    #[inline]
    pub fn too_many_pending(pending: usize, max: usize) -> Self {
        Self::TooManyPending { pending, max }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: RequestId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id,
            timeout_ms,
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RequestTimeout { .. })
    }

    /// Returns `true` if the native host is unreachable.
    ///
    /// Covers both failures at open time and a lost connection.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::HostNotFound { .. }
                | Self::ProcessLaunchFailed { .. }
                | Self::Connection { .. }
                | Self::NoConnection
        )
    }

    /// Returns `true` if the error was caused by user input.
    ///
    /// Such errors are raised before anything is sent to the host.
    #[inline]
    #[must_use]
    pub fn is_query_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedQuery { .. } | Self::InvalidQuery { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
