//! Host-side operation seam.
//!
//! The TPM work lives behind [`QueryHandler`]; the serve loop only deals
//! with framing, validation and reply shapes.

// ============================================================================
// Imports
// ============================================================================

use std::error::Error as StdError;
use std::result::Result as StdResult;

use async_trait::async_trait;

use crate::protocol::{Quote, Verdict, VerifyRequest};

// ============================================================================
// Types
// ============================================================================

/// Error a handler reports back to the browser as a message.
pub type HandlerError = Box<dyn StdError + Send + Sync>;

/// Result type for handler operations.
pub type HandlerResult<T> = StdResult<T, HandlerError>;

// ============================================================================
// QueryHandler
// ============================================================================

/// Implements the attestation operations a native host offers.
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use attester_bridge::host::{HandlerResult, QueryHandler};
/// use attester_bridge::protocol::{Quote, Verdict, VerifyRequest};
///
/// struct Fixed;
///
/// #[async_trait]
/// impl QueryHandler for Fixed {
///     async fn get_ak_pub(&self) -> HandlerResult<String> {
///         Ok("AABB".to_string())
///     }
///
///     async fn get_tpm_quote(&self, _pcrs: &[u32]) -> HandlerResult<Quote> {
///         Ok(Quote::default())
///     }
///
///     async fn verify_tpm_quote(&self, _request: &VerifyRequest) -> HandlerResult<Verdict> {
///         Ok(Verdict::legit("quote verified"))
///     }
/// }
/// ```
#[async_trait]
pub trait QueryHandler: Send + Sync {
    /// Returns the attestation key public half (PEM).
    async fn get_ak_pub(&self) -> HandlerResult<String>;

    /// Takes a quote over `pcrs` with a fresh nonce.
    async fn get_tpm_quote(&self, pcrs: &[u32]) -> HandlerResult<Quote>;

    /// Verifies a quote against the given key.
    ///
    /// An error or panic here is reported as a rejected verdict.
    async fn verify_tpm_quote(&self, request: &VerifyRequest) -> HandlerResult<Verdict>;
}
