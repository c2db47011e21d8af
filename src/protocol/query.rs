//! Query message types.
//!
//! A query is a JSON object whose `query` field selects the host
//! operation. The remaining fields depend on the operation:
//!
//! | Discriminator | Required fields |
//! |---------------|-----------------|
//! | `get-ak-pub` | none |
//! | `get-tpm-quote` | `pcrs` |
//! | `verify-tpm-quote` | `pcrs`, `nonce`, `attestation`, `signature`, `ak-pub` |
//!
//! Unknown extra fields are allowed and are forwarded untouched when the
//! original JSON value is sent.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

use super::DISCRIMINATOR_FIELD;
use super::reply::Quote;

// ============================================================================
// QueryKind
// ============================================================================

/// Operation selected by a query's `query` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueryKind {
    /// Fetch the attestation key's public half.
    GetAkPub,
    /// Ask the TPM for a quote over a set of PCRs.
    GetTpmQuote,
    /// Verify a quote against the expected measurements.
    VerifyTpmQuote,
}

impl QueryKind {
    /// All known discriminators.
    pub const ALL: [Self; 3] = [Self::GetAkPub, Self::GetTpmQuote, Self::VerifyTpmQuote];

    /// Returns the wire discriminator.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::GetAkPub => "get-ak-pub",
            Self::GetTpmQuote => "get-tpm-quote",
            Self::VerifyTpmQuote => "verify-tpm-quote",
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::invalid_query(format!("unknown query `{s}`")))
    }
}

// ============================================================================
// VerifyRequest
// ============================================================================

/// Inputs of a `verify-tpm-quote` query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyRequest {
    /// PCR indices covered by the quote.
    pub pcrs: Vec<u32>,

    /// Nonce the quote was taken over.
    pub nonce: Vec<u8>,

    /// Raw TPM attestation structure.
    pub attestation: Vec<u8>,

    /// Signature over the attestation.
    pub signature: Vec<u8>,

    /// PEM-encoded attestation key public half.
    #[serde(rename = "ak-pub")]
    pub ak_pub: String,
}

impl VerifyRequest {
    /// Builds a verify request from a quote returned by `get-tpm-quote`.
    #[must_use]
    pub fn from_quote(pcrs: Vec<u32>, quote: Quote, ak_pub: impl Into<String>) -> Self {
        Self {
            pcrs,
            nonce: quote.nonce,
            attestation: quote.attestation,
            signature: quote.signature,
            ak_pub: ak_pub.into(),
        }
    }
}

// ============================================================================
// Query
// ============================================================================

/// A validated query, one variant per host operation.
///
/// # Format
///
/// ```json
/// { "query": "get-tpm-quote", "pcrs": [0, 1, 7] }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "query", rename_all = "kebab-case")]
pub enum Query {
    /// `get-ak-pub`
    GetAkPub,

    /// `get-tpm-quote`
    GetTpmQuote {
        /// PCR indices to quote.
        pcrs: Vec<u32>,
    },

    /// `verify-tpm-quote`
    VerifyTpmQuote(VerifyRequest),
}

impl Query {
    /// Returns the discriminator of this query.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> QueryKind {
        match self {
            Self::GetAkPub => QueryKind::GetAkPub,
            Self::GetTpmQuote { .. } => QueryKind::GetTpmQuote,
            Self::VerifyTpmQuote(_) => QueryKind::VerifyTpmQuote,
        }
    }

    /// Validates a JSON value as a query.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidQuery`] if the value is not an object, has no
    /// string `query` field, names an unknown operation, or lacks fields
    /// the operation requires.
    pub fn from_value(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| Error::invalid_query("query must be a JSON object"))?;

        let kind: QueryKind = object
            .get(DISCRIMINATOR_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::invalid_query("missing string field `query`"))?
            .parse()?;

        Self::deserialize(value).map_err(|e| Error::invalid_query(format!("{kind}: {e}")))
    }

    /// Serializes the query to its wire form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

// ============================================================================
// Tests
// ============================================================================
