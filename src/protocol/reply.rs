//! Reply message types.
//!
//! The host answers every query with a single JSON object. Its shape
//! depends on the originating discriminator:
//!
//! Success for `get-ak-pub`:
//! ```json
//! { "query": "get-ak-pub", "ak-pub": "-----BEGIN PUBLIC KEY-----..." }
//! ```
//!
//! Success for `get-tpm-quote`:
//! ```json
//! { "query": "get-tpm-quote", "nonce": [..], "attestation": [..], "signature": [..] }
//! ```
//!
//! Verdict for `verify-tpm-quote`:
//! ```json
//! { "query": "verify-tpm-quote", "is-legit": false, "message": "PCR mismatch" }
//! ```
//!
//! There is no distinct error shape. A failed verification is an ordinary
//! verdict with `is-legit: false`.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{Error, Result};

use super::DISCRIMINATOR_FIELD;
use super::query::QueryKind;

// ============================================================================
// Quote
// ============================================================================

/// A TPM quote as returned by `get-tpm-quote`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Nonce the quote was taken over.
    pub nonce: Vec<u8>,
    /// Raw TPM attestation structure.
    pub attestation: Vec<u8>,
    /// Signature over the attestation.
    pub signature: Vec<u8>,
}

// ============================================================================
// Verdict
// ============================================================================

/// Outcome of `verify-tpm-quote`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Whether the quote matched the expected measurements.
    #[serde(rename = "is-legit")]
    pub is_legit: bool,

    /// Human-readable explanation.
    #[serde(default)]
    pub message: String,
}

impl Verdict {
    /// Creates a positive verdict.
    #[inline]
    #[must_use]
    pub fn legit(message: impl Into<String>) -> Self {
        Self {
            is_legit: true,
            message: message.into(),
        }
    }

    /// Creates a negative verdict.
    #[inline]
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            is_legit: false,
            message: message.into(),
        }
    }
}

// ============================================================================
// Reply
// ============================================================================

#[derive(Deserialize)]
struct AkPubFields {
    #[serde(rename = "ak-pub")]
    ak_pub: String,
}

/// Typed view of a host reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Attestation key public half (PEM).
    AkPub(String),
    /// Quote material.
    Quote(Quote),
    /// Verification outcome.
    Verdict(Verdict),
}

impl Reply {
    /// Interprets a raw reply according to the query that produced it.
    ///
    /// Extra fields (including the echoed discriminator) are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the reply lacks the fields the
    /// operation is expected to return.
    pub fn from_value(kind: QueryKind, value: &Value) -> Result<Self> {
        let parsed = match kind {
            QueryKind::GetAkPub => AkPubFields::deserialize(value).map(|f| Self::AkPub(f.ak_pub)),
            QueryKind::GetTpmQuote => Quote::deserialize(value).map(Self::Quote),
            QueryKind::VerifyTpmQuote => Verdict::deserialize(value).map(Self::Verdict),
        };

        parsed.map_err(|e| Error::protocol(format!("unexpected {kind} reply: {e}")))
    }

    /// Returns the operation this reply answers.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> QueryKind {
        match self {
            Self::AkPub(_) => QueryKind::GetAkPub,
            Self::Quote(_) => QueryKind::GetTpmQuote,
            Self::Verdict(_) => QueryKind::VerifyTpmQuote,
        }
    }

    /// Serializes the reply in wire form, discriminator included.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn to_value(&self) -> Result<Value> {
        let mut value = match self {
            Self::AkPub(ak_pub) => json!({ "ak-pub": ak_pub }),
            Self::Quote(quote) => serde_json::to_value(quote)?,
            Self::Verdict(verdict) => serde_json::to_value(verdict)?,
        };

        if let Some(object) = value.as_object_mut() {
            object.insert(
                DISCRIMINATOR_FIELD.to_string(),
                Value::String(self.kind().as_str().to_string()),
            );
        }

        Ok(value)
    }
}

// ============================================================================
// Tests
// ============================================================================
