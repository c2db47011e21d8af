//! Response rendering and the display log.
//!
//! Responses are rendered into labelled text fields when they have the
//! shape their query returns. Byte fields are shown as base64 and verdicts
//! as an `OK`/`KO` indicator. The compact JSON text is always kept.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;

use crate::protocol::{QueryKind, Reply};

// ============================================================================
// Status
// ============================================================================

/// Verification indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Quote verified.
    Ok,
    /// Quote rejected.
    Ko,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("OK"),
            Self::Ko => f.write_str("KO"),
        }
    }
}

// ============================================================================
// RenderedResponse
// ============================================================================

/// A response prepared for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedResponse {
    kind: Option<QueryKind>,
    fields: Vec<(String, String)>,
    status: Option<Status>,
    raw: String,
}

impl RenderedResponse {
    /// Renders `response` as the answer to a `kind` query.
    #[must_use]
    pub fn render(kind: Option<QueryKind>, response: &Value) -> Self {
        let mut rendered = Self {
            kind,
            fields: Vec::new(),
            status: None,
            raw: response.to_string(),
        };

        match kind.and_then(|kind| Reply::from_value(kind, response).ok()) {
            Some(Reply::AkPub(ak_pub)) => rendered.push("ak-pub", ak_pub),

            Some(Reply::Quote(quote)) => {
                rendered.push("nonce", STANDARD.encode(&quote.nonce));
                rendered.push("attestation", STANDARD.encode(&quote.attestation));
                rendered.push("signature", STANDARD.encode(&quote.signature));
            }

            Some(Reply::Verdict(verdict)) => {
                rendered.status = Some(if verdict.is_legit { Status::Ok } else { Status::Ko });
                rendered.push("message", verdict.message);
            }

            None => {
                if let Some(message) = response.get("message").and_then(Value::as_str) {
                    rendered.push("message", message);
                }
            }
        }

        rendered
    }

    fn push(&mut self, name: &str, value: impl Into<String>) {
        self.fields.push((name.to_string(), value.into()));
    }

    /// Returns the query this response answers, when known.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> Option<QueryKind> {
        self.kind
    }

    /// Returns a rendered field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }

    /// Returns all rendered fields in display order.
    #[inline]
    #[must_use]
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// Returns the verification indicator, for verdicts.
    #[inline]
    #[must_use]
    pub fn status(&self) -> Option<Status> {
        self.status
    }

    /// Returns the compact JSON text of the response.
    #[inline]
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for RenderedResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Some(kind) => write!(f, "{kind}")?,
            None => f.write_str("response")?,
        }
        if let Some(status) = self.status {
            write!(f, " [{status}]")?;
        }
        writeln!(f)?;

        for (name, value) in &self.fields {
            writeln!(f, "  {name}: {value}")?;
        }
        write!(f, "  raw: {}", self.raw)
    }
}

// ============================================================================
// DisplayLog
// ============================================================================

/// Rendered responses in submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayLog {
    entries: Vec<RenderedResponse>,
}

impl DisplayLog {
    /// Creates an empty log.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry and returns it.
    pub fn push(&mut self, entry: RenderedResponse) -> &RenderedResponse {
        let index = self.entries.len();
        self.entries.push(entry);
        &self.entries[index]
    }

    /// Returns all entries, oldest first.
    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[RenderedResponse] {
        &self.entries
    }

    /// Returns the newest entry.
    #[inline]
    #[must_use]
    pub fn last(&self) -> Option<&RenderedResponse> {
        self.entries.last()
    }

    /// Returns the number of entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing has been logged.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
