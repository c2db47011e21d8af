//! Page query client.
//!
//! Takes the text a user typed, turns it into a query, sends it through a
//! [`Requester`] and appends the rendered response to a [`DisplayLog`].
//!
//! # Example
//!
//! ```no_run
//! use attester_bridge::{NativeBridge, QueryClient};
//!
//! # async fn example() -> attester_bridge::Result<()> {
//! let bridge = NativeBridge::builder().connect().await?;
//! let mut client = QueryClient::new(bridge);
//!
//! let rendered = client.submit(r#"{"query":"get-ak-pub"}"#).await?;
//! println!("{rendered}");
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;
use tracing::debug;

use crate::bridge::{NativeBridge, Requester};
use crate::error::{Error, Result};
use crate::protocol::{Query, QueryKind};

use super::render::{DisplayLog, RenderedResponse};

// ============================================================================
// Parsing
// ============================================================================

/// Parses and validates user input as a query.
///
/// Returns the discriminator and the parsed value, which keeps any extra
/// fields the user typed.
///
/// # Errors
///
/// - [`Error::MalformedQuery`] if `raw` is not JSON
/// - [`Error::InvalidQuery`] if it is not a well-formed query
pub fn parse_query(raw: &str) -> Result<(QueryKind, Value)> {
    let value: Value =
        serde_json::from_str(raw.trim()).map_err(|e| Error::malformed_query(e.to_string()))?;

    let kind = Query::from_value(&value)?.kind();
    Ok((kind, value))
}

// ============================================================================
// QueryClient
// ============================================================================

/// Submits user queries and keeps the rendered responses.
#[derive(Debug)]
pub struct QueryClient<R = NativeBridge> {
    requester: R,
    log: DisplayLog,
}

impl<R: Requester> QueryClient<R> {
    /// Creates a client over `requester`.
    #[inline]
    #[must_use]
    pub fn new(requester: R) -> Self {
        Self {
            requester,
            log: DisplayLog::new(),
        }
    }

    /// Submits one line of user input.
    ///
    /// Input that fails to parse or validate never reaches the requester.
    ///
    /// # Errors
    ///
    /// - [`Error::MalformedQuery`] / [`Error::InvalidQuery`] for bad input
    /// - Any error from the requester
    pub async fn submit(&mut self, raw: &str) -> Result<&RenderedResponse> {
        let (kind, query) = parse_query(raw)?;
        debug!(%kind, "Submitting query");

        let response = self.requester.request(query).await?;
        Ok(self.log.push(RenderedResponse::render(Some(kind), &response)))
    }

    /// Returns the display log.
    #[inline]
    #[must_use]
    pub fn log(&self) -> &DisplayLog {
        &self.log
    }

    /// Returns the display log for editing.
    #[inline]
    pub fn log_mut(&mut self) -> &mut DisplayLog {
        &mut self.log
    }

    /// Returns the requester.
    #[inline]
    #[must_use]
    pub fn requester(&self) -> &R {
        &self.requester
    }

    /// Consumes the client and returns its requester.
    #[inline]
    #[must_use]
    pub fn into_requester(self) -> R {
        self.requester
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use serde_json::json;

    use crate::bridge::BridgeOptions;
    use crate::client::Status;

    /// Records every request and answers with a fixed response.
    struct RecordingRequester {
        response: Option<Value>,
        sent: Mutex<Vec<Value>>,
    }

    impl RecordingRequester {
        fn replying(response: Value) -> Self {
            Self {
                response: Some(response),
                sent: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                response: None,
                sent: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.sent.lock().len()
        }
    }

    #[async_trait]
    impl Requester for RecordingRequester {
        async fn request(&self, query: Value) -> Result<Value> {
            self.sent.lock().push(query);
            self.response.clone().ok_or(Error::NoConnection)
        }
    }

    #[tokio::test]
    async fn test_ak_pub_scenario() {
        let mut client = QueryClient::new(RecordingRequester::replying(json!({ "ak-pub": "AABB" })));

        let rendered = client
            .submit(r#"{"query":"get-ak-pub"}"#)
            .await
            .expect("submit");
        assert_eq!(rendered.field("ak-pub"), Some("AABB"));
        assert_eq!(client.log().len(), 1);
    }

    #[tokio::test]
    async fn test_verify_ko_scenario() {
        let mut client = QueryClient::new(RecordingRequester::replying(
            json!({ "is-legit": false, "message": "PCR mismatch" }),
        ));

        let raw = r#"{"query":"verify-tpm-quote","pcrs":[0],"nonce":[1],"attestation":[2],"signature":[3],"ak-pub":"KEY"}"#;
        let rendered = client.submit(raw).await.expect("submit");

        assert_eq!(rendered.status(), Some(Status::Ko));
        assert_eq!(rendered.field("message"), Some("PCR mismatch"));
    }

    #[tokio::test]
    async fn test_malformed_input_is_not_sent() {
        let mut client = QueryClient::new(RecordingRequester::replying(json!({})));

        let err = client.submit("{\"query\": ").await.unwrap_err();
        assert!(matches!(err, Error::MalformedQuery { .. }));
        assert_eq!(client.requester().calls(), 0);
        assert!(client.log().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_query_is_not_sent() {
        let mut client = QueryClient::new(RecordingRequester::replying(json!({})));

        for raw in [r#"{"query":"get-tpm-quote"}"#, r#"{"pcrs":[0]}"#, "[1,2]", "\"get-ak-pub\""] {
            let err = client.submit(raw).await.unwrap_err();
            assert!(matches!(err, Error::InvalidQuery { .. }), "{raw}: {err:?}");
        }
        assert_eq!(client.requester().calls(), 0);
    }

    #[tokio::test]
    async fn test_query_is_sent_verbatim() {
        let mut client = QueryClient::new(RecordingRequester::replying(json!({ "ak-pub": "AABB" })));

        client
            .submit("  {\"query\":\"get-ak-pub\",\"note\":\"keep me\"}\n")
            .await
            .expect("submit");

        let sent = client.requester().sent.lock().clone();
        assert_eq!(sent, vec![json!({ "query": "get-ak-pub", "note": "keep me" })]);
    }

    #[tokio::test]
    async fn test_request_error_is_not_logged() {
        let mut client = QueryClient::new(RecordingRequester::failing());

        let err = client.submit(r#"{"query":"get-ak-pub"}"#).await.unwrap_err();
        assert!(matches!(err, Error::NoConnection));
        assert!(client.log().is_empty());
        assert_eq!(client.into_requester().calls(), 1);
    }

    #[tokio::test]
    async fn test_detached_bridge() {
        let mut client = QueryClient::new(NativeBridge::detached(BridgeOptions::new()));

        let err = client.submit(r#"{"query":"get-ak-pub"}"#).await.unwrap_err();
        assert!(matches!(err, Error::NoConnection));
    }

    proptest! {
        #[test]
        fn prop_non_json_never_reaches_requester(raw in "\\PC{0,32}") {
            prop_assume!(serde_json::from_str::<Value>(raw.trim()).is_err());

            let mut client = QueryClient::new(RecordingRequester::replying(json!({})));
            let result = tokio_test::block_on(client.submit(&raw)).map(|_| ());

            let malformed = matches!(result, Err(Error::MalformedQuery { .. }));
            prop_assert!(malformed, "expected MalformedQuery, got {:?}", result);
            prop_assert_eq!(client.requester().calls(), 0);
        }
    }
}
