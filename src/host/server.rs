//! Native host serve loop.
//!
//! Reads queries from the browser, dispatches them to a [`QueryHandler`]
//! and writes one reply per query, in order.
//!
//! # Reply Shapes
//!
//! | Outcome | Reply |
//! |---------|-------|
//! | Success | operation fields + echoed `query` |
//! | Verify error or panic | `{"query": .., "is-legit": false, "message": ..}` |
//! | Other failure | `{"query": .., "message": ..}` |
//!
//! A `request-id` field on the query is echoed on the reply.

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::protocol::{
    DISCRIMINATOR_FIELD, Frame, MAX_BROWSER_MESSAGE, MAX_HOST_MESSAGE, Query, REQUEST_ID_FIELD,
    Reply, Verdict, VerifyRequest, read_frame, write_frame, write_message,
};

use super::handler::QueryHandler;

// ============================================================================
// NativeHost
// ============================================================================

/// Serves attestation queries over a native-messaging stream.
///
/// # Example
///
/// ```no_run
/// # use attester_bridge::host::{NativeHost, QueryHandler};
/// # async fn example(handler: impl QueryHandler) -> attester_bridge::Result<()> {
/// let host = NativeHost::new(handler);
/// host.serve(tokio::io::stdin(), tokio::io::stdout()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct NativeHost<H> {
    handler: H,
}

impl<H: QueryHandler> NativeHost<H> {
    /// Creates a host around `handler`.
    #[inline]
    #[must_use]
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    /// Returns the handler.
    #[inline]
    #[must_use]
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Serves queries until the browser closes the stream.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the stream fails or ends inside a frame
    /// - [`Error::FrameTooLarge`] if the browser sends more than 64 MiB
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!("Native host serving");
        let mut served: u64 = 0;

        while let Some(body) = read_frame(&mut reader, MAX_BROWSER_MESSAGE).await? {
            let reply = match serde_json::from_slice::<Value>(&body) {
                Ok(message) => self.handle(message).await,
                Err(e) => {
                    warn!(error = %e, len = body.len(), "Malformed message from browser");
                    json!({ "message": format!("malformed message: {e}") })
                }
            };

            write_reply(&mut writer, reply).await?;
            served += 1;
        }

        info!(served, "Browser closed the channel");
        Ok(())
    }

    /// Produces the reply to one inbound message.
    pub async fn handle(&self, message: Value) -> Value {
        let mut reply = match Query::from_value(&message) {
            Ok(query) => self.dispatch(query).await,
            Err(e) => {
                warn!(error = %e, "Invalid query");
                json!({ "message": e.to_string() })
            }
        };

        if let Some(object) = reply.as_object_mut() {
            for field in [DISCRIMINATOR_FIELD, REQUEST_ID_FIELD] {
                if let Some(value) = message.get(field) {
                    object.insert(field.to_string(), value.clone());
                }
            }
        }

        reply
    }

    async fn dispatch(&self, query: Query) -> Value {
        let kind = query.kind();
        debug!(%kind, "Dispatching query");

        let outcome = match query {
            Query::GetAkPub => self.handler.get_ak_pub().await.map(Reply::AkPub),
            Query::GetTpmQuote { pcrs } => {
                self.handler.get_tpm_quote(&pcrs).await.map(Reply::Quote)
            }
            Query::VerifyTpmQuote(request) => Ok(Reply::Verdict(self.verify(&request).await)),
        };

        let encoded = outcome
            .map_err(|e| e.to_string())
            .and_then(|reply| reply.to_value().map_err(|e| e.to_string()));

        match encoded {
            Ok(value) => value,
            Err(message) => {
                warn!(%kind, error = %message, "Query failed");
                json!({ "message": message })
            }
        }
    }

    async fn verify(&self, request: &VerifyRequest) -> Verdict {
        let outcome = AssertUnwindSafe(self.handler.verify_tpm_quote(request))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => {
                warn!(error = %e, "Quote verification failed");
                Verdict::rejected(e.to_string())
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(%message, "Quote verifier panicked");
                Verdict::rejected(message)
            }
        }
    }
}

/// Writes a reply, substituting an error when it exceeds 1 MiB.
async fn write_reply<W>(writer: &mut W, reply: Value) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    match Frame::encode(&reply, MAX_HOST_MESSAGE) {
        Ok(frame) => write_frame(writer, &frame).await,
        Err(e @ Error::FrameTooLarge { .. }) => {
            warn!(error = %e, "Reply too large for the browser");

            let mut fallback = json!({ "message": e.to_string() });
            for field in [DISCRIMINATOR_FIELD, REQUEST_ID_FIELD] {
                if let Some(value) = reply.get(field) {
                    fallback[field] = value.clone();
                }
            }
            write_message(writer, &fallback, MAX_HOST_MESSAGE).await
        }
        Err(e) => Err(e),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "quote verification panicked".to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use tokio::io::duplex;

    use crate::bridge::{BridgeOptions, NativeBridge};
    use crate::host::HandlerResult;
    use crate::protocol::{Quote, read_message};

    struct TestHandler {
        ak_pub: String,
    }

    impl Default for TestHandler {
        fn default() -> Self {
            Self {
                ak_pub: "AABB".to_string(),
            }
        }
    }

    #[async_trait]
    impl QueryHandler for TestHandler {
        async fn get_ak_pub(&self) -> HandlerResult<String> {
            Ok(self.ak_pub.clone())
        }

        async fn get_tpm_quote(&self, pcrs: &[u32]) -> HandlerResult<Quote> {
            if pcrs.is_empty() {
                return Err("no PCRs selected".into());
            }
            Ok(Quote {
                nonce: vec![1; 32],
                attestation: vec![2, 3],
                signature: vec![4],
            })
        }

        async fn verify_tpm_quote(&self, request: &VerifyRequest) -> HandlerResult<Verdict> {
            match request.ak_pub.as_str() {
                "panic" => panic!("verifier exploded"),
                "error" => Err("bad key".into()),
                _ if request.pcrs.contains(&7) => Ok(Verdict::rejected("PCR mismatch")),
                _ => Ok(Verdict::legit("quote verified")),
            }
        }
    }

    fn verify_query(ak_pub: &str, pcrs: &[u32]) -> Value {
        json!({
            "query": "verify-tpm-quote",
            "pcrs": pcrs,
            "nonce": [1, 2],
            "attestation": [3],
            "signature": [4],
            "ak-pub": ak_pub,
        })
    }

    #[tokio::test]
    async fn test_get_ak_pub_echoes_query() {
        let host = NativeHost::new(TestHandler::default());
        let reply = host.handle(json!({ "query": "get-ak-pub" })).await;
        assert_eq!(reply, json!({ "query": "get-ak-pub", "ak-pub": "AABB" }));
    }

    #[tokio::test]
    async fn test_request_id_is_echoed() {
        let host = NativeHost::new(TestHandler::default());
        let reply = host
            .handle(json!({ "query": "get-ak-pub", "request-id": "abc" }))
            .await;
        assert_eq!(reply["request-id"], "abc");
    }

    #[tokio::test]
    async fn test_quote_bytes_are_number_arrays() {
        let host = NativeHost::new(TestHandler::default());
        let reply = host
            .handle(json!({ "query": "get-tpm-quote", "pcrs": [0, 7] }))
            .await;

        assert_eq!(reply["query"], "get-tpm-quote");
        assert_eq!(reply["nonce"].as_array().map(Vec::len), Some(32));
        assert_eq!(reply["attestation"], json!([2, 3]));
        assert_eq!(reply["signature"], json!([4]));
    }

    #[tokio::test]
    async fn test_handler_error_becomes_message() {
        let host = NativeHost::new(TestHandler::default());
        let reply = host
            .handle(json!({ "query": "get-tpm-quote", "pcrs": [] }))
            .await;
        assert_eq!(
            reply,
            json!({ "query": "get-tpm-quote", "message": "no PCRs selected" })
        );
    }

    #[tokio::test]
    async fn test_invalid_query_becomes_message() {
        let host = NativeHost::new(TestHandler::default());

        let reply = host.handle(json!({ "query": "get-tpm-quote" })).await;
        assert_eq!(reply["query"], "get-tpm-quote");
        assert!(reply["message"].is_string());

        let reply = host.handle(json!({ "query": "reboot" })).await;
        assert_eq!(reply["query"], "reboot");
        assert!(reply["message"].is_string());

        let reply = host.handle(json!(42)).await;
        assert!(reply["message"].is_string());
    }

    #[tokio::test]
    async fn test_verify_outcomes() {
        let host = NativeHost::new(TestHandler::default());

        let reply = host.handle(verify_query("key", &[0])).await;
        assert_eq!(reply["is-legit"], true);

        let reply = host.handle(verify_query("key", &[7])).await;
        assert_eq!(reply["is-legit"], false);
        assert_eq!(reply["message"], "PCR mismatch");
    }

    #[tokio::test]
    async fn test_verify_error_is_rejected_verdict() {
        let host = NativeHost::new(TestHandler::default());
        let reply = host.handle(verify_query("error", &[0])).await;
        assert_eq!(
            reply,
            json!({ "query": "verify-tpm-quote", "is-legit": false, "message": "bad key" })
        );
    }

    #[tokio::test]
    async fn test_verify_panic_is_rejected_verdict() {
        let host = NativeHost::new(TestHandler::default());
        let reply = host.handle(verify_query("panic", &[0])).await;
        assert_eq!(reply["is-legit"], false);
        assert_eq!(reply["message"], "verifier exploded");
    }

    #[tokio::test]
    async fn test_serve_replies_in_order_until_eof() {
        let host = NativeHost::new(TestHandler::default());
        let (mut browser, host_io) = duplex(64 * 1024);
        let (host_reader, host_writer) = tokio::io::split(host_io);

        let serve = tokio::spawn(async move { host.serve(host_reader, host_writer).await });

        write_message(&mut browser, &json!({ "query": "get-ak-pub" }), MAX_BROWSER_MESSAGE)
            .await
            .expect("write");
        write_message(
            &mut browser,
            &json!({ "query": "get-tpm-quote", "pcrs": [] }),
            MAX_BROWSER_MESSAGE,
        )
        .await
        .expect("write");

        let first = read_message(&mut browser, MAX_HOST_MESSAGE)
            .await
            .expect("read")
            .expect("reply");
        let second = read_message(&mut browser, MAX_HOST_MESSAGE)
            .await
            .expect("read")
            .expect("reply");
        assert_eq!(first["ak-pub"], "AABB");
        assert_eq!(second["message"], "no PCRs selected");

        drop(browser);
        serve.await.expect("join").expect("serve");
    }

    #[tokio::test]
    async fn test_serve_answers_non_json() {
        let host = NativeHost::new(TestHandler::default());
        let (mut browser, host_io) = duplex(64 * 1024);
        let (host_reader, host_writer) = tokio::io::split(host_io);

        tokio::spawn(async move { host.serve(host_reader, host_writer).await });

        let frame = Frame::encode(&json!("x"), MAX_BROWSER_MESSAGE).expect("encode");
        let mut raw = frame.as_bytes().to_vec();
        // Replace the JSON body `"x"` with bytes that are not JSON
        let len = raw.len();
        raw[len - 3..].copy_from_slice(b"{{{");
        tokio::io::AsyncWriteExt::write_all(&mut browser, &raw)
            .await
            .expect("write");

        let reply = read_message(&mut browser, MAX_HOST_MESSAGE)
            .await
            .expect("read")
            .expect("reply");
        assert!(reply["message"].as_str().is_some_and(|m| m.contains("malformed")));
    }

    #[tokio::test]
    async fn test_oversized_reply_is_replaced() {
        let host = NativeHost::new(TestHandler {
            ak_pub: "A".repeat(MAX_HOST_MESSAGE + 1),
        });
        let (mut browser, host_io) = duplex(64 * 1024);
        let (host_reader, host_writer) = tokio::io::split(host_io);

        tokio::spawn(async move { host.serve(host_reader, host_writer).await });

        write_message(&mut browser, &json!({ "query": "get-ak-pub" }), MAX_BROWSER_MESSAGE)
            .await
            .expect("write");

        let reply = read_message(&mut browser, MAX_HOST_MESSAGE)
            .await
            .expect("read")
            .expect("reply");
        assert_eq!(reply["query"], "get-ak-pub");
        assert!(reply["message"].is_string());
        assert!(reply.get("ak-pub").is_none());
    }

    #[tokio::test]
    async fn test_bridge_round_trip_against_host() {
        let (bridge_io, host_io) = duplex(64 * 1024);
        let (bridge_reader, bridge_writer) = tokio::io::split(bridge_io);
        let (host_reader, host_writer) = tokio::io::split(host_io);

        let host = NativeHost::new(TestHandler::default());
        tokio::spawn(async move { host.serve(host_reader, host_writer).await });

        let bridge = NativeBridge::from_io(bridge_reader, bridge_writer, BridgeOptions::new());

        assert_eq!(bridge.get_ak_pub().await.expect("ak-pub"), "AABB");

        let quote = bridge.get_tpm_quote(vec![0, 1]).await.expect("quote");
        assert_eq!(quote.nonce.len(), 32);

        let request = VerifyRequest::from_quote(vec![7], quote, "key");
        let verdict = bridge.verify_tpm_quote(request).await.expect("verdict");
        assert!(!verdict.is_legit);
        assert_eq!(verdict.message, "PCR mismatch");

        bridge.close().await;
    }
}
