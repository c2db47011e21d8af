//! Native bridge: request/response over a native-messaging channel.
//!
//! The bridge owns one [`Channel`] and turns its fire-and-forget messages
//! into awaited requests. Replies are matched according to the configured
//! [`CorrelationMode`]; a disconnect fails everything still waiting.
//!
//! # Example
//!
//! ```no_run
//! use attester_bridge::NativeBridge;
//! use serde_json::json;
//!
//! # async fn example() -> attester_bridge::Result<()> {
//! let bridge = NativeBridge::builder()
//!     .host("com.douzebis.attester")
//!     .connect()
//!     .await?;
//!
//! let response = bridge.request(json!({ "query": "get-ak-pub" })).await?;
//! println!("{response}");
//!
//! bridge.close().await;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::{
    Frame, MAX_BROWSER_MESSAGE, Query, Quote, REQUEST_ID_FIELD, Reply, Verdict, VerifyRequest,
};
use crate::transport::{Channel, ChannelState};

use super::builder::BridgeBuilder;
use super::correlation::{Admission, Correlation};
use super::options::{BridgeOptions, CorrelationMode};

// ============================================================================
// Requester
// ============================================================================

/// Anything that can answer a raw JSON query.
///
/// [`NativeBridge`] is the production implementation; the page client is
/// generic over this trait.
#[async_trait]
pub trait Requester: Send + Sync {
    /// Sends `query` and waits for its response.
    async fn request(&self, query: Value) -> Result<Value>;
}

// ============================================================================
// NativeBridge
// ============================================================================

/// Request/response bridge to a native host.
pub struct NativeBridge {
    /// Channel to the host, `None` when the host could not be reached.
    channel: Option<Channel>,
    /// Bridge options.
    options: BridgeOptions,
    /// Pending request bookkeeping, shared with the channel handlers.
    correlation: Arc<Mutex<Correlation>>,
}

impl fmt::Debug for NativeBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeBridge")
            .field("state", &self.state())
            .field("options", &self.options)
            .field("pending", &self.pending_count())
            .finish()
    }
}

// ============================================================================
// NativeBridge - Construction
// ============================================================================

impl NativeBridge {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> BridgeBuilder {
        BridgeBuilder::new()
    }

    /// Wraps an open channel.
    ///
    /// Installs the reply router, the undecodable-reply router and the
    /// disconnect handler on `channel`.
    #[must_use]
    pub fn from_channel(channel: Channel, options: BridgeOptions) -> Self {
        let correlation = Arc::new(Mutex::new(Correlation::new(
            options.correlation,
            options.max_pending,
        )));

        let router = Arc::clone(&correlation);
        channel.set_message_handler(Box::new(move |message| router.lock().resolve(message)));

        let router = Arc::clone(&correlation);
        channel.set_malformed_handler(Box::new(move |error| router.lock().resolve_error(error)));

        let pending = Arc::clone(&correlation);
        channel.on_disconnect(Box::new(move || pending.lock().fail_all()));

        Self {
            channel: Some(channel),
            options,
            correlation,
        }
    }

    /// Creates a bridge over an arbitrary reader/writer pair.
    ///
    /// `reader` carries host → bridge frames, `writer` bridge → host.
    #[must_use]
    pub fn from_io<R, W>(reader: R, writer: W, options: BridgeOptions) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::from_channel(Channel::from_io(reader, writer), options)
    }

    /// Creates a bridge with no host behind it.
    ///
    /// Every request fails with [`Error::NoConnection`]. Used when the host
    /// could not be reached at startup.
    #[must_use]
    pub fn detached(options: BridgeOptions) -> Self {
        let mut correlation = Correlation::new(options.correlation, options.max_pending);
        correlation.fail_all();

        Self {
            channel: None,
            options,
            correlation: Arc::new(Mutex::new(correlation)),
        }
    }
}

// ============================================================================
// NativeBridge - Accessors
// ============================================================================

impl NativeBridge {
    /// Returns the channel lifecycle state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.channel
            .as_ref()
            .map_or(ChannelState::Unconnected, Channel::state)
    }

    /// Returns `true` while requests can be sent.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ChannelState::Connected
    }

    /// Returns the number of requests in flight plus queued.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.correlation.lock().pending()
    }

    /// Returns the bridge options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &BridgeOptions {
        &self.options
    }
}

// ============================================================================
// NativeBridge - Requests
// ============================================================================

impl NativeBridge {
    /// Sends a raw query and waits for its response with the default timeout.
    ///
    /// # Errors
    ///
    /// See [`NativeBridge::request_with_timeout`].
    pub async fn request(&self, query: Value) -> Result<Value> {
        self.request_with_timeout(query, self.options.timeout).await
    }

    /// Sends a raw query and waits for its response.
    ///
    /// In sequential mode the value is sent verbatim; in request-id mode a
    /// `request-id` field is added and stripped from the response.
    ///
    /// # Errors
    ///
    /// - [`Error::NoConnection`] if the host is unreachable or disconnects
    ///   before replying
    /// - [`Error::InvalidQuery`] if request-id mode gets a non-object query
    /// - [`Error::FrameTooLarge`] if the query exceeds 64 MiB
    /// - [`Error::TooManyPending`] if the pending limit is reached
    /// - [`Error::Protocol`] if the host answers with a non-JSON message
    /// - [`Error::RequestTimeout`] if no reply arrives in time
    ///
    /// In sequential mode, a request that times out while queued behind an
    /// earlier timed-out request tears the channel down, so later and
    /// pending requests fail with [`Error::NoConnection`].
    pub async fn request_with_timeout(
        &self,
        mut query: Value,
        request_timeout: Duration,
    ) -> Result<Value> {
        let Some(channel) = self.channel.as_ref().filter(|c| c.is_connected()) else {
            debug!("Request refused, no connection");
            return Err(Error::NoConnection);
        };

        let request_id = RequestId::generate();

        if self.options.correlation == CorrelationMode::RequestId {
            let object = query
                .as_object_mut()
                .ok_or_else(|| Error::invalid_query("query must be a JSON object"))?;
            object.insert(
                REQUEST_ID_FIELD.to_string(),
                Value::String(request_id.to_string()),
            );
        }

        let frame = Frame::encode(&query, MAX_BROWSER_MESSAGE)?;
        let (response_tx, response_rx) = oneshot::channel();

        let admission = self
            .correlation
            .lock()
            .admit(request_id, response_tx, frame)?;

        if let Admission::SendNow(frame) = admission {
            trace!(%request_id, len = frame.body_len(), "Sending request");
            channel.send_frame(frame)?;
        }

        match timeout(request_timeout, response_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::NoConnection),
            Err(_) => {
                let stalled = self.correlation.lock().abandon(request_id);
                warn!(%request_id, timeout_ms = request_timeout.as_millis() as u64, "Request timed out");

                if stalled {
                    error!("Native host stopped replying, closing channel");
                    channel.shutdown().await;
                }

                Err(Error::request_timeout(
                    request_id,
                    request_timeout.as_millis() as u64,
                ))
            }
        }
    }

    /// Sends a typed query and interprets the response.
    ///
    /// # Errors
    ///
    /// Request errors, or [`Error::Protocol`] if the response does not have
    /// the shape the operation returns.
    pub async fn query(&self, query: &Query) -> Result<Reply> {
        let response = self.request(query.to_value()?).await?;
        Reply::from_value(query.kind(), &response)
    }

    /// Fetches the attestation key public half.
    ///
    /// # Errors
    ///
    /// See [`NativeBridge::query`].
    pub async fn get_ak_pub(&self) -> Result<String> {
        match self.query(&Query::GetAkPub).await? {
            Reply::AkPub(ak_pub) => Ok(ak_pub),
            other => Err(unexpected(&other)),
        }
    }

    /// Requests a quote over `pcrs`.
    ///
    /// # Errors
    ///
    /// See [`NativeBridge::query`].
    pub async fn get_tpm_quote(&self, pcrs: Vec<u32>) -> Result<Quote> {
        match self.query(&Query::GetTpmQuote { pcrs }).await? {
            Reply::Quote(quote) => Ok(quote),
            other => Err(unexpected(&other)),
        }
    }

    /// Asks the host to verify a quote.
    ///
    /// # Errors
    ///
    /// See [`NativeBridge::query`].
    pub async fn verify_tpm_quote(&self, request: VerifyRequest) -> Result<Verdict> {
        match self.query(&Query::VerifyTpmQuote(request)).await? {
            Reply::Verdict(verdict) => Ok(verdict),
            other => Err(unexpected(&other)),
        }
    }

    /// Closes the channel and stops the host.
    ///
    /// Pending requests fail with [`Error::NoConnection`].
    pub async fn close(&self) {
        if let Some(channel) = &self.channel {
            channel.shutdown().await;
        }
        debug!("Bridge closed");
    }
}

#[async_trait]
impl Requester for NativeBridge {
    async fn request(&self, query: Value) -> Result<Value> {
        NativeBridge::request(self, query).await
    }
}

fn unexpected(reply: &Reply) -> Error {
    Error::protocol(format!("unexpected {} reply", reply.kind()))
}

// ============================================================================
// Tests
// ============================================================================
