//! Transport channel to a native host.
//!
//! A [`Channel`] wraps one bidirectional, ordered, message-oriented pipe to
//! exactly one host process. It spawns two tokio tasks:
//!
//! - **reader**: decodes frames from the host and hands each message to
//!   the registered message handler, in arrival order
//! - **writer**: drains the outgoing queue and writes frames in send order
//!
//! # Lifecycle
//!
//! ```text
//! Unconnected ──open──► Connected ──EOF / error / shutdown──► Disconnected
//! ```
//!
//! The disconnect handler runs at most once. After it has run, every
//! `send` fails with [`Error::NoConnection`]. There is no reconnection.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::protocol::framing::{
    Frame, MAX_BROWSER_MESSAGE, MAX_HOST_MESSAGE, read_frame, write_frame,
};

use super::launcher::{HostSource, ProcessGuard};
use super::manifest::Browser;

// ============================================================================
// Constants
// ============================================================================

/// Time the host gets to exit after its stdin is closed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

// ============================================================================
// Types
// ============================================================================

/// Message handler callback type.
///
/// Called once per inbound message, in arrival order.
/// Return `Some(Frame)` to have the reader queue a frame for the host.
pub type MessageHandler = Box<dyn Fn(Value) -> Option<Frame> + Send + Sync>;

/// Callback for a frame whose body is not JSON.
///
/// Receives an [`Error::Protocol`] describing the frame. The stream stays
/// usable. Return `Some(Frame)` to have the reader queue a frame for the host.
pub type MalformedHandler = Box<dyn Fn(Error) -> Option<Frame> + Send + Sync>;

/// Disconnect handler callback type. Runs at most once.
pub type DisconnectHandler = Box<dyn FnOnce() + Send>;

/// Lifecycle state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No host has been opened.
    Unconnected,
    /// Host is running and reachable.
    Connected,
    /// Host exited or the channel was torn down. Terminal.
    Disconnected,
}

/// Commands for the writer task.
enum Outgoing {
    /// Write a frame.
    Frame(Frame),
    /// Close the host's input and stop.
    Shutdown,
}

// ============================================================================
// ChannelShared
// ============================================================================

/// State shared between the channel handle and its tasks.
struct ChannelShared {
    state: Mutex<ChannelState>,
    message_handler: Mutex<Option<MessageHandler>>,
    malformed_handler: Mutex<Option<MalformedHandler>>,
    disconnect_handler: Mutex<Option<DisconnectHandler>>,
}

impl ChannelShared {
    fn new() -> Self {
        Self {
            state: Mutex::new(ChannelState::Connected),
            message_handler: Mutex::new(None),
            malformed_handler: Mutex::new(None),
            disconnect_handler: Mutex::new(None),
        }
    }

    /// Passes a message to the handler, if any.
    fn dispatch(&self, message: Value) -> Option<Frame> {
        let handler = self.message_handler.lock();
        match *handler {
            Some(ref handler) => handler(message),
            None => {
                warn!("Message from host with no handler registered");
                None
            }
        }
    }

    /// Reports an undecodable message to the malformed handler, if any.
    fn dispatch_malformed(&self, error: Error) -> Option<Frame> {
        let handler = self.malformed_handler.lock();
        match *handler {
            Some(ref handler) => handler(error),
            None => {
                warn!(error = %error, "Dropping non-JSON message from host");
                None
            }
        }
    }

    /// Moves to `Disconnected` and fires the disconnect handler once.
    fn mark_disconnected(&self) {
        let handler = {
            let mut state = self.state.lock();
            if *state == ChannelState::Disconnected {
                return;
            }
            *state = ChannelState::Disconnected;
            self.disconnect_handler.lock().take()
        };

        info!("Native host disconnected");

        if let Some(handler) = handler {
            handler();
        }
    }
}

// ============================================================================
// Channel
// ============================================================================

/// Bidirectional message pipe to one native host.
///
/// # Example
///
/// ```ignore
/// let channel = Channel::open(&HostSource::default(), &Browser::ALL, None)?;
/// channel.set_message_handler(Box::new(|message| {
///     println!("host says {message}");
///     None
/// }));
/// channel.send(&json!({ "query": "get-ak-pub" }))?;
/// ```
pub struct Channel {
    /// Queue feeding the writer task.
    outgoing_tx: mpsc::UnboundedSender<Outgoing>,
    /// State shared with the tasks.
    shared: Arc<ChannelShared>,
    /// Host process, when the channel owns one.
    process: Mutex<Option<ProcessGuard>>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Channel {
    /// Launches the host and connects to its stdio.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::HostNotFound`] / [`Error::InvalidHostName`] if the host
    ///   cannot be located
    /// - [`Error::ProcessLaunchFailed`] if it cannot be spawned
    /// - [`Error::Connection`] if its stdio cannot be captured
    pub fn open(source: &HostSource, browsers: &[Browser], origin: Option<&str>) -> Result<Self> {
        let resolved = source.resolve(browsers)?;
        let mut child = resolved.spawn(origin)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::connection("Native host stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::connection("Native host stdout not captured"))?;

        Ok(Self::spawn_tasks(stdout, stdin, Some(ProcessGuard::new(child))))
    }

    /// Creates a channel over an arbitrary reader/writer pair.
    ///
    /// `reader` carries host → bridge frames, `writer` bridge → host.
    /// Spawns the reader and writer tasks.
    pub fn from_io<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::spawn_tasks(reader, writer, None)
    }

    fn spawn_tasks<R, W>(reader: R, writer: W, process: Option<ProcessGuard>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(ChannelShared::new());

        tokio::spawn(Self::run_reader(
            reader,
            Arc::clone(&shared),
            outgoing_tx.downgrade(),
        ));
        tokio::spawn(Self::run_writer(writer, outgoing_rx, Arc::clone(&shared)));

        debug!("Channel connected");

        Self {
            outgoing_tx,
            shared,
            process: Mutex::new(process),
        }
    }

    /// Returns the lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ChannelState {
        *self.shared.state.lock()
    }

    /// Returns `true` while the host is reachable.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ChannelState::Connected
    }

    /// Serializes and enqueues a message for the host.
    ///
    /// Messages are delivered in call order.
    ///
    /// # Errors
    ///
    /// - [`Error::NoConnection`] if the channel is disconnected
    /// - [`Error::FrameTooLarge`] if the message exceeds 64 MiB
    pub fn send(&self, message: &Value) -> Result<()> {
        let frame = Frame::encode(message, MAX_BROWSER_MESSAGE)?;
        self.send_frame(frame)
    }

    /// Enqueues an already encoded frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoConnection`] if the channel is disconnected.
    pub fn send_frame(&self, frame: Frame) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NoConnection);
        }

        self.outgoing_tx
            .send(Outgoing::Frame(frame))
            .map_err(|_| Error::NoConnection)
    }

    /// Sets the message handler, replacing any previous one.
    pub fn set_message_handler(&self, handler: MessageHandler) {
        let mut guard = self.shared.message_handler.lock();
        *guard = Some(handler);
    }

    /// Clears the message handler.
    pub fn clear_message_handler(&self) {
        let mut guard = self.shared.message_handler.lock();
        *guard = None;
    }

    /// Sets the handler for non-JSON messages, replacing any previous one.
    ///
    /// Without one, such messages are logged and dropped.
    pub fn set_malformed_handler(&self, handler: MalformedHandler) {
        let mut guard = self.shared.malformed_handler.lock();
        *guard = Some(handler);
    }

    /// Registers the disconnect handler.
    ///
    /// If the channel is already disconnected the handler runs immediately.
    pub fn on_disconnect(&self, handler: DisconnectHandler) {
        {
            let state = self.shared.state.lock();
            if *state != ChannelState::Disconnected {
                *self.shared.disconnect_handler.lock() = Some(handler);
                return;
            }
        }

        handler();
    }

    /// Tears the channel down.
    ///
    /// Closes the host's input, fires the disconnect handler and, when the
    /// channel owns a process, waits briefly for it before killing it.
    pub async fn shutdown(&self) {
        let _ = self.outgoing_tx.send(Outgoing::Shutdown);
        self.shared.mark_disconnected();

        let process = self.process.lock().take();
        if let Some(mut process) = process {
            process.stop(SHUTDOWN_GRACE).await;
        }
    }

    /// Reader task: host → handler.
    async fn run_reader<R>(
        mut reader: R,
        shared: Arc<ChannelShared>,
        outgoing_tx: mpsc::WeakUnboundedSender<Outgoing>,
    ) where
        R: AsyncRead + Unpin,
    {
        loop {
            match read_frame(&mut reader, MAX_HOST_MESSAGE).await {
                Ok(Some(body)) => {
                    let follow_up = match serde_json::from_slice::<Value>(&body) {
                        Ok(message) => shared.dispatch(message),
                        Err(e) => {
                            warn!(error = %e, len = body.len(), "Non-JSON message from host");
                            shared.dispatch_malformed(Error::protocol(format!(
                                "Native host sent a non-JSON message: {e}"
                            )))
                        }
                    };

                    if let Some(frame) = follow_up
                        && let Some(tx) = outgoing_tx.upgrade()
                        && tx.send(Outgoing::Frame(frame)).is_err()
                    {
                        warn!("Failed to queue follow-up frame");
                    }
                }

                Ok(None) => {
                    debug!("Host closed its output");
                    break;
                }

                Err(e) => {
                    error!(error = %e, "Read from host failed");
                    break;
                }
            }
        }

        shared.mark_disconnected();
        debug!("Reader task terminated");
    }

    /// Writer task: queue → host.
    async fn run_writer<W>(
        mut writer: W,
        mut outgoing_rx: mpsc::UnboundedReceiver<Outgoing>,
        shared: Arc<ChannelShared>,
    ) where
        W: AsyncWrite + Unpin,
    {
        while let Some(command) = outgoing_rx.recv().await {
            match command {
                Outgoing::Frame(frame) => {
                    if let Err(e) = write_frame(&mut writer, &frame).await {
                        error!(error = %e, "Write to host failed");
                        break;
                    }
                }

                Outgoing::Shutdown => {
                    debug!("Shutdown command received");
                    break;
                }
            }
        }

        let _ = writer.shutdown().await;
        shared.mark_disconnected();
        debug!("Writer task terminated");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use tokio::io::{DuplexStream, duplex};
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    use crate::protocol::framing::{read_message, write_message};

    const WAIT: Duration = Duration::from_secs(5);

    /// Channel plus the host's ends of both pipes.
    fn pair() -> (Channel, DuplexStream, DuplexStream) {
        let (host_out, bridge_in) = duplex(64 * 1024);
        let (bridge_out, host_in) = duplex(64 * 1024);
        (Channel::from_io(bridge_in, bridge_out), host_out, host_in)
    }

    #[tokio::test]
    async fn test_send_reaches_host_in_order() {
        let (channel, _host_out, mut host_in) = pair();

        for i in 0..3 {
            channel.send(&json!({ "seq": i })).expect("send");
        }

        for i in 0..3 {
            let message = read_message(&mut host_in, MAX_BROWSER_MESSAGE)
                .await
                .expect("read")
                .expect("frame");
            assert_eq!(message["seq"], i);
        }
    }

    #[tokio::test]
    async fn test_inbound_messages_reach_handler() {
        let (channel, mut host_out, _host_in) = pair();
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));

        channel.set_message_handler(Box::new(move |message| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(message);
            }
            None
        }));

        write_message(&mut host_out, &json!({ "ak-pub": "AABB" }), MAX_HOST_MESSAGE)
            .await
            .expect("write");

        let received = timeout(WAIT, rx).await.expect("in time").expect("message");
        assert_eq!(received["ak-pub"], "AABB");
    }

    #[tokio::test]
    async fn test_handler_frame_is_sent() {
        let (channel, mut host_out, mut host_in) = pair();

        channel.set_message_handler(Box::new(|_| {
            Frame::encode(&json!({ "follow": "up" }), MAX_BROWSER_MESSAGE).ok()
        }));

        write_message(&mut host_out, &json!({}), MAX_HOST_MESSAGE)
            .await
            .expect("write");

        let message = timeout(WAIT, read_message(&mut host_in, MAX_BROWSER_MESSAGE))
            .await
            .expect("in time")
            .expect("read")
            .expect("frame");
        assert_eq!(message["follow"], "up");
    }

    #[tokio::test]
    async fn test_host_eof_disconnects_once() {
        let (channel, host_out, _host_in) = pair();
        let fired = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel();

        let counter = Arc::clone(&fired);
        channel.on_disconnect(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(());
        }));

        drop(host_out);
        timeout(WAIT, rx).await.expect("in time").expect("fired");

        channel.shutdown().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(channel.state(), ChannelState::Disconnected);
        assert!(matches!(channel.send(&json!({})), Err(Error::NoConnection)));
    }

    #[tokio::test]
    async fn test_on_disconnect_after_disconnect_runs_immediately() {
        let (channel, _host_out, _host_in) = pair();
        channel.shutdown().await;

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        channel.on_disconnect(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_json_frame_is_dropped() {
        let (channel, mut host_out, _host_in) = pair();
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));

        channel.set_message_handler(Box::new(move |message| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(message);
            }
            None
        }));

        let mut garbage = 3u32.to_ne_bytes().to_vec();
        garbage.extend_from_slice(b"abc");
        host_out.write_all(&garbage).await.expect("write");
        write_message(&mut host_out, &json!({ "ok": true }), MAX_HOST_MESSAGE)
            .await
            .expect("write");

        let received = timeout(WAIT, rx).await.expect("in time").expect("message");
        assert_eq!(received["ok"], true);
        assert!(channel.is_connected());
    }

    #[tokio::test]
    async fn test_non_json_frame_reaches_malformed_handler() {
        let (channel, mut host_out, mut host_in) = pair();
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));

        channel.set_malformed_handler(Box::new(move |error| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(error);
            }
            Frame::encode(&json!({ "after": "garbage" }), MAX_BROWSER_MESSAGE).ok()
        }));

        let mut garbage = 3u32.to_ne_bytes().to_vec();
        garbage.extend_from_slice(b"{{{");
        host_out.write_all(&garbage).await.expect("write");

        let error = timeout(WAIT, rx).await.expect("in time").expect("error");
        assert!(matches!(error, Error::Protocol { .. }), "{error:?}");

        let message = timeout(WAIT, read_message(&mut host_in, MAX_BROWSER_MESSAGE))
            .await
            .expect("in time")
            .expect("read")
            .expect("frame");
        assert_eq!(message["after"], "garbage");
        assert!(channel.is_connected());
    }

    #[tokio::test]
    async fn test_oversized_host_frame_disconnects() {
        let (channel, mut host_out, _host_in) = pair();
        let (tx, rx) = oneshot::channel();
        channel.on_disconnect(Box::new(move || {
            let _ = tx.send(());
        }));

        let prefix = ((MAX_HOST_MESSAGE + 1) as u32).to_ne_bytes();
        host_out.write_all(&prefix).await.expect("write");

        timeout(WAIT, rx).await.expect("in time").expect("fired");
        assert_eq!(channel.state(), ChannelState::Disconnected);
    }

    #[tokio::test]
    async fn test_shutdown_closes_host_input() {
        let (channel, _host_out, mut host_in) = pair();

        channel.shutdown().await;

        let next = timeout(WAIT, read_message(&mut host_in, MAX_BROWSER_MESSAGE))
            .await
            .expect("in time")
            .expect("clean eof");
        assert!(next.is_none());
    }
}
