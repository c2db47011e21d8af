//! Request/response correlation state.
//!
//! Tracks which caller is waiting for which reply. Pure bookkeeping, no
//! I/O: the bridge feeds it admissions, inbound messages, timeouts and the
//! disconnect signal, and it tells the bridge which frame to send next.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::REQUEST_ID_FIELD;
use crate::protocol::framing::Frame;

use super::options::CorrelationMode;

// ============================================================================
// Types
// ============================================================================

/// Completion channel for one request.
pub(crate) type ResponseTx = oneshot::Sender<Result<Value>>;

/// A request waiting for the single slot.
struct Queued {
    id: RequestId,
    tx: ResponseTx,
    frame: Frame,
}

/// What the caller must do after admission.
#[derive(Debug)]
pub(crate) enum Admission {
    /// Write this frame now.
    SendNow(Frame),
    /// The frame is queued; it is sent when the slot frees.
    Queued,
}

// ============================================================================
// Correlation
// ============================================================================

/// Pending-request bookkeeping for one bridge.
pub(crate) struct Correlation {
    mode: CorrelationMode,
    max_pending: usize,
    /// Request on the wire (sequential mode).
    current: Option<(RequestId, ResponseTx)>,
    /// The request holding the slot timed out (sequential mode).
    stale: bool,
    /// Requests waiting for the slot (sequential mode).
    queue: VecDeque<Queued>,
    /// Requests on the wire keyed by ID (request-id mode).
    in_flight: FxHashMap<RequestId, ResponseTx>,
    /// Set once the channel is gone.
    closed: bool,
}

impl Correlation {
    /// Creates empty bookkeeping.
    pub(crate) fn new(mode: CorrelationMode, max_pending: usize) -> Self {
        Self {
            mode,
            max_pending,
            current: None,
            stale: false,
            queue: VecDeque::new(),
            in_flight: FxHashMap::default(),
            closed: false,
        }
    }

    /// Number of requests in flight plus queued.
    pub(crate) fn pending(&self) -> usize {
        usize::from(self.current.is_some()) + self.queue.len() + self.in_flight.len()
    }

    /// Registers a request.
    ///
    /// # Errors
    ///
    /// - [`Error::NoConnection`] after [`Correlation::fail_all`]
    /// - [`Error::TooManyPending`] when the limit is reached
    pub(crate) fn admit(&mut self, id: RequestId, tx: ResponseTx, frame: Frame) -> Result<Admission> {
        if self.closed {
            return Err(Error::NoConnection);
        }

        self.prune_dropped();

        let pending = self.pending();
        if pending >= self.max_pending {
            warn!(pending, max = self.max_pending, "Too many pending requests");
            return Err(Error::too_many_pending(pending, self.max_pending));
        }

        match self.mode {
            CorrelationMode::Sequential => {
                if self.current.is_none() {
                    self.current = Some((id, tx));
                    Ok(Admission::SendNow(frame))
                } else {
                    self.queue.push_back(Queued { id, tx, frame });
                    debug!(request_id = %id, queued = self.queue.len(), "Request queued");
                    Ok(Admission::Queued)
                }
            }

            CorrelationMode::RequestId => {
                self.in_flight.insert(id, tx);
                Ok(Admission::SendNow(frame))
            }
        }
    }

    /// Routes an inbound message to its waiting request.
    ///
    /// Returns the next queued frame to send, if the slot was freed.
    pub(crate) fn resolve(&mut self, message: Value) -> Option<Frame> {
        match self.mode {
            CorrelationMode::Sequential => self.complete_current(Ok(message)),
            CorrelationMode::RequestId => {
                self.resolve_by_id(message);
                None
            }
        }
    }

    /// Routes an inbound message that could not be decoded.
    ///
    /// In sequential mode it answers the request on the wire with `error`
    /// and frees the slot. Returns the next queued frame to send, if any.
    /// In request-id mode the message cannot be attributed and is dropped.
    pub(crate) fn resolve_error(&mut self, error: Error) -> Option<Frame> {
        match self.mode {
            CorrelationMode::Sequential => self.complete_current(Err(error)),
            CorrelationMode::RequestId => {
                warn!(error = %error, "Undecodable reply cannot be matched, dropped");
                None
            }
        }
    }

    /// Forgets a request whose caller gave up.
    ///
    /// A sequential request already on the wire keeps the slot so its late
    /// reply is consumed instead of answering the next caller.
    ///
    /// Returns `true` when a queued request timed out behind a slot that is
    /// still held by an earlier timed-out request: the host is not replying.
    #[must_use]
    pub(crate) fn abandon(&mut self, id: RequestId) -> bool {
        debug!(request_id = %id, "Removed timed-out correlation");

        match self.mode {
            CorrelationMode::Sequential => {
                if self.current.as_ref().is_some_and(|(current, _)| *current == id) {
                    self.stale = true;
                    return false;
                }
                self.queue.retain(|queued| queued.id != id);
                self.stale
            }
            CorrelationMode::RequestId => {
                self.in_flight.remove(&id);
                false
            }
        }
    }

    /// Fails every tracked request with [`Error::NoConnection`] and
    /// rejects later admissions.
    pub(crate) fn fail_all(&mut self) {
        self.closed = true;

        let mut senders: Vec<ResponseTx> = Vec::with_capacity(self.pending());
        senders.extend(self.current.take().map(|(_, tx)| tx));
        self.stale = false;
        senders.extend(self.queue.drain(..).map(|queued| queued.tx));
        senders.extend(self.in_flight.drain().map(|(_, tx)| tx));

        let count = senders.len();
        for tx in senders {
            let _ = tx.send(Err(Error::NoConnection));
        }

        if count > 0 {
            debug!(count, "Failed pending requests on disconnect");
        }
    }

    /// Drops requests whose callers went away without a timeout.
    fn prune_dropped(&mut self) {
        self.queue.retain(|queued| !queued.tx.is_closed());
        self.in_flight.retain(|_, tx| !tx.is_closed());
    }

    fn complete_current(&mut self, outcome: Result<Value>) -> Option<Frame> {
        let Some((id, tx)) = self.current.take() else {
            warn!("Unsolicited message from host dropped");
            return None;
        };
        self.stale = false;

        if tx.send(outcome).is_err() {
            debug!(request_id = %id, "Reply for abandoned request discarded");
        } else {
            trace!(request_id = %id, "Request resolved");
        }

        while let Some(next) = self.queue.pop_front() {
            if next.tx.is_closed() {
                debug!(request_id = %next.id, "Skipping abandoned queued request");
                continue;
            }
            trace!(request_id = %next.id, "Dequeued request");
            self.current = Some((next.id, next.tx));
            return Some(next.frame);
        }

        None
    }

    fn resolve_by_id(&mut self, mut message: Value) {
        let id = message
            .get(REQUEST_ID_FIELD)
            .and_then(Value::as_str)
            .and_then(|raw| raw.parse::<RequestId>().ok());

        let Some(id) = id else {
            warn!("Reply without a valid request-id dropped");
            return;
        };

        let Some(tx) = self.in_flight.remove(&id) else {
            warn!(request_id = %id, "Reply for unknown request");
            return;
        };

        if let Some(object) = message.as_object_mut() {
            object.remove(REQUEST_ID_FIELD);
        }

        if tx.send(Ok(message)).is_err() {
            debug!(request_id = %id, "Reply for abandoned request discarded");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::protocol::framing::MAX_BROWSER_MESSAGE;

    fn frame(seq: u32) -> Frame {
        Frame::encode(&json!({ "seq": seq }), MAX_BROWSER_MESSAGE).expect("encode")
    }

    fn admit(
        correlation: &mut Correlation,
        seq: u32,
    ) -> (RequestId, oneshot::Receiver<Result<Value>>, Admission) {
        let id = RequestId::generate();
        let (tx, rx) = oneshot::channel();
        let admission = correlation.admit(id, tx, frame(seq)).expect("admit");
        (id, rx, admission)
    }

    #[test]
    fn test_sequential_single_slot() {
        let mut correlation = Correlation::new(CorrelationMode::Sequential, 10);

        let (_, _rx1, first) = admit(&mut correlation, 1);
        let (_, _rx2, second) = admit(&mut correlation, 2);

        assert!(matches!(first, Admission::SendNow(_)));
        assert!(matches!(second, Admission::Queued));
        assert_eq!(correlation.pending(), 2);
    }

    #[test]
    fn test_sequential_resolves_in_order_and_advances() {
        let mut correlation = Correlation::new(CorrelationMode::Sequential, 10);
        let (_, mut rx1, _) = admit(&mut correlation, 1);
        let (_, mut rx2, _) = admit(&mut correlation, 2);

        let next = correlation.resolve(json!({ "reply": 1 }));
        assert_eq!(next, Some(frame(2)));
        assert_eq!(rx1.try_recv().expect("resolved").expect("ok")["reply"], 1);
        assert!(rx2.try_recv().is_err());

        assert!(correlation.resolve(json!({ "reply": 2 })).is_none());
        assert_eq!(rx2.try_recv().expect("resolved").expect("ok")["reply"], 2);
        assert_eq!(correlation.pending(), 0);
    }

    #[test]
    fn test_sequential_late_reply_not_misattributed() {
        let mut correlation = Correlation::new(CorrelationMode::Sequential, 10);
        let (id1, rx1, _) = admit(&mut correlation, 1);
        let (_, mut rx2, _) = admit(&mut correlation, 2);

        // First caller times out while its request is on the wire
        correlation.abandon(id1);
        drop(rx1);

        // Its late reply frees the slot without reaching the second caller
        let next = correlation.resolve(json!({ "reply": "late" }));
        assert_eq!(next, Some(frame(2)));
        assert!(rx2.try_recv().is_err());

        correlation.resolve(json!({ "reply": "second" }));
        assert_eq!(rx2.try_recv().expect("resolved").expect("ok")["reply"], "second");
    }

    #[test]
    fn test_sequential_undecodable_reply_frees_slot() {
        let mut correlation = Correlation::new(CorrelationMode::Sequential, 10);
        let (_, mut rx1, _) = admit(&mut correlation, 1);
        let (_, mut rx2, _) = admit(&mut correlation, 2);

        let next = correlation.resolve_error(Error::protocol("not JSON"));
        assert_eq!(next, Some(frame(2)));
        assert!(matches!(rx1.try_recv(), Ok(Err(Error::Protocol { .. }))));
        assert!(rx2.try_recv().is_err());

        correlation.resolve(json!({ "reply": 2 }));
        assert_eq!(rx2.try_recv().expect("resolved").expect("ok")["reply"], 2);
    }

    #[test]
    fn test_sequential_late_garbage_after_timeout_frees_slot() {
        let mut correlation = Correlation::new(CorrelationMode::Sequential, 10);
        let (id1, rx1, _) = admit(&mut correlation, 1);
        assert!(!correlation.abandon(id1));
        drop(rx1);

        let (_, mut rx2, second) = admit(&mut correlation, 2);
        assert!(matches!(second, Admission::Queued));

        assert_eq!(correlation.resolve_error(Error::protocol("not JSON")), Some(frame(2)));
        correlation.resolve(json!({ "reply": 2 }));
        assert_eq!(rx2.try_recv().expect("resolved").expect("ok")["reply"], 2);
    }

    #[test]
    fn test_sequential_second_timeout_on_held_slot_reports_stall() {
        let mut correlation = Correlation::new(CorrelationMode::Sequential, 10);
        let (id1, _rx1, _) = admit(&mut correlation, 1);
        let (id2, _rx2, _) = admit(&mut correlation, 2);

        // A queued timeout alone is not a stall
        let (id3, _rx3, _) = admit(&mut correlation, 3);
        assert!(!correlation.abandon(id3));

        assert!(!correlation.abandon(id1));
        assert!(correlation.abandon(id2));
    }

    #[test]
    fn test_late_reply_clears_stall() {
        let mut correlation = Correlation::new(CorrelationMode::Sequential, 10);
        let (id1, _rx1, _) = admit(&mut correlation, 1);
        assert!(!correlation.abandon(id1));

        correlation.resolve(json!({ "reply": "late" }));

        let (_, _rx2, _) = admit(&mut correlation, 2);
        let (id3, _rx3, _) = admit(&mut correlation, 3);
        assert!(!correlation.abandon(id3));
    }

    #[test]
    fn test_request_id_undecodable_reply_dropped() {
        let mut correlation = Correlation::new(CorrelationMode::RequestId, 10);
        let (_, mut rx, _) = admit(&mut correlation, 1);

        assert!(correlation.resolve_error(Error::protocol("not JSON")).is_none());
        assert!(rx.try_recv().is_err());
        assert_eq!(correlation.pending(), 1);
    }

    #[test]
    fn test_request_id_dropped_callers_do_not_count() {
        let mut correlation = Correlation::new(CorrelationMode::RequestId, 1);
        let (_, rx1, _) = admit(&mut correlation, 1);
        drop(rx1);

        let (_, _rx2, second) = admit(&mut correlation, 2);
        assert!(matches!(second, Admission::SendNow(_)));
        assert_eq!(correlation.pending(), 1);
    }

    #[test]
    fn test_sequential_abandoned_queued_request_is_skipped() {
        let mut correlation = Correlation::new(CorrelationMode::Sequential, 10);
        let (_, _rx1, _) = admit(&mut correlation, 1);
        let (_, rx2, _) = admit(&mut correlation, 2);
        let (_, _rx3, _) = admit(&mut correlation, 3);

        drop(rx2);

        assert_eq!(correlation.resolve(json!({})), Some(frame(3)));
    }

    #[test]
    fn test_unsolicited_message_dropped() {
        let mut correlation = Correlation::new(CorrelationMode::Sequential, 10);
        assert!(correlation.resolve(json!({ "ak-pub": "AABB" })).is_none());
        assert_eq!(correlation.pending(), 0);
    }

    #[test]
    fn test_request_id_matches_out_of_order() {
        let mut correlation = Correlation::new(CorrelationMode::RequestId, 10);
        let (id1, mut rx1, a1) = admit(&mut correlation, 1);
        let (id2, mut rx2, a2) = admit(&mut correlation, 2);
        assert!(matches!(a1, Admission::SendNow(_)));
        assert!(matches!(a2, Admission::SendNow(_)));

        correlation.resolve(json!({ "request-id": id2.to_string(), "reply": 2 }));
        correlation.resolve(json!({ "request-id": id1.to_string(), "reply": 1 }));

        let reply1 = rx1.try_recv().expect("resolved").expect("ok");
        let reply2 = rx2.try_recv().expect("resolved").expect("ok");
        assert_eq!(reply1, json!({ "reply": 1 }));
        assert_eq!(reply2, json!({ "reply": 2 }));
    }

    #[test]
    fn test_request_id_unknown_or_missing_dropped() {
        let mut correlation = Correlation::new(CorrelationMode::RequestId, 10);
        let (_, mut rx, _) = admit(&mut correlation, 1);

        correlation.resolve(json!({ "reply": "no id" }));
        correlation.resolve(json!({ "request-id": RequestId::generate().to_string() }));

        assert!(rx.try_recv().is_err());
        assert_eq!(correlation.pending(), 1);
    }

    #[test]
    fn test_limit() {
        let mut correlation = Correlation::new(CorrelationMode::Sequential, 2);
        let _a = admit(&mut correlation, 1);
        let _b = admit(&mut correlation, 2);

        let (tx, _rx) = oneshot::channel();
        let err = correlation
            .admit(RequestId::generate(), tx, frame(3))
            .unwrap_err();
        assert!(matches!(err, Error::TooManyPending { pending: 2, max: 2 }));
    }

    #[test]
    fn test_fail_all() {
        let mut correlation = Correlation::new(CorrelationMode::Sequential, 10);
        let (_, mut rx1, _) = admit(&mut correlation, 1);
        let (_, mut rx2, _) = admit(&mut correlation, 2);

        correlation.fail_all();

        assert!(matches!(rx1.try_recv(), Ok(Err(Error::NoConnection))));
        assert!(matches!(rx2.try_recv(), Ok(Err(Error::NoConnection))));
        assert_eq!(correlation.pending(), 0);

        let (tx, _rx) = oneshot::channel();
        let err = correlation
            .admit(RequestId::generate(), tx, frame(3))
            .unwrap_err();
        assert!(matches!(err, Error::NoConnection));
    }
}
