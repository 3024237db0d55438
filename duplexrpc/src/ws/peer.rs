use std::sync::{
    Arc,
    atomic::{AtomicU8, Ordering},
};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::{
    Error, ErrorKind, Result, Waiter,
    msg::{Request, Response},
};

const OUTBOX_CAPACITY: usize = 1024;

/// Lifecycle of a duplex connection. Transitions only move forward.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl From<u8> for ConnState {
    fn from(value: u8) -> Self {
        match value {
            0 => ConnState::Connecting,
            1 => ConnState::Open,
            2 => ConnState::Closing,
            _ => ConnState::Closed,
        }
    }
}

struct Shared {
    outbox: mpsc::Sender<Message>,
    waiter: Waiter,
    cancel: CancellationToken,
    closed: CancellationToken,
    state: AtomicU8,
}

/// Handle to the remote end of a duplex connection.
///
/// Cloneable; every clone issues calls over the same socket. Calls are
/// correlated by connection-scoped ids, so responses may come back in any
/// order.
#[derive(Clone)]
pub struct Peer {
    shared: Arc<Shared>,
}

impl Peer {
    /// Creates a peer in `Connecting` state together with the queue of frames
    /// its connection loop drains onto the socket.
    pub(crate) fn new(cancel: CancellationToken) -> (Self, mpsc::Receiver<Message>) {
        let (outbox, rx) = mpsc::channel(OUTBOX_CAPACITY);
        let shared = Shared {
            outbox,
            waiter: Waiter::default(),
            cancel,
            closed: CancellationToken::new(),
            state: AtomicU8::new(ConnState::Connecting as u8),
        };
        (
            Self {
                shared: Arc::new(shared),
            },
            rx,
        )
    }

    /// Calls `method` on the other side and waits for its result.
    ///
    /// Dropping the returned future abandons the call; a late response is
    /// then logged and discarded.
    ///
    /// # Errors
    ///
    /// The callee's error, `ConnectionClosed` if the connection goes away
    /// first, or a `SerdeJsonError` if the result does not decode as `R`.
    pub async fn call<R: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<R> {
        let (call_id, rx) = self.shared.waiter.alloc();
        self.send_frame(&Request::new(Some(call_id.into()), method, params))
            .await?;

        let rsp = tokio::select! {
            biased;
            rsp = rx.recv() => rsp?,
            () = self.shared.cancel.cancelled() => {
                return Err(Error::new(
                    ErrorKind::ConnectionClosed,
                    format!("connection closed while calling {method}"),
                ));
            }
        };
        Ok(serde_json::from_value(rsp.into_result()?)?)
    }

    /// Sends `method` as a notification; the other side never answers.
    ///
    /// # Errors
    ///
    /// `ConnectionClosed` if the connection is closing.
    pub async fn notify(&self, method: &str, params: Vec<Value>) -> Result<()> {
        self.send_frame(&Request::new(None, method, params)).await
    }

    /// Starts closing the connection. Outstanding calls fail with
    /// `ConnectionClosed`.
    pub fn close(&self) {
        self.shared.cancel.cancel();
    }

    /// Resolves once the connection reached `Closed`.
    pub async fn closed(&self) {
        self.shared.closed.cancelled().await;
    }

    #[must_use]
    pub fn state(&self) -> ConnState {
        self.shared.state.load(Ordering::Acquire).into()
    }

    /// Number of calls still waiting for a response.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.waiter.pending()
    }

    pub(crate) fn waiter(&self) -> &Waiter {
        &self.shared.waiter
    }

    pub(crate) fn cancellation_token(&self) -> &CancellationToken {
        &self.shared.cancel
    }

    pub(crate) fn advance(&self, state: ConnState) {
        self.shared.state.fetch_max(state as u8, Ordering::AcqRel);
    }

    pub(crate) async fn send_frame(&self, frame: &impl Serialize) -> Result<()> {
        if self.state() >= ConnState::Closing || self.shared.cancel.is_cancelled() {
            return Err(Error::kind(ErrorKind::ConnectionClosed));
        }
        let text = serde_json::to_string(frame)?;
        self.send_message(Message::Text(text.into())).await
    }

    pub(crate) async fn send_message(&self, msg: Message) -> Result<()> {
        self.shared
            .outbox
            .send(msg)
            .await
            .map_err(|_| Error::new(ErrorKind::ConnectionClosed, "outbox closed".into()))
    }

    pub(crate) async fn send_response(&self, rsp: &Response) {
        if let Err(err) = self.send_frame(rsp).await {
            tracing::debug!(id = ?rsp.id, %err, "dropping response for closed connection");
        }
    }

    /// Moves to `Closed`: cancels the connection, then fails every
    /// outstanding call with `err`.
    pub(crate) fn shutdown(&self, err: &Error) {
        self.advance(ConnState::Closing);
        self.shared.cancel.cancel();
        self.shared.waiter.close(err);
        self.advance(ConnState::Closed);
        self.shared.closed.cancel();
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::{Frame, RequestId};
    use serde_json::json;

    fn request_of(msg: Message) -> Request {
        let Message::Text(text) = msg else {
            panic!("expected text frame");
        };
        let Ok(Frame::Request(req)) = Frame::parse(text.as_bytes()) else {
            panic!("expected request frame");
        };
        req
    }

    #[tokio::test]
    async fn test_permuted_responses() {
        let (peer, mut outbox) = Peer::new(CancellationToken::new());
        peer.advance(ConnState::Open);

        let calls: Vec<_> = (0..8i64)
            .map(|n| {
                let peer = peer.clone();
                tokio::spawn(async move { peer.call::<i64>("Math.Neg", vec![json!(n)]).await })
            })
            .collect();

        let mut requests = vec![];
        for _ in 0..calls.len() {
            requests.push(request_of(outbox.recv().await.unwrap()));
        }
        requests.reverse();
        requests.swap(1, 5);
        for req in requests {
            let call_id = req.id.as_ref().and_then(RequestId::as_call_id).unwrap();
            let n = req.params[0].as_i64().unwrap();
            assert!(peer.waiter().post(call_id, Ok(Response::success(req.id, json!(-n)))));
        }

        for (n, call) in calls.into_iter().enumerate() {
            assert_eq!(call.await.unwrap().unwrap(), -(n as i64));
        }
        assert_eq!(peer.pending(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_fails_pending_calls() {
        let (peer, mut outbox) = Peer::new(CancellationToken::new());
        peer.advance(ConnState::Open);

        let calls: Vec<_> = (0..4)
            .map(|_| {
                let peer = peer.clone();
                tokio::spawn(async move { peer.call::<Value>("Slow.Wait", vec![]).await })
            })
            .collect();
        for _ in 0..calls.len() {
            outbox.recv().await.unwrap();
        }
        assert_eq!(peer.pending(), 4);

        peer.shutdown(&Error::kind(ErrorKind::ConnectionClosed));
        for call in calls {
            assert_eq!(
                call.await.unwrap().unwrap_err().kind,
                ErrorKind::ConnectionClosed
            );
        }
        assert_eq!(peer.state(), ConnState::Closed);
        peer.closed().await;

        let err = peer.notify("Log.Write", vec![]).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConnectionClosed);
    }

    #[test]
    fn test_state_only_moves_forward() {
        let (peer, _outbox) = Peer::new(CancellationToken::new());
        assert_eq!(peer.state(), ConnState::Connecting);
        peer.advance(ConnState::Closing);
        peer.advance(ConnState::Open);
        assert_eq!(peer.state(), ConnState::Closing);
    }
}
