use std::time::Duration;

use bytes::Bytes;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{mpsc, watch},
};
use tokio_tungstenite::{WebSocketStream, tungstenite::Message};

use super::Peer;
use crate::{
    ConnState, Context, Error, ErrorKind, Result,
    msg::{Frame, Response},
};

/// How long a closing connection may spend saying goodbye.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Drives one duplex connection until either side closes it, the keepalive
/// expires, or the socket fails.
///
/// Inbound requests are dispatched concurrently against `ctx`; inbound
/// responses are matched to `peer`'s pending calls. On return the peer is
/// `Closed` and none of its calls are left pending.
pub(crate) async fn run<S>(
    socket: WebSocketStream<S>,
    ctx: Context,
    peer: Peer,
    mut outbox: mpsc::Receiver<Message>,
    ping_interval: Duration,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    peer.advance(ConnState::Open);
    let addr = ctx.remote_addr();
    let (mut sink, mut stream) = socket.split();
    let (pongs, pongs_rx) = watch::channel(());

    let result = tokio::select! {
        r = send_loop(&mut sink, &mut outbox) => r,
        r = recv_loop(&mut stream, &ctx, &peer, &pongs) => r,
        r = keepalive(&peer, ping_interval, pongs_rx) => r,
        () = peer.cancellation_token().cancelled() => Ok(()),
    };

    let err = match result {
        Ok(()) => {
            tracing::debug!(?addr, "duplex connection closed");
            Error::kind(ErrorKind::ConnectionClosed)
        }
        Err(err) => {
            tracing::warn!(?addr, %err, "duplex connection failed");
            Error::new(ErrorKind::ConnectionClosed, err.to_string())
        }
    };
    peer.advance(ConnState::Closing);
    peer.cancellation_token().cancel();
    if tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await.is_err() {
        tracing::debug!(?addr, "peer did not take the close frame in time");
    }
    peer.shutdown(&err);
}

async fn send_loop<S>(
    sink: &mut SplitSink<WebSocketStream<S>, Message>,
    outbox: &mut mpsc::Receiver<Message>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(msg) = outbox.recv().await {
        sink.send(msg)
            .await
            .map_err(|e| Error::new(ErrorKind::WebSocketSendFailed, e.to_string()))?;
    }
    Ok(())
}

async fn recv_loop<S>(
    stream: &mut SplitStream<WebSocketStream<S>>,
    ctx: &Context,
    peer: &Peer,
    pongs: &watch::Sender<()>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(msg) = stream.next().await {
        let msg = msg.map_err(|e| Error::new(ErrorKind::WebSocketRecvFailed, e.to_string()))?;
        let bytes = match msg {
            Message::Text(text) => Bytes::copy_from_slice(text.as_bytes()),
            Message::Binary(bytes) => bytes,
            Message::Pong(_) => {
                pongs.send_replace(());
                continue;
            }
            Message::Close(frame) => {
                tracing::debug!(?frame, "peer sent close");
                return Ok(());
            }
            // pings are answered by the socket itself.
            Message::Ping(_) | Message::Frame(_) => continue,
        };

        match Frame::parse(&bytes) {
            Ok(Frame::Request(req)) => {
                let ctx = ctx.clone();
                let peer = peer.clone();
                tokio::spawn(async move {
                    if let Some(rsp) = ctx.state.handle_request(ctx.clone(), req).await {
                        peer.send_response(&rsp).await;
                    }
                });
            }
            Ok(Frame::Response(rsp)) => deliver(peer, rsp),
            Ok(Frame::Invalid(invalid)) => {
                tracing::warn!(error = %invalid.error, "invalid frame");
                peer.send_response(&invalid.into_response()).await;
            }
            Err(err) => {
                tracing::warn!(%err, "unparseable frame");
                peer.send_response(&Response::error(None, &err)).await;
            }
        }
    }
    Ok(())
}

fn deliver(peer: &Peer, rsp: Response) {
    let Some(id) = rsp.id.clone() else {
        if let Some(error) = &rsp.error {
            tracing::warn!(code = error.code, message = %error.message, "peer reported an error");
        }
        return;
    };
    let delivered = id
        .as_call_id()
        .is_some_and(|call_id| peer.waiter().post(call_id, Ok(rsp)));
    if !delivered {
        tracing::warn!(%id, "discarding response without a pending call");
    }
}

/// Pings every `interval` and expects a pong within the same interval.
/// A zero interval disables the keepalive.
async fn keepalive(
    peer: &Peer,
    interval: Duration,
    mut pongs: watch::Receiver<()>,
) -> Result<()> {
    if interval.is_zero() {
        return std::future::pending().await;
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        pongs.mark_unchanged();
        peer.send_message(Message::Ping(Bytes::new())).await?;
        match tokio::time::timeout(interval, pongs.changed()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(Error::kind(ErrorKind::ConnectionClosed)),
            Err(_) => {
                return Err(Error::new(
                    ErrorKind::KeepaliveTimeout,
                    format!("no pong within {interval:?}"),
                ));
            }
        }
    }
}
