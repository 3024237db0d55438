//! Duplex connections over an upgraded WebSocket.
//!
//! Once upgraded, either side may call the other: inbound requests are
//! served from the local [`Router`](crate::Router), and the [`Peer`] handle
//! issues calls in the opposite direction.

mod connection;
pub(crate) use connection::run;

mod peer;
pub use peer::{ConnState, Peer};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    Request, Response, StatusCode,
    body::Incoming,
    header::{ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue, SEC_WEBSOCKET_PROTOCOL},
};

use crate::{Context, Error, ErrorKind, TaskSupervisor, http::full};

/// Answers an upgrade request and hands the socket to a supervised
/// connection loop.
///
/// The reverse-client hook runs before the `101` goes out, so a failing
/// hook turns into a plain HTTP 500 and the connection never opens.
pub(crate) async fn upgrade(
    ctx: Context,
    mut req: Request<Incoming>,
    supervisor: &TaskSupervisor,
) -> Response<Full<Bytes>> {
    let protocol = req
        .headers()
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').map(str::trim).find(|p| !p.is_empty()))
        .and_then(|value| HeaderValue::from_str(value).ok());

    let (mut response, websocket) = match hyper_tungstenite::upgrade(&mut req, None) {
        Ok(upgrade) => upgrade,
        Err(e) => {
            let err = Error::new(ErrorKind::HttpUpgradeFailed, e.to_string());
            tracing::error!(addr = ?ctx.remote_addr(), %err, "upgrade rejected");
            return full(StatusCode::BAD_REQUEST, err.to_string());
        }
    };

    let cancel = supervisor.child_token();
    let (peer, outbox) = Peer::new(cancel.clone());
    let mut ctx = ctx.with_cancel(cancel).with_peer(peer.clone());
    if let Some(builder) = ctx.state.reverse_client_builder.clone() {
        ctx = match builder.build(ctx, peer.clone()).await {
            Ok(ctx) => ctx,
            Err(err) => {
                tracing::error!(%err, "building reverse client failed");
                peer.shutdown(&Error::new(ErrorKind::ConnectionClosed, err.to_string()));
                return full(StatusCode::INTERNAL_SERVER_ERROR, err.to_string());
            }
        };
    }

    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    if let Some(protocol) = protocol {
        headers.insert(SEC_WEBSOCKET_PROTOCOL, protocol);
    }

    let ping_interval = ctx.state.config.ping_interval;
    supervisor.spawn(move |stop| async move {
        let socket = tokio::select! {
            socket = websocket => socket,
            () = stop.cancelled() => {
                peer.shutdown(&Error::kind(ErrorKind::ConnectionClosed));
                return;
            }
        };
        match socket {
            Ok(socket) => run(socket, ctx, peer, outbox, ping_interval).await,
            Err(e) => {
                tracing::error!(addr = ?ctx.remote_addr(), "upgrade HTTP to WebSocket failed: {e}");
                peer.shutdown(&Error::new(ErrorKind::HttpUpgradeFailed, e.to_string()));
            }
        }
    });

    response
}
