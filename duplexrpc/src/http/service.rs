use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Method, Request, Response, StatusCode, body::Incoming};
use tokio_util::sync::CancellationToken;

use super::{full, unary};
use crate::{Context, State, TaskSupervisor, auth, stream, ws};

/// Routes one HTTP request:
///
/// - `POST {base}`: unary call.
/// - `GET {base}` with upgrade headers: duplex connection.
/// - `POST {base}/{uuid}`: streamed reader parameter.
///
/// Authentication runs first and applies to all three.
pub(crate) async fn handle_request(
    state: Arc<State>,
    supervisor: TaskSupervisor,
    mut req: Request<Incoming>,
    addr: SocketAddr,
    cancel: CancellationToken,
) -> Result<Response<Full<Bytes>>, Infallible> {
    // cancelled when the request completes or the connection goes away.
    let cancel = cancel.child_token();
    let _guard = cancel.clone().drop_guard();

    let permissions = match &state.verifier {
        Some(verifier) => match auth::authenticate(verifier.as_ref(), &mut req).await {
            Ok(permissions) => permissions,
            Err(err) => {
                tracing::warn!(%addr, %err, "rejected unauthenticated request");
                return Ok(full(StatusCode::UNAUTHORIZED, err.to_string()));
            }
        },
        None => None,
    };
    let ctx = Context::new(state.clone())
        .with_permissions(permissions)
        .with_remote_addr(addr)
        .with_cancel(cancel.clone());

    let base = state.config.base_path.trim_end_matches('/');
    let path = req.uri().path();
    if path.trim_end_matches('/') == base {
        let rsp = if hyper_tungstenite::is_upgrade_request(&req) {
            ws::upgrade(ctx, req, &supervisor).await
        } else if req.method() == Method::POST {
            unary::serve(ctx, req.into_body()).await
        } else {
            full(StatusCode::METHOD_NOT_ALLOWED, Bytes::new())
        };
        return Ok(rsp);
    }

    if let Some(id) = path
        .strip_prefix(base)
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|id| !id.is_empty() && !id.contains('/'))
    {
        if req.method() != Method::POST {
            return Ok(full(StatusCode::METHOD_NOT_ALLOWED, Bytes::new()));
        }
        let id = id.to_string();
        return Ok(stream::receive(&state, &id, req.into_body(), cancel).await);
    }

    Ok(full(StatusCode::NOT_FOUND, Bytes::new()))
}
