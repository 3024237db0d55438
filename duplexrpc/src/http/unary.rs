use bytes::Bytes;
use futures_util::future::join_all;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::{Response, StatusCode, body::Incoming};

use super::{full, json};
use crate::{
    Context, Error, ErrorKind,
    msg::{Body, Frame, RequestId, Response as RpcResponse},
};

/// Serves `POST {base}`: one JSON-RPC request (or a batch) per HTTP request.
pub(crate) async fn serve(ctx: Context, body: Incoming) -> Response<Full<Bytes>> {
    let limit = ctx.state.config.max_body_size;
    let bytes = match Limited::new(body, limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            return full(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("request body exceeds {limit} bytes"),
            );
        }
        Err(e) => {
            tracing::error!(addr = ?ctx.remote_addr(), "reading request body failed: {e}");
            return full(StatusCode::INTERNAL_SERVER_ERROR, Bytes::new());
        }
    };

    match Body::parse(&bytes) {
        Err(err) => reply(StatusCode::BAD_REQUEST, &RpcResponse::error(None, &err)),
        Ok(Body::Single(Frame::Invalid(invalid))) => {
            reply(StatusCode::BAD_REQUEST, &invalid.into_response())
        }
        Ok(Body::Single(Frame::Response(rsp))) => {
            reply(StatusCode::BAD_REQUEST, &response_rejected(rsp.id))
        }
        Ok(Body::Single(frame)) => match handle_frame(ctx, frame).await {
            Some(rsp) => reply(StatusCode::OK, &rsp),
            None => full(StatusCode::OK, Bytes::new()),
        },
        Ok(Body::Batch(frames)) => {
            let responses: Vec<RpcResponse> =
                join_all(frames.into_iter().map(|frame| handle_frame(ctx.clone(), frame)))
                    .await
                    .into_iter()
                    .flatten()
                    .collect();
            if responses.is_empty() {
                full(StatusCode::OK, Bytes::new())
            } else {
                reply(StatusCode::OK, &responses)
            }
        }
    }
}

async fn handle_frame(ctx: Context, frame: Frame) -> Option<RpcResponse> {
    match frame {
        Frame::Request(req) => ctx.state.clone().handle_request(ctx, req).await,
        Frame::Response(rsp) => Some(response_rejected(rsp.id)),
        Frame::Invalid(invalid) => Some(invalid.into_response()),
    }
}

/// Unary calls carry requests only; a method-less envelope is invalid here.
fn response_rejected(id: Option<RequestId>) -> RpcResponse {
    RpcResponse::error(
        id,
        &Error::new(
            ErrorKind::InvalidRequest,
            "envelope without method; responses are only accepted on duplex connections".into(),
        ),
    )
}

fn reply(status: StatusCode, body: &impl serde::Serialize) -> Response<Full<Bytes>> {
    match serde_json::to_vec(body) {
        Ok(bytes) => json(status, bytes),
        Err(e) => {
            tracing::error!("encoding response failed: {e}");
            full(StatusCode::INTERNAL_SERVER_ERROR, Bytes::new())
        }
    }
}
