use bytes::Bytes;
use futures_util::TryStreamExt;
use http_body_util::{BodyExt, Full};
use hyper::{Response, StatusCode, body::Incoming};
use tokio_util::{io::StreamReader, sync::CancellationToken};
use uuid::Uuid;

use super::ReaderParam;
use crate::{State, http::full};

/// Serves `POST {base}/{identifier}`: hands the request body to the call
/// that declared it, then holds the request open until that call has read or
/// dropped the stream.
pub(crate) async fn receive(
    state: &State,
    id: &str,
    body: Incoming,
    cancel: CancellationToken,
) -> Response<Full<Bytes>> {
    let id = match Uuid::parse_str(id) {
        Ok(id) => id,
        Err(e) => {
            return full(
                StatusCode::BAD_REQUEST,
                format!("parsing reader uuid: {e}"),
            );
        }
    };

    let body = StreamReader::new(body.into_data_stream().map_err(std::io::Error::other));
    let (reader, done) = ReaderParam::new(body);

    if let Err(err) = state.streams.deliver(id, reader, &cancel).await {
        tracing::error!(%id, %err, "stream handoff failed while waiting for a consumer");
        return full(StatusCode::INTERNAL_SERVER_ERROR, Bytes::new());
    }

    tokio::select! {
        _ = done => full(StatusCode::OK, Bytes::new()),
        () = cancel.cancelled() => {
            tracing::error!(%id, "stream handoff cancelled while the consumer was reading");
            full(StatusCode::INTERNAL_SERVER_ERROR, Bytes::new())
        }
    }
}
