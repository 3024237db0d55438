use bytes::Bytes;
use futures_util::TryStreamExt;
use http_body_util::{BodyExt, StreamBody, combinators::UnsyncBoxBody};
use hyper::{
    Method, StatusCode,
    body::Frame,
    header::{AUTHORIZATION, CONTENT_TYPE, HOST},
};
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::{
    Error, ErrorKind, Result,
    http::{Endpoint, handshake},
};

type StreamedBody = UnsyncBoxBody<Bytes, std::io::Error>;

/// Encodes reader arguments for calls to one server.
///
/// [`encode`](Self::encode) returns the identifier to pass as the argument
/// and posts the reader's bytes to `{base}/{identifier}` in the background.
/// The upload is detached from the call: its failure is only logged.
#[derive(Clone, Debug)]
pub struct ReaderParamEncoder {
    endpoint: Endpoint,
    token: Option<String>,
}

impl ReaderParamEncoder {
    /// # Errors
    ///
    /// `InvalidArgument` if `base_url` is not an `http://` URL.
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self::from_endpoint(Endpoint::parse(base_url)?))
    }

    pub(crate) fn from_endpoint(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            token: None,
        }
    }

    /// Sends `token` as bearer credential with every upload.
    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Starts uploading `reader` and returns its identifier.
    pub fn encode(&self, reader: impl AsyncRead + Send + 'static) -> Uuid {
        let id = Uuid::new_v4();
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(err) = this.post(id, reader).await {
                tracing::error!(%id, %err, "posting streamed reader failed");
            }
        });
        id
    }

    async fn post(&self, id: Uuid, reader: impl AsyncRead + Send + 'static) -> Result<()> {
        let body: StreamedBody = StreamBody::new(ReaderStream::new(reader).map_ok(Frame::data))
            .boxed_unsync();

        let mut builder = hyper::Request::builder()
            .method(Method::POST)
            .uri(self.endpoint.stream_path(id))
            .header(HOST, &self.endpoint.host)
            .header(CONTENT_TYPE, "application/octet-stream");
        if let Some(token) = &self.token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = builder
            .body(body)
            .map_err(|e| Error::new(ErrorKind::HttpBuildReqFailed, e.to_string()))?;

        let mut sender = handshake::<StreamedBody>(&self.endpoint.addr).await?;
        let rsp = sender
            .send_request(req)
            .await
            .map_err(|e| Error::new(ErrorKind::StreamSendFailed, e.to_string()))?;
        match rsp.status() {
            StatusCode::OK => Ok(()),
            status => Err(Error::new(
                ErrorKind::HttpStatus(status.as_u16()),
                format!("stream {id} rejected"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_encoder() {
        assert!(ReaderParamEncoder::new("http://127.0.0.1:1/rpc/v0").is_ok());
        assert!(ReaderParamEncoder::new("ftp://127.0.0.1/rpc").is_err());
    }

    #[tokio::test]
    async fn test_failed_upload_is_detached() {
        // nothing listens on port 1; the upload fails in the background only.
        let encoder = ReaderParamEncoder::new("http://127.0.0.1:1/rpc/v0").unwrap();
        let a = encoder.encode(&b"payload"[..]);
        let b = encoder.encode(&b"payload"[..]);
        assert_ne!(a, b);
    }
}
