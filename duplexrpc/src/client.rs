use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    Method, StatusCode,
    header::{AUTHORIZATION, CONTENT_TYPE, HOST},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_inline_default::serde_inline_default;
use serde_json::Value;
use tokio_tungstenite::tungstenite::{client::IntoClientRequest, http::HeaderValue};
use tokio_util::sync::CancellationToken;

use crate::{
    ConnState, Context, Error, ErrorKind, Peer, ReaderParamEncoder, Result, Router, ServerConfig, State,
    http::{Connections, Endpoint},
    msg::{Frame, Request},
    ws,
};

#[serde_inline_default]
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone)]
pub struct ClientConfig {
    /// Deadline of a unary call.
    #[serde_inline_default(Duration::from_secs(30))]
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Keepalive period of duplex connections; `0s` disables pinging.
    #[serde_inline_default(Duration::from_secs(5))]
    #[serde(with = "humantime_serde")]
    pub ping_interval: Duration,
    /// How long a reader argument sent by the server may take to arrive.
    #[serde_inline_default(Duration::from_secs(60))]
    #[serde(with = "humantime_serde")]
    pub stream_timeout: Duration,
    /// Bearer token sent with every request.
    #[serde_inline_default(None)]
    pub token: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        serde_json::from_value(serde_json::Value::Object(serde_json::Map::default()))
            .unwrap_or_else(|_| unreachable!("every field has a default"))
    }
}

/// Client of one server's RPC resource.
///
/// Unary calls share a pool of keep-alive HTTP connections;
/// [`connect`](Self::connect) opens a duplex connection instead.
#[derive(Debug)]
pub struct Client {
    endpoint: Endpoint,
    config: ClientConfig,
    connections: Connections,
    next_id: AtomicU64,
}

impl Client {
    /// `url` is the server's base URL, e.g. `http://127.0.0.1:8000/rpc/v0`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a malformed or non-`http` URL.
    pub fn new(url: &str, config: ClientConfig) -> Result<Self> {
        let endpoint = Endpoint::parse(url)?;
        Ok(Self {
            connections: Connections::new(endpoint.addr.clone()),
            endpoint,
            config,
            next_id: AtomicU64::new(1),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Calls `method` in a single HTTP request.
    ///
    /// # Errors
    ///
    /// The callee's error mapped back to its kind, `Timeout` past the
    /// configured deadline, or the transport failure.
    pub async fn call<R: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<R> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = Request::new(Some(id.into()), method, params);
        let (status, body) = self.post(&req).await?;

        match Frame::parse(&body) {
            Ok(Frame::Response(rsp)) => Ok(serde_json::from_value(rsp.into_result()?)?),
            _ if status != StatusCode::OK => Err(Error::new(
                ErrorKind::HttpStatus(status.as_u16()),
                String::from_utf8_lossy(&body).into_owned(),
            )),
            _ => Err(Error::new(
                ErrorKind::HttpWaitRspFailed,
                format!("unexpected response to {method}"),
            )),
        }
    }

    /// Sends `method` as a notification; completes once the server has
    /// handled it.
    ///
    /// # Errors
    ///
    /// `HttpStatus` if the server did not answer 200, or the transport
    /// failure.
    pub async fn notify(&self, method: &str, params: Vec<Value>) -> Result<()> {
        let (status, _) = self.post(&Request::new(None, method, params)).await?;
        if status == StatusCode::OK {
            Ok(())
        } else {
            Err(Error::kind(ErrorKind::HttpStatus(status.as_u16())))
        }
    }

    async fn post(&self, req: &Request) -> Result<(StatusCode, Bytes)> {
        let body = serde_json::to_vec(req)?;
        let mut builder = hyper::Request::builder()
            .method(Method::POST)
            .uri(self.endpoint.base())
            .header(HOST, &self.endpoint.host)
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = &self.config.token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let http_req = builder
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| Error::new(ErrorKind::HttpBuildReqFailed, e.to_string()))?;

        tokio::time::timeout(self.config.timeout, self.connections.send(http_req))
            .await
            .map_err(|_| {
                Error::new(
                    ErrorKind::Timeout,
                    format!("{} timed out after {:?}", req.method, self.config.timeout),
                )
            })?
    }

    /// Opens a duplex connection. Calls from the server are served by
    /// `router`; the returned [`Peer`] calls the server.
    ///
    /// The connection runs until either side closes it.
    ///
    /// # Errors
    ///
    /// `WebSocketConnectFailed` if the upgrade is refused or fails.
    pub async fn connect(&self, router: Router) -> Result<Peer> {
        let url = self.endpoint.websocket_url();
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::new(ErrorKind::WebSocketConnectFailed, e.to_string()))?;
        if let Some(token) = &self.config.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| Error::new(ErrorKind::InvalidArgument, e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        let (socket, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| Error::new(ErrorKind::WebSocketConnectFailed, e.to_string()))?;

        let config = ServerConfig {
            base_path: self.endpoint.base(),
            ping_interval: self.config.ping_interval,
            stream_timeout: self.config.stream_timeout,
            ..ServerConfig::default()
        };
        let state = Arc::new(State::new(router, config));
        let cancel = CancellationToken::new();
        let (peer, outbox) = Peer::new(cancel.clone());
        peer.advance(ConnState::Open);
        let ctx = Context::new(state)
            .with_cancel(cancel)
            .with_peer(peer.clone());
        tokio::spawn(ws::run(
            socket,
            ctx,
            peer.clone(),
            outbox,
            self.config.ping_interval,
        ));
        tracing::debug!(%url, "duplex connection open");
        Ok(peer)
    }

    /// Encoder for reader arguments of calls to this server.
    #[must_use]
    pub fn reader_encoder(&self) -> ReaderParamEncoder {
        ReaderParamEncoder::from_endpoint(self.endpoint.clone()).with_token(self.config.token.clone())
    }
}
