use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{StatusCode, Uri, body::Body, client::conn::http1::SendRequest};
use hyper_util::rt::TokioIo;
use tokio::{net::TcpStream, sync::Mutex};
use uuid::Uuid;

use crate::{Error, ErrorKind, Result};

/// A parsed base URL such as `http://127.0.0.1:8000/rpc/v0`.
#[derive(Clone, Debug)]
pub(crate) struct Endpoint {
    /// `host:port` to connect to.
    pub addr: String,
    /// Value of the `Host` header.
    pub host: String,
    /// Base path without a trailing slash.
    pub path: String,
}

impl Endpoint {
    pub fn parse(url: &str) -> Result<Self> {
        let uri: Uri = url
            .parse()
            .map_err(|e| Error::new(ErrorKind::InvalidArgument, format!("invalid url {url}: {e}")))?;
        match uri.scheme_str() {
            Some("http" | "ws") | None => {}
            Some(scheme) => {
                return Err(Error::new(
                    ErrorKind::InvalidArgument,
                    format!("unsupported scheme: {scheme}"),
                ));
            }
        }
        let Some(authority) = uri.authority() else {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("url without host: {url}"),
            ));
        };
        Ok(Self {
            addr: format!("{}:{}", authority.host(), authority.port_u16().unwrap_or(80)),
            host: authority.as_str().to_string(),
            path: uri.path().trim_end_matches('/').to_string(),
        })
    }

    /// Path of the base resource.
    pub fn base(&self) -> String {
        if self.path.is_empty() {
            "/".to_string()
        } else {
            self.path.clone()
        }
    }

    /// Path a streamed reader is posted to.
    pub fn stream_path(&self, id: Uuid) -> String {
        format!("{}/{id}", self.path)
    }

    pub fn websocket_url(&self) -> String {
        format!("ws://{}{}", self.host, self.base())
    }
}

/// Opens one HTTP/1.1 connection to `addr`.
pub(crate) async fn handshake<B>(addr: &str) -> Result<SendRequest<B>>
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| Error::new(ErrorKind::TcpConnectFailed, e.to_string()))?;
    let (sender, conn) = hyper::client::conn::http1::handshake::<_, B>(TokioIo::new(stream))
        .await
        .map_err(|e| Error::new(ErrorKind::HttpSendReqFailed, e.to_string()))?;
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!("http client connection ended: {e}");
        }
    });
    Ok(sender)
}

/// Idle keep-alive connections to one endpoint.
#[derive(Debug)]
pub(crate) struct Connections {
    addr: String,
    vec: Mutex<Vec<SendRequest<Full<Bytes>>>>,
}

impl Connections {
    pub fn new(addr: String) -> Self {
        Self {
            addr,
            vec: Mutex::default(),
        }
    }

    /// Sends `req` over an idle connection (or a new one) and collects the
    /// response.
    pub async fn send(&self, req: hyper::Request<Full<Bytes>>) -> Result<(StatusCode, Bytes)> {
        // 1. acquire connection.
        let mut sender = loop {
            let idle = self.vec.lock().await.pop();
            match idle {
                Some(sender) if sender.is_closed() => {}
                Some(sender) => break sender,
                None => break handshake(&self.addr).await?,
            }
        };
        sender
            .ready()
            .await
            .map_err(|e| Error::new(ErrorKind::HttpSendReqFailed, e.to_string()))?;

        // 2. send request.
        let rsp = sender
            .send_request(req)
            .await
            .map_err(|e| Error::new(ErrorKind::HttpSendReqFailed, e.to_string()))?;
        let status = rsp.status();

        // 3. collect body bytes.
        let body = rsp
            .into_body()
            .collect()
            .await
            .map_err(|e| Error::new(ErrorKind::HttpWaitRspFailed, e.to_string()))?
            .to_bytes();

        // 4. restore connection.
        self.vec.lock().await.push(sender);

        Ok((status, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint() {
        let endpoint = Endpoint::parse("http://127.0.0.1:8000/rpc/v0/").unwrap();
        assert_eq!(endpoint.addr, "127.0.0.1:8000");
        assert_eq!(endpoint.host, "127.0.0.1:8000");
        assert_eq!(endpoint.base(), "/rpc/v0");
        assert_eq!(endpoint.websocket_url(), "ws://127.0.0.1:8000/rpc/v0");

        let id = Uuid::nil();
        assert_eq!(
            endpoint.stream_path(id),
            "/rpc/v0/00000000-0000-0000-0000-000000000000"
        );

        let endpoint = Endpoint::parse("http://localhost").unwrap();
        assert_eq!(endpoint.addr, "localhost:80");
        assert_eq!(endpoint.base(), "/");

        assert!(Endpoint::parse("https://localhost/rpc").is_err());
        assert!(Endpoint::parse("/rpc/v0").is_err());
    }
}
