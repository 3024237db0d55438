use std::{net::SocketAddr, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use serde_inline_default::serde_inline_default;
use tokio_util::sync::DropGuard;

use crate::{
    Listener, Result, Router, State, auth::Verifier, services, state::ReverseClientBuilder,
};

/// Server settings. Every field has a default, so `{}` is a valid config.
#[serde_inline_default]
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone)]
pub struct ServerConfig {
    /// Path of the RPC resource; streamed readers are posted below it.
    #[serde_inline_default("/rpc/v0".to_string())]
    pub base_path: String,
    /// Keepalive period of duplex connections; `0s` disables pinging.
    #[serde_inline_default(Duration::from_secs(5))]
    #[serde(with = "humantime_serde")]
    pub ping_interval: Duration,
    /// How long either side of a streamed reader waits for the other.
    #[serde_inline_default(Duration::from_secs(60))]
    #[serde(with = "humantime_serde")]
    pub stream_timeout: Duration,
    /// Largest accepted unary request body, in bytes.
    #[serde_inline_default(64 << 20)]
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        serde_json::from_value(serde_json::Value::Object(serde_json::Map::default()))
            .unwrap_or_else(|_| unreachable!("every field has a default"))
    }
}

/// JSON-RPC server speaking unary HTTP, duplex WebSocket and streamed
/// reader uploads on one port.
///
/// # Examples
///
/// ```rust,no_run
/// # use duplexrpc::{Methods, Router, Server, ServerConfig};
/// # use std::{net::SocketAddr, str::FromStr};
/// # #[tokio::main]
/// # async fn main() {
/// let mut router = Router::default();
/// router
///     .register(
///         "Math",
///         Methods::new().method("Add", |_ctx, (a, b): (i64, i64)| async move { Ok(a + b) }),
///     )
///     .unwrap();
///
/// let server = Server::create(router, &ServerConfig::default()).unwrap();
/// let addr = SocketAddr::from_str("127.0.0.1:8000").unwrap();
/// server.listen(addr).await.unwrap();
/// server.join().await;
/// # }
/// ```
pub struct Server {
    state: Arc<State>,
    listener: Listener,
    _drop_guard: DropGuard,
}

impl Server {
    /// Creates a server without authentication or reverse-client hook.
    ///
    /// # Errors
    ///
    /// `DuplicateMethod` if `router` already uses the built-in `rpc`
    /// namespace.
    pub fn create(router: Router, config: &ServerConfig) -> Result<Self> {
        Self::builder(router, config.clone()).build()
    }

    #[must_use]
    pub fn builder(router: Router, config: ServerConfig) -> ServerBuilder {
        ServerBuilder {
            router,
            config,
            verifier: None,
            reverse_client_builder: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> &Arc<State> {
        &self.state
    }

    /// Starts listening on `addr`; returns the bound address.
    ///
    /// # Errors
    ///
    /// `TcpBindFailed` if the address cannot be bound.
    pub async fn listen(&self, addr: SocketAddr) -> Result<SocketAddr> {
        self.listener.start_listen(addr, &self.state).await
    }

    /// Stops accepting and cancels every connection. Duplex connections say
    /// goodbye to their peers; call [`join`](Self::join) to wait for that.
    pub fn stop(&self) {
        self.listener.stop();
    }

    pub async fn join(&self) {
        self.listener.join().await;
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("state", &self.state)
            .field("listener", &self.listener)
            .finish_non_exhaustive()
    }
}

pub struct ServerBuilder {
    router: Router,
    config: ServerConfig,
    verifier: Option<Arc<dyn Verifier>>,
    reverse_client_builder: Option<Arc<dyn ReverseClientBuilder>>,
}

impl ServerBuilder {
    /// Requires bearer tokens to pass `verifier`; requests without a token
    /// are served without permissions.
    #[must_use]
    pub fn with_verifier(mut self, verifier: impl Verifier) -> Self {
        self.verifier = Some(Arc::new(verifier));
        self
    }

    /// Runs `builder` whenever a duplex connection opens.
    #[must_use]
    pub fn with_reverse_client_builder(mut self, builder: impl ReverseClientBuilder) -> Self {
        self.reverse_client_builder = Some(Arc::new(builder));
        self
    }

    /// # Errors
    ///
    /// `DuplicateMethod` if the router already uses the `rpc` namespace.
    pub fn build(self) -> Result<Server> {
        let mut router = self.router;
        services::register(&mut router)?;

        let mut state = State::new(router, self.config);
        state.verifier = self.verifier;
        state.reverse_client_builder = self.reverse_client_builder;

        let listener = Listener::default();
        let drop_guard = listener.drop_guard();
        Ok(Server {
            state: Arc::new(state),
            listener,
            _drop_guard: drop_guard,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.base_path, "/rpc/v0");
        assert_eq!(config.ping_interval, Duration::from_secs(5));
        assert_eq!(config.stream_timeout, Duration::from_secs(60));
        assert_eq!(config.max_body_size, 64 << 20);

        let config: ServerConfig =
            serde_json::from_str(r#"{"ping_interval": "0s", "stream_timeout": "2m"}"#).unwrap();
        assert!(config.ping_interval.is_zero());
        assert_eq!(config.stream_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_rpc_namespace_is_reserved() {
        let mut router = Router::default();
        router
            .register(
                "rpc",
                crate::Methods::new().method("listMethods", |_, (): ()| async move { Ok(()) }),
            )
            .unwrap();
        assert!(Server::create(router, &ServerConfig::default()).is_err());
    }
}
