use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::{
    Context, Peer, Result, Router, ServerConfig,
    auth::Verifier,
    msg::{Request, Response},
    stream::StreamRegistry,
};

/// Hook run when a duplex connection opens, before it starts serving.
///
/// It receives the connection's context and its [`Peer`], and returns the
/// context every call on that connection will see. A failure aborts the
/// upgrade with HTTP 500.
///
/// Frames queued on the peer are only sent once the hook has returned, so
/// the hook must not await calls of its own.
pub trait ReverseClientBuilder: Send + Sync + 'static {
    fn build(&self, ctx: Context, peer: Peer) -> BoxFuture<'static, Result<Context>>;
}

impl<F, Fut> ReverseClientBuilder for F
where
    F: Fn(Context, Peer) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Context>> + Send + 'static,
{
    fn build(&self, ctx: Context, peer: Peer) -> BoxFuture<'static, Result<Context>> {
        Box::pin(self(ctx, peer))
    }
}

pub struct State {
    pub router: Router,
    pub config: ServerConfig,
    pub(crate) streams: StreamRegistry,
    pub(crate) verifier: Option<Arc<dyn Verifier>>,
    pub(crate) reverse_client_builder: Option<Arc<dyn ReverseClientBuilder>>,
}

impl State {
    #[must_use]
    pub fn new(router: Router, config: ServerConfig) -> Self {
        Self {
            streams: StreamRegistry::new(config.stream_timeout),
            router,
            config,
            verifier: None,
            reverse_client_builder: None,
        }
    }

    /// Rendezvous points of streamed reader parameters in flight.
    #[must_use]
    pub fn streams(&self) -> &StreamRegistry {
        &self.streams
    }

    /// Dispatches one request; `None` for notifications.
    pub async fn handle_request(&self, ctx: Context, req: Request) -> Option<Response> {
        let Request {
            id, method, params, ..
        } = req;
        let result = self.router.dispatch(ctx, &method, params).await;
        if let Err(err) = &result {
            tracing::error!(%method, id = ?id, %err, "rpc error");
        }
        id.map(|id| Response::from_result(Some(id), result))
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Arc<Self> {
        Arc::new(Self::new(Router::default(), ServerConfig::default()))
    }
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("router", &self.router)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
