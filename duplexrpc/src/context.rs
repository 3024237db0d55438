use std::{collections::BTreeSet, net::SocketAddr, sync::Arc};

use hyper::http::Extensions;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::{Peer, State};

/// Permissions granted to a request by the token verifier.
pub type Permissions = BTreeSet<String>;

/// Request-scoped state handed to every handler.
///
/// A context is created per unary HTTP request and per duplex connection
/// (shared by every call served on that connection). Nothing in it outlives
/// the request or connection that created it.
#[derive(Clone)]
pub struct Context {
    pub state: Arc<State>,
    pub(crate) peer: Option<Peer>,
    pub(crate) permissions: Option<Arc<Permissions>>,
    pub(crate) remote_addr: Option<SocketAddr>,
    pub(crate) cancel: CancellationToken,
    /// Typed values attached by the reverse-client hook or by callers.
    pub extensions: Extensions,
}

impl Context {
    #[must_use]
    pub fn new(state: Arc<State>) -> Self {
        Self {
            state,
            peer: None,
            permissions: None,
            remote_addr: None,
            cancel: CancellationToken::new(),
            extensions: Extensions::new(),
        }
    }

    #[must_use]
    pub fn with_permissions(mut self, permissions: Option<Permissions>) -> Self {
        self.permissions = permissions.map(Arc::new);
        self
    }

    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub(crate) fn with_peer(mut self, peer: Peer) -> Self {
        self.peer = Some(peer);
        self
    }

    /// The connection's peer, when the call arrived over a duplex connection.
    #[must_use]
    pub fn peer(&self) -> Option<&Peer> {
        self.peer.as_ref()
    }

    /// `None` when the request carried no token.
    #[must_use]
    pub fn permissions(&self) -> Option<&Permissions> {
        self.permissions.as_deref()
    }

    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions()
            .is_some_and(|permissions| permissions.contains(permission))
    }

    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the enclosing request or connection is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("remote_addr", &self.remote_addr)
            .field("permissions", &self.permissions)
            .field("duplex", &self.peer.is_some())
            .finish_non_exhaustive()
    }
}
