use std::sync::atomic::{AtomicU64, Ordering};

use duplexrpc::{Context, Error, Methods, Peer, ReaderParam, Result, Router};
use tokio::io::AsyncReadExt;

/// Identifies one duplex connection to the demo server.
#[derive(Clone, Copy, Debug)]
pub struct SessionId(pub u64);

/// Methods served by the demo server.
///
/// # Errors
///
/// Fails only if a namespace is registered twice.
pub fn server_router() -> Result<Router> {
    let mut router = Router::default();
    router.register(
        "Math",
        Methods::new()
            .method("Add", |_, (a, b): (i64, i64)| async move { Ok(a + b) })
            .method("Div", |_, (a, b): (i64, i64)| async move {
                a.checked_div(b)
                    .ok_or_else(|| Error::application(100, "division by zero"))
            }),
    )?;
    router.register(
        "Files",
        Methods::new().method(
            "Upload",
            |ctx: Context, (name, mut reader): (String, ReaderParam)| async move {
                if !ctx.has_permission("write") && ctx.permissions().is_some() {
                    return Err(Error::application(403, "write permission required"));
                }
                let mut size = 0u64;
                let mut buf = vec![0u8; 64 * 1024];
                loop {
                    let n = reader
                        .read(&mut buf)
                        .await
                        .map_err(|e| Error::application(500, e.to_string()))?;
                    if n == 0 {
                        break;
                    }
                    size += n as u64;
                }
                tracing::info!(%name, size, "upload received");
                Ok(size)
            },
        ),
    )?;
    router.register(
        "Session",
        Methods::new().method("Greet", |ctx: Context, (): ()| async move {
            let Some(peer) = ctx.peer() else {
                return Err(Error::application(400, "greeting needs a duplex connection"));
            };
            let name: String = peer.call("Client.Name", vec![]).await?;
            let session = ctx.extensions.get::<SessionId>().map_or(0, |id| id.0);
            Ok(format!("hello {name} (session {session})!"))
        }),
    )?;
    router.alias_method("Math.Plus", "Math.Add")?;
    Ok(router)
}

/// Reverse-client hook of the demo server: numbers every duplex connection.
#[derive(Default)]
pub struct Sessions {
    next: AtomicU64,
}

impl Sessions {
    pub fn open(&self, mut ctx: Context, peer: &Peer) -> Context {
        let id = self.next.fetch_add(1, Ordering::AcqRel);
        tracing::info!(session = id, addr = ?ctx.remote_addr(), ?peer, "duplex client connected");
        ctx.extensions.insert(SessionId(id));
        ctx
    }
}

/// Methods a demo client serves to the server.
///
/// # Errors
///
/// Fails only if a namespace is registered twice.
pub fn client_router(name: String) -> Result<Router> {
    let mut router = Router::default();
    router.register(
        "Client",
        Methods::new().method("Name", move |_, (): ()| {
            let name = name.clone();
            async move { Ok(name) }
        }),
    )?;
    Ok(router)
}
