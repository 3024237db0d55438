use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use duplexrpc::{Context, Error, ErrorKind, Peer, Permissions, Result, Server, ServerConfig};
use duplexrpc_demo::{Sessions, server_router};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Listen address.
    #[arg(default_value = "0.0.0.0:8000")]
    pub addr: std::net::SocketAddr,

    /// JSON file with the server config.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Require this bearer token from every request.
    #[arg(long)]
    pub token: Option<String>,
}

fn load_config(path: Option<&PathBuf>) -> Result<ServerConfig> {
    let Some(path) = path else {
        return Ok(ServerConfig::default());
    };
    let content = std::fs::read(path)
        .map_err(|e| Error::new(ErrorKind::InvalidArgument, format!("{}: {e}", path.display())))?;
    Ok(serde_json::from_slice(&content)?)
}

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    let sessions = Arc::new(Sessions::default());
    let mut builder = Server::builder(server_router()?, config).with_reverse_client_builder(
        move |ctx: Context, peer: Peer| {
            let sessions = sessions.clone();
            async move { Ok::<_, Error>(sessions.open(ctx, &peer)) }
        },
    );
    if let Some(expected) = args.token {
        builder = builder.with_verifier(move |token: String| {
            let granted = token == expected;
            async move {
                if granted {
                    Ok(Permissions::from(["read".to_string(), "write".to_string()]))
                } else {
                    Err(Error::new(ErrorKind::Unauthorized, "unknown token".into()))
                }
            }
        });
    }
    let server = builder.build()?;

    let addr = server.listen(args.addr).await?;
    tracing::info!(
        "Serving {:?} on http://{addr}{}...",
        server.state().router.method_names().collect::<Vec<_>>(),
        server.state().config.base_path,
    );

    server.join().await;
    Ok(())
}
