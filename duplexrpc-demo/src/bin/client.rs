use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use clap::Parser;
use duplexrpc::{Client, ClientConfig, Result};
use duplexrpc_demo::client_router;
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Base URL of the server's RPC resource.
    #[arg(default_value = "http://127.0.0.1:8000/rpc/v0")]
    pub url: String,

    /// Bearer token.
    #[arg(long)]
    pub token: Option<String>,

    /// Name announced to the server.
    #[arg(short, long, default_value = "alice")]
    pub value: String,

    /// Upload this file as a streamed argument.
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Enable stress testing.
    #[arg(long, default_value_t = false)]
    pub stress: bool,

    /// Stress testing duration.
    #[arg(long, default_value = "60")]
    pub secs: u64,

    /// The number of coroutines.
    #[arg(long, default_value = "32")]
    pub coroutines: usize,
}

#[derive(Default)]
struct Counters {
    total: AtomicUsize,
    fails: AtomicUsize,
}

async fn stress_test(args: Args, client: Arc<Client>) -> Result<()> {
    let counters = Arc::new(Counters::default());
    let start_time = std::time::Instant::now();
    let peer = client.connect(client_router(args.value.clone())?).await?;
    let secs = args.secs;
    let mut tasks = vec![];
    for idx in 0..args.coroutines {
        let counters = counters.clone();
        let client = client.clone();
        let peer = peer.clone();
        tasks.push(tokio::spawn(async move {
            while start_time.elapsed().as_secs() < secs {
                for n in 0..256i64 {
                    let params = vec![json!(n), json!(1)];
                    // alternate between the unary and duplex transports.
                    let result = if idx % 2 == 0 {
                        client.call::<i64>("Math.Add", params).await
                    } else {
                        peer.call::<i64>("Math.Add", params).await
                    };
                    counters.total.fetch_add(1, Ordering::AcqRel);
                    if result.is_err() {
                        counters.fails.fetch_add(1, Ordering::AcqRel);
                    }
                }
            }
        }));
    }
    tokio::select! {
        _ = async {
            for task in tasks {
                if let Err(e) = task.await {
                    tracing::error!("stress task failed: {e}");
                }
            }
        } => {
        }
        _ = async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                let total = counters.total.swap(0, Ordering::AcqRel);
                let fails = counters.fails.swap(0, Ordering::AcqRel);
                tracing::info!("QPS: {total}/s, fails: {fails}/s");
            }
        } => {
        }
    }
    peer.close();
    peer.closed().await;
    Ok(())
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
    let config = ClientConfig {
        token: args.token.clone(),
        ..ClientConfig::default()
    };
    let client = Arc::new(Client::new(&args.url, config)?);

    if args.stress {
        return stress_test(args, client).await;
    }

    let rsp = client.call::<i64>("Math.Add", vec![json!(2), json!(3)]).await;
    tracing::info!("add rsp: {:?}", rsp);

    let peer = client.connect(client_router(args.value.clone())?).await?;
    let rsp = peer.call::<String>("Session.Greet", vec![]).await;
    tracing::info!("greet rsp: {:?}", rsp);

    if let Some(path) = &args.file {
        let file = tokio::fs::File::open(path).await.map_err(|e| {
            duplexrpc::Error::new(
                duplexrpc::ErrorKind::InvalidArgument,
                format!("{}: {e}", path.display()),
            )
        })?;
        let id = client.reader_encoder().encode(file);
        let name = path.display().to_string();
        let rsp = peer
            .call::<u64>("Files.Upload", vec![json!(name), json!(id)])
            .await;
        tracing::info!("upload rsp: {:?}", rsp);
    }

    peer.close();
    peer.closed().await;
    Ok(())
}
