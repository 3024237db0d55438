use std::{net::SocketAddr, sync::Arc};

use hyper::{Request, body::Incoming, server::conn::http1::Builder};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::DropGuard;

use crate::{Error, ErrorKind, Result, State, TaskSupervisor, http};

/// Accepts TCP connections and serves HTTP/1.1 (with upgrades) on them.
pub struct Listener {
    task_supervisor: TaskSupervisor,
    http: Builder,
}

impl Default for Listener {
    fn default() -> Self {
        Self::new()
    }
}

impl Listener {
    #[must_use]
    pub fn new() -> Self {
        let mut http = Builder::new();
        http.keep_alive(true);
        Self {
            task_supervisor: TaskSupervisor::default(),
            http,
        }
    }

    /// # Errors
    ///
    /// `TcpBindFailed` if `addr` cannot be bound.
    pub async fn start_listen(&self, addr: SocketAddr, state: &Arc<State>) -> Result<SocketAddr> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::new(ErrorKind::TcpBindFailed, e.to_string()))?;
        let listener_addr = listener
            .local_addr()
            .map_err(|e| Error::new(ErrorKind::TcpBindFailed, e.to_string()))?;

        let state = state.clone();
        let supervisor = self.task_supervisor.clone();
        let http = self.http.clone();
        self.task_supervisor.spawn(|stop| async move {
            tracing::info!("start listening: {listener_addr}");
            loop {
                tokio::select! {
                    () = stop.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, addr)) => {
                            Self::serve_connection(&supervisor, &http, &state, stream, addr);
                        }
                        Err(e) => tracing::error!("accept on {listener_addr} failed: {e}"),
                    },
                }
            }
            tracing::info!("stop accept loop: {listener_addr}");
        });

        Ok(listener_addr)
    }

    fn serve_connection(
        supervisor: &TaskSupervisor,
        http: &Builder,
        state: &Arc<State>,
        stream: TcpStream,
        addr: SocketAddr,
    ) {
        let state = state.clone();
        let http = http.clone();
        let service_supervisor = supervisor.clone();
        supervisor.spawn(move |stop| async move {
            let requests = stop.clone();
            let service = hyper::service::service_fn(move |req: Request<Incoming>| {
                http::handle_request(
                    state.clone(),
                    service_supervisor.clone(),
                    req,
                    addr,
                    requests.clone(),
                )
            });
            let connection = http
                .serve_connection(TokioIo::new(stream), service)
                .with_upgrades();
            tokio::pin!(connection);

            let result = tokio::select! {
                r = connection.as_mut() => r,
                () = stop.cancelled() => {
                    connection.as_mut().graceful_shutdown();
                    connection.await
                }
            };
            if let Err(e) = result {
                tracing::debug!("connection from {addr} ended: {e}");
            }
        });
    }

    pub fn stop(&self) {
        self.task_supervisor.stop();
    }

    #[must_use]
    pub fn drop_guard(&self) -> DropGuard {
        self.task_supervisor.drop_guard()
    }

    pub async fn join(&self) {
        self.task_supervisor.join().await;
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("running", &self.task_supervisor.running())
            .finish()
    }
}
