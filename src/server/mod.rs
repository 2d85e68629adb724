mod admin;
pub mod bootstrap;
pub mod runtime;

pub use admin::AdminState;

use anyhow::Result;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{error, info};

/// Serves the gate admin HTTP surface until `shutdown` is notified.
pub async fn run_admin_server(
    listen: &str,
    state: AdminState,
    shutdown: std::sync::Arc<Notify>,
) -> Result<()> {
    let addr: SocketAddr = listen.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("server: admin listening, addr={}", addr);

    loop {
        tokio::select! {
            _ = shutdown.notified() => return Ok(()),
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let state = state.clone();

                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let svc = service_fn(move |req: Request<Incoming>| {
                        let state = state.clone();
                        async move { admin::handle_admin(req, state).await }
                    });

                    if let Err(e) = auto::Builder::new(TokioExecutor::new())
                        .http1()
                        .keep_alive(true)
                        .serve_connection_with_upgrades(io, svc)
                        .await
                    {
                        if !e.to_string().contains("connection closed") {
                            error!("server: admin: connection error, error={}", e);
                        }
                    }
                });
            }
        }
    }
}
