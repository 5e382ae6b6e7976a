//! Hyper server setup and request handling.

use std::net::SocketAddr;
use std::sync::Arc;

use harness_core::{guard, Error, Result, SchedulerHandle, UnitHandle};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming as IncomingBody};
use hyper::{Request, Response, Result as HyperResult};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnectionBuilder;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use super::router::Router;
use crate::config::ServiceConfig;
use crate::service::CustomerService;

/// A running API server. Dropping it stops accepting connections.
pub struct ApiServer {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    accept_loop: UnitHandle<()>,
}

impl ApiServer {
    /// Binds `addr` (port 0 picks a free port) and serves on the scheduler's
    /// non-blocking pool.
    pub fn start(
        scheduler: &SchedulerHandle,
        addr: SocketAddr,
        service: CustomerService,
        config: ServiceConfig,
    ) -> Result<Self> {
        let listener = guard::blocking_io("TcpListener::bind", || std::net::TcpListener::bind(addr))
            .map_err(|e| Error::IoError(format!("Failed to bind {}: {}", addr, e)))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| Error::IoError(format!("Failed to configure listener: {}", e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::IoError(format!("Failed to read listener address: {}", e)))?;

        let router = Arc::new(Router::new(service, config));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let connections = scheduler.clone();
        let accept_loop = scheduler.spawn(async move {
            let listener = match TcpListener::from_std(listener) {
                Ok(listener) => listener,
                Err(e) => {
                    tracing::error!(%local_addr, "Failed to register listener: {}", e);
                    return;
                }
            };
            serve(listener, router, connections, shutdown_rx).await;
        });

        tracing::info!(%local_addr, "Customer API listening");
        Ok(Self {
            local_addr,
            shutdown: Some(shutdown_tx),
            accept_loop,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// Stops accepting connections.
    pub fn shutdown(mut self) {
        self.signal_shutdown();
    }

    fn signal_shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
            tracing::info!(local_addr = %self.local_addr, "Customer API shutting down");
        }
    }
}

impl Drop for ApiServer {
    fn drop(&mut self) {
        self.signal_shutdown();
        if !self.accept_loop.is_finished() {
            self.accept_loop.cancel();
        }
    }
}

async fn serve(
    listener: TcpListener,
    router: Arc<Router>,
    connections: SchedulerHandle,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = &mut shutdown => return,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!("Failed to accept connection: {}", e);
                    continue;
                }
            },
        };
        let io = TokioIo::new(stream);
        let router = Arc::clone(&router);

        // each connection is its own non-blocking unit
        connections.spawn(async move {
            let builder = ConnectionBuilder::new(TokioExecutor::new());
            if let Err(err) = builder
                .serve_connection(
                    io,
                    hyper::service::service_fn(move |req| handle_request(req, router.clone())),
                )
                .await
            {
                tracing::debug!(%peer, "Error serving connection: {}", err);
            }
        });
    }
}

async fn handle_request(
    req: Request<IncomingBody>,
    router: Arc<Router>,
) -> HyperResult<Response<Full<Bytes>>> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let response = match router.route(req).await {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(%method, path = %path, "Error handling request: {}", err);
            err.into()
        }
    };
    tracing::debug!(%method, path = %path, status = response.status().as_u16(), "Request handled");
    Ok(response.map(Full::new))
}
