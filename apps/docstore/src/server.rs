//! Hyper server setup and request handling.

use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming as IncomingBody};
use hyper::{Request, Response, Result as HyperResult};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnectionBuilder;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::router::Router;

/// HTTP server for the document store.
pub struct Server {
    listener: TcpListener,
    router: Arc<Router>,
}

impl Server {
    pub async fn bind(addr: SocketAddr, router: Router) -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            router: Arc::new(router),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` flips to true.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> Result<(), std::io::Error> {
        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => return Ok(()),
                accepted = self.listener.accept() => accepted?,
            };
            let io = TokioIo::new(stream);
            let router = Arc::clone(&self.router);

            tokio::task::spawn(async move {
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
            tracing::debug!(%method, path = %path, "Error handling request: {}", err);
            err.into()
        }
    };
    tracing::trace!(%method, path = %path, status = response.status().as_u16(), "Request handled");
    Ok(response.map(Full::new))
}
