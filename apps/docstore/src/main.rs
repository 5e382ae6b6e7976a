//! Disposable JSON document store.
//!
//! Serves collections of JSON documents over HTTP for end-to-end suites.
//! With `--data-dir` every write is flushed to a checksummed snapshot that
//! is reloaded on the next start; with `--lifeline` the process exits when
//! its stdin closes, so it never outlives the harness that launched it.

mod config;
mod error;
mod handlers;
mod persistence;
mod response;
mod router;
mod server;
mod store;

use std::io::Read;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use crate::config::StoreConfig;
use crate::persistence::SnapshotStore;
use crate::router::Router;
use crate::server::Server;
use crate::store::DocumentStore;

/// Command-line arguments for the document store.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 27017)]
    port: u16,

    /// Host address to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Snapshot directory; omit to keep data in memory only
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Username required on collection routes
    #[arg(long, requires = "password")]
    username: Option<String>,

    #[arg(long)]
    password: Option<String>,

    /// Exit when stdin reaches end of file
    #[arg(long)]
    lifeline: bool,

    /// Request timeout in milliseconds
    #[arg(long, default_value_t = 5000)]
    request_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // stdout is not captured by the harness
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = StoreConfig {
        data_dir: args.data_dir.clone(),
        username: args.username.clone(),
        password: args.password.clone(),
        request_timeout_ms: args.request_timeout_ms,
    };

    let store = match &config.data_dir {
        Some(dir) => DocumentStore::open(SnapshotStore::new(dir))
            .with_context(|| format!("Failed to open data directory {}", dir.display()))?,
        None => DocumentStore::in_memory(),
    };
    let store = Arc::new(store);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", args.host, args.port))?;
    let server = Server::bind(addr, Router::new(Arc::clone(&store), config))
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!(
        addr = %server.local_addr()?,
        persistent = args.data_dir.is_some(),
        authenticated = args.username.is_some(),
        collections = store.collection_names().len(),
        "docstore listening"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server_handle = tokio::spawn(server.serve(shutdown_rx));

    wait_for_shutdown(args.lifeline).await;
    tracing::info!("Shutting down");
    let _ = shutdown_tx.send(true);

    match server_handle.await {
        Ok(result) => result.context("Server error")?,
        Err(e) => return Err(e).context("Server task failed"),
    }
    Ok(())
}

/// Resolves on ctrl-c, SIGTERM, or stdin EOF when `lifeline` is set.
async fn wait_for_shutdown(lifeline: bool) {
    let lifeline_closed = async {
        if !lifeline {
            return std::future::pending::<()>().await;
        }
        // a detached thread, so a pending read never holds up runtime shutdown
        let (tx, rx) = tokio::sync::oneshot::channel();
        let spawned = std::thread::Builder::new()
            .name("lifeline".to_string())
            .spawn(move || {
                let mut stdin = std::io::stdin().lock();
                let mut buf = [0u8; 256];
                while matches!(stdin.read(&mut buf), Ok(n) if n > 0) {}
                let _ = tx.send(());
            });
        match spawned {
            Ok(_) => {
                let _ = rx.await;
            }
            Err(e) => {
                tracing::warn!("Failed to watch lifeline: {}", e);
                std::future::pending::<()>().await
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("Received ctrl-c"),
        _ = terminate() => tracing::info!("Received SIGTERM"),
        _ = lifeline_closed => tracing::info!("Lifeline closed"),
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await
}
