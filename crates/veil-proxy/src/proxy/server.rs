//! ProxyServer struct and main run loop.

use super::context::ProxyState;
use super::handler::{handle_request, ADMIN_PREFIX};
use crate::config::{Config, ConfigStore};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// The main proxy server struct.
pub struct ProxyServer {
    addr: SocketAddr,
    state: Arc<ProxyState>,
}

impl ProxyServer {
    /// Create a new ProxyServer from configuration and an already loaded store.
    pub fn new(config: &Config, store: Arc<ConfigStore>) -> Result<Self, anyhow::Error> {
        Ok(Self {
            addr: config.listen.socket_addr(),
            state: Arc::new(ProxyState::new(config, store)?),
        })
    }

    pub fn state(&self) -> &Arc<ProxyState> {
        &self.state
    }

    /// Bind the configured address and serve until the process exits.
    pub async fn run(self) -> Result<(), anyhow::Error> {
        self.run_until(std::future::pending()).await
    }

    /// Bind the configured address and serve until `shutdown` completes.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), anyhow::Error>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind {}: {e}", self.addr))?;
        self.serve(listener, shutdown).await
    }

    /// Accept connections from `listener` until `shutdown` completes.
    /// Connections already accepted keep running to completion.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), anyhow::Error>
    where
        F: Future<Output = ()>,
    {
        let addr = listener.local_addr()?;
        info!("Listening on http://{}", addr);
        info!("Proxying to {}", self.state.upstream.base_url());
        info!("Admin routes under {}", ADMIN_PREFIX);

        tokio::pin!(shutdown);

        loop {
            let (stream, remote_addr) = tokio::select! {
                accepted = listener.accept() => accepted?,
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting connections");
                    return Ok(());
                }
            };
            debug!("Accepted connection from {}", remote_addr);

            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| handle_request(Arc::clone(&state), req));

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving connection from {}: {}", remote_addr, err);
                }
            });
        }
    }
}
