//! HTTP output listener
//!
//! Handles the TCP accept loop and starts a connection worker per client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::registry::ConnectionRegistry;
use crate::route::{Route, RouteBinding};
use crate::scheduler::{Worker, WorkerId};
use crate::server::connection::ConnectionWorker;

/// Pause after a failed accept (e.g. out of file descriptors)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accepts clients on the output address
pub struct AcceptWorker {
    id: WorkerId,
    binding: RouteBinding,
    listener: Mutex<Option<TcpListener>>,
    registry: Arc<ConnectionRegistry>,
    connection_semaphore: Option<Arc<Semaphore>>,
    cancel: CancellationToken,
}

impl AcceptWorker {
    /// Create an accept worker for `addr`. Nothing is bound until it is started.
    pub fn new(addr: SocketAddr, registry: Arc<ConnectionRegistry>) -> Result<Arc<Self>> {
        let route = Route::tcp(addr.ip().to_string(), addr.port()).name("output");
        let binding = RouteBinding::with_route(route)?;

        let max_connections = registry.config().max_connections;
        let connection_semaphore = if max_connections > 0 {
            Some(Arc::new(Semaphore::new(max_connections)))
        } else {
            None
        };

        Ok(Arc::new(Self {
            id: WorkerId::new(),
            binding,
            listener: Mutex::new(None),
            registry,
            connection_semaphore,
            cancel: CancellationToken::new(),
        }))
    }

    /// Bound address, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.binding.local_addr()
    }

    async fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        if let Err(e) = self.configure_socket(&socket) {
            tracing::error!(peer = %peer_addr, error = %e, "Failed to configure socket");
            return;
        }

        let worker = ConnectionWorker::new(socket, peer_addr, self.registry.clone(), permit);
        tracing::debug!(connection = %worker.id(), peer = %peer_addr, "New connection");

        if let Err(e) = self.registry.scheduler().start(worker).await {
            tracing::error!(peer = %peer_addr, error = %e, "Failed to start connection");
        }
    }

    fn configure_socket(&self, socket: &TcpStream) -> std::io::Result<()> {
        if self.registry.config().tcp_nodelay {
            socket.set_nodelay(true)?;
        }
        Ok(())
    }
}

#[async_trait]
impl Worker for AcceptWorker {
    fn id(&self) -> WorkerId {
        self.id
    }

    fn kind(&self) -> &'static str {
        "accept"
    }

    async fn init(&self) -> Result<()> {
        let listener = self.binding.bind_tcp().await?;
        tracing::info!(addr = ?self.binding.local_addr(), "HTTP output listening");
        *self.listener.lock().await = Some(listener);
        Ok(())
    }

    async fn run(self: Arc<Self>) {
        let Some(listener) = self.listener.lock().await.take() else {
            tracing::warn!("Accept worker started without a listener");
            return;
        };

        loop {
            let accepted = tokio::select! {
                _ = self.cancel.cancelled() => break,
                res = listener.accept() => res,
            };

            match accepted {
                Ok((socket, peer_addr)) => self.handle_connection(socket, peer_addr).await,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                    }
                }
            }
        }

        drop(listener);
        self.binding.release();
        tracing::debug!("HTTP output listener closed");
    }

    fn stop(&self) {
        self.cancel.cancel();
    }
}
