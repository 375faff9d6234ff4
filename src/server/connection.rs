//! Per-client connection worker
//!
//! Parses the request, answers it, and for GET streams the client's private
//! queue to the socket until the client goes away, hangs, falls behind or
//! is stopped. A connection never stops itself through the scheduler; on
//! exit it detaches from the registry, which schedules the stop.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, OwnedSemaphorePermit};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::registry::{Attachment, ConnectionRegistry, PathKey};
use crate::scheduler::{Worker, WorkerId};

use super::request::{not_found_response, ok_response, read_request, Method, Request};

/// Serves one HTTP client
pub struct ConnectionWorker {
    id: WorkerId,
    peer: SocketAddr,
    socket: Mutex<Option<TcpStream>>,
    registry: Arc<ConnectionRegistry>,
    cancel: CancellationToken,
    _permit: Option<OwnedSemaphorePermit>,
}

impl ConnectionWorker {
    pub fn new(
        socket: TcpStream,
        peer: SocketAddr,
        registry: Arc<ConnectionRegistry>,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: WorkerId::new(),
            peer,
            socket: Mutex::new(Some(socket)),
            registry,
            cancel: CancellationToken::new(),
            _permit: permit,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    async fn read_request(&self, socket: &mut TcpStream) -> Result<Request> {
        let config = self.registry.config();
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Stopped),
            res = timeout(config.request_timeout, read_request(socket, config.max_request_size)) => {
                res.map_err(|_| Error::Timeout("request"))?
            }
        }
    }

    async fn write(&self, socket: &mut TcpStream, data: &[u8]) -> Result<()> {
        let hang_timeout = self.registry.config().hang_timeout;
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Stopped),
            res = timeout(hang_timeout, socket.write_all(data)) => {
                res.map_err(|_| Error::Timeout("client write"))?.map_err(Error::from)
            }
        }
    }

    /// Answer the request. Sets `attached` once registered with an input.
    async fn serve(&self, socket: &mut TcpStream, attached: &mut Option<PathKey>) -> Result<()> {
        let request = self.read_request(socket).await?;
        tracing::debug!(
            connection = %self.id,
            peer = %self.peer,
            method = ?request.method,
            path = %request.path,
            "Request received"
        );

        let Some(media_type) = self.registry.resolve(&request.path).await else {
            tracing::debug!(connection = %self.id, path = %request.path, "No input for path");
            return self.write(socket, &not_found_response(request.version)).await;
        };

        if request.method == Method::Head {
            let response = ok_response(request.version, media_type.content_type());
            return self.write(socket, &response).await;
        }

        let key = PathKey::new(&request.path);
        let attachment = match self.registry.attach(&key, self.id, Some(self.peer)).await {
            Ok(attachment) => attachment,
            Err(Error::Registry(_)) => {
                // Deregistered between resolve and attach
                return self.write(socket, &not_found_response(request.version)).await;
            }
            Err(e) => return Err(e),
        };
        *attached = Some(key.clone());

        let response = ok_response(request.version, attachment.media_type.content_type());
        self.write(socket, &response).await?;
        self.stream(socket, &key, attachment).await
    }

    async fn stream(&self, socket: &mut TcpStream, key: &PathKey, attachment: Attachment) -> Result<()> {
        let Attachment { mut rx, state, .. } = attachment;
        let hang_timeout = self.registry.config().hang_timeout;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Error::Stopped),
                _ = state.overflow().cancelled() => None,
                res = timeout(hang_timeout, rx.recv()) => Some(res),
            };

            let unit = match next {
                None => {
                    tracing::warn!(
                        connection = %self.id,
                        peer = %self.peer,
                        path = %key,
                        buffered = state.buffered(),
                        "Client too slow, disconnecting"
                    );
                    return Ok(());
                }
                Some(Err(_)) => {
                    tracing::warn!(
                        connection = %self.id,
                        peer = %self.peer,
                        path = %key,
                        timeout_ms = hang_timeout.as_millis() as u64,
                        "No data for client within hang timeout"
                    );
                    return Ok(());
                }
                Some(Ok(None)) => {
                    tracing::debug!(connection = %self.id, path = %key, "Input released the connection");
                    return Ok(());
                }
                Some(Ok(Some(unit))) => unit,
            };

            let len = unit.len();
            tokio::select! {
                biased;
                _ = state.overflow().cancelled() => {
                    tracing::warn!(
                        connection = %self.id,
                        peer = %self.peer,
                        path = %key,
                        buffered = state.buffered(),
                        "Client too slow, disconnecting"
                    );
                    return Ok(());
                }
                res = self.write(socket, &unit) => match res {
                    Ok(()) => state.written(len),
                    Err(Error::Timeout(_)) => {
                        tracing::warn!(
                            connection = %self.id,
                            peer = %self.peer,
                            path = %key,
                            "Client accepted no data within hang timeout"
                        );
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                },
            }
        }
    }
}

#[async_trait]
impl Worker for ConnectionWorker {
    fn id(&self) -> WorkerId {
        self.id
    }

    fn kind(&self) -> &'static str {
        "connection"
    }

    async fn run(self: Arc<Self>) {
        let Some(mut socket) = self.socket.lock().await.take() else {
            return;
        };

        let mut attached = None;
        match self.serve(&mut socket, &mut attached).await {
            Ok(()) | Err(Error::Stopped) => {}
            Err(e) => {
                tracing::debug!(connection = %self.id, peer = %self.peer, error = %e, "Connection error");
            }
        }
        drop(socket);

        match attached {
            Some(key) => self.registry.detach(&key, self.id).await,
            None => self.registry.stop_queue().push(self.id),
        }
        tracing::debug!(connection = %self.id, peer = %self.peer, "Connection closed");
    }

    fn stop(&self) {
        self.cancel.cancel();
    }
}
