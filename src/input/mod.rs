//! Input workers
//!
//! An `InputWorker` owns the socket an input arrives on, frames it with a
//! `FramingReader` and dispatches every unit to the connections attached
//! to its path. It loops over sessions until stopped:
//!
//! - TCP: bind once, then accept a single source at a time.
//! - UDP: bind only while at least one connection wants data, tracked by
//!   an `ActivationGate`.
//!
//! When a session ends on its own (error or end-of-stream) every client on
//! the path is dropped so it reconnects and receives the next session's
//! header.

pub mod gate;
pub mod state;
pub mod tcp;
pub mod udp;

use std::future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::media::{FramingReader, MediaType, ReaderShared, Readiness};
use crate::registry::{ConnectionRegistry, PathKey, RegistryError};
use crate::route::{InputDescriptor, Protocol, RouteBinding};
use crate::scheduler::{Worker, WorkerId};
use crate::server::StreamerConfig;
use crate::sync::lock;

pub use gate::ActivationGate;
pub use state::{InputPhase, InputState};
pub use udp::DatagramSource;

enum Transport {
    Tcp {
        listener: tokio::sync::Mutex<Option<TcpListener>>,
    },
    Udp {
        gate: ActivationGate,
    },
}

/// How a reader session ended
#[derive(Debug)]
enum SessionEnd {
    /// The worker was stopped
    Stopped,
    /// UDP: the last connection went away
    GateClosed,
    /// End-of-stream (`None`) or an error
    Ended(Option<Error>),
}

/// Receives one input and feeds the registry
pub struct InputWorker {
    id: WorkerId,
    descriptor: Mutex<InputDescriptor>,
    binding: RouteBinding,
    transport: Transport,
    shared: Mutex<Arc<ReaderShared>>,
    state: Mutex<InputState>,
    registry: Weak<ConnectionRegistry>,
    cancel: CancellationToken,
    wait_interval: Duration,
    bind_timeout: Duration,
}

impl InputWorker {
    pub fn new(
        descriptor: InputDescriptor,
        registry: Weak<ConnectionRegistry>,
        config: &StreamerConfig,
    ) -> Result<Arc<Self>> {
        let transport = match descriptor.route.protocol {
            Protocol::Tcp => Transport::Tcp {
                listener: tokio::sync::Mutex::new(None),
            },
            Protocol::Udp => Transport::Udp {
                gate: ActivationGate::new(),
            },
        };

        let binding = RouteBinding::new();
        binding.replace_route(descriptor.route.clone())?;

        Ok(Arc::new(Self {
            id: WorkerId::new(),
            shared: Mutex::new(Arc::new(ReaderShared::new(descriptor.media_type))),
            descriptor: Mutex::new(descriptor),
            binding,
            transport,
            state: Mutex::new(InputState::new()),
            registry,
            cancel: CancellationToken::new(),
            wait_interval: config.wait_interval,
            bind_timeout: config.bind_timeout,
        }))
    }

    /// Current descriptor
    pub fn descriptor(&self) -> InputDescriptor {
        lock(&self.descriptor).clone()
    }

    pub fn key(&self) -> PathKey {
        lock(&self.descriptor).key()
    }

    pub fn media_type(&self) -> MediaType {
        lock(&self.descriptor).media_type
    }

    pub fn protocol(&self) -> Protocol {
        match self.transport {
            Transport::Tcp { .. } => Protocol::Tcp,
            Transport::Udp { .. } => Protocol::Udp,
        }
    }

    /// Shared state of the current (or last) reader session
    pub fn reader_shared(&self) -> Arc<ReaderShared> {
        lock(&self.shared).clone()
    }

    pub fn phase(&self) -> InputPhase {
        lock(&self.state).phase
    }

    /// Sessions started so far
    pub fn session_count(&self) -> u64 {
        lock(&self.state).sessions
    }

    /// Local address of the bound socket
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.binding.local_addr()
    }

    /// Number of times the socket was bound
    pub fn bind_count(&self) -> u64 {
        self.binding.bind_count()
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_bound()
    }

    /// A connection attached to this input.
    ///
    /// For UDP this opens the gate and waits, up to the bind timeout, until
    /// a socket that will serve this connection is bound, so the first
    /// datagrams are not lost.
    pub async fn connection_added(&self) {
        if let Transport::Udp { gate } = &self.transport {
            let count = gate.open();
            tracing::debug!(path = %self.key(), connections = count, "Got connection for UDP input");

            if !gate.wait_active(self.bind_timeout).await {
                tracing::warn!(
                    path = %self.key(),
                    timeout_ms = self.bind_timeout.as_millis() as u64,
                    "UDP input not bound within timeout"
                );
            }
        }
    }

    /// A connection detached from this input
    pub fn connection_removed(&self) {
        if let Transport::Udp { gate } = &self.transport {
            let count = gate.close();
            tracing::debug!(path = %self.key(), connections = count, "Lost connection for UDP input");
        }
    }

    /// Replace the descriptor. Only UDP inputs accept this, and only when
    /// the protocol is unchanged; the new route is used on the next bind.
    pub fn update_descriptor(&self, descriptor: InputDescriptor) -> Result<()> {
        let current = self.key();
        if let Transport::Tcp { .. } = self.transport {
            return Err(RegistryError::RouteImmutable(current).into());
        }
        if descriptor.route.protocol != self.protocol() {
            return Err(RegistryError::ProtocolMismatch(current).into());
        }

        self.binding.replace_route(descriptor.route.clone())?;
        *lock(&self.descriptor) = descriptor;
        Ok(())
    }

    fn set_phase(&self, phase: InputPhase) {
        lock(&self.state).enter(phase);
    }

    /// Fresh reader state for a new session
    fn new_session(&self, peer: Option<SocketAddr>) -> Arc<ReaderShared> {
        let shared = Arc::new(ReaderShared::new(self.media_type()));
        shared.set_peer(peer);
        *lock(&self.shared) = shared.clone();
        lock(&self.state).start_session(peer);
        shared
    }

    /// Sleep for `delay` unless stopped first. Returns `false` if stopped.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Read units until the session ends
    ///
    /// A gated session ends once the gate could be released with no
    /// connection attached. Between units that happens as soon as the gate
    /// closes; inside a unit the reader gets one wait interval to finish it.
    async fn read_session(&self, reader: &mut FramingReader, gate: Option<&ActivationGate>) -> SessionEnd {
        loop {
            let readiness = tokio::select! {
                _ = gate_closed(gate) => {
                    if release(gate) {
                        return SessionEnd::GateClosed;
                    }
                    continue;
                }
                res = reader.poll(self.wait_interval) => res,
            };

            match readiness {
                Ok(Readiness::Ready) => {}
                Ok(Readiness::Idle) => {
                    tracing::debug!(
                        path = %self.key(),
                        peer = ?reader.peer(),
                        wait_secs = self.wait_interval.as_secs(),
                        "No input data within wait interval"
                    );
                    continue;
                }
                Err(Error::Stopped) => return SessionEnd::Stopped,
                Err(e) => return SessionEnd::Ended(Some(e)),
            }

            let unit = {
                let next = reader.next_unit();
                tokio::pin!(next);
                loop {
                    tokio::select! {
                        res = &mut next => break res,
                        _ = gate_idle(gate, self.wait_interval) => {
                            if release(gate) {
                                return SessionEnd::GateClosed;
                            }
                        }
                    }
                }
            };

            match unit {
                Ok(unit) if unit.is_empty() => return SessionEnd::Ended(None),
                Ok(unit) => {
                    let Some(registry) = self.registry.upgrade() else {
                        return SessionEnd::Stopped;
                    };
                    registry.dispatch(&self.key(), unit).await;
                }
                Err(Error::Stopped) => return SessionEnd::Stopped,
                Err(e) => return SessionEnd::Ended(Some(e)),
            }
        }
    }

    /// Tear down after a session. Returns `false` if the worker must exit.
    async fn finish_session(&self, end: SessionEnd) -> bool {
        let key = self.key();
        match end {
            SessionEnd::Stopped => {
                lock(&self.state).end_session(None);
                false
            }
            SessionEnd::GateClosed => {
                lock(&self.state).end_session(None);
                tracing::debug!(path = %key, "No output connections, stop receiving");
                true
            }
            SessionEnd::Ended(error) => {
                match &error {
                    Some(e) if e.is_fatal() => {
                        tracing::error!(path = %key, error = %e, "Fatal framing error, resetting input session");
                    }
                    Some(e) => {
                        tracing::warn!(path = %key, error = %e, "Input session failed");
                    }
                    None => {
                        tracing::info!(path = %key, "Input source closed the stream");
                    }
                }
                lock(&self.state).end_session(error.map(|e| e.to_string()));

                if self.cancel.is_cancelled() {
                    return false;
                }
                if let Some(registry) = self.registry.upgrade() {
                    registry.drop_connections(&key).await;
                }
                true
            }
        }
    }
}

/// Resolves when the gate closes; never for ungated inputs
async fn gate_closed(gate: Option<&ActivationGate>) {
    match gate {
        Some(gate) => gate.wait_closed().await,
        None => future::pending().await,
    }
}

/// Resolves once the gate has been closed for `grace`
async fn gate_idle(gate: Option<&ActivationGate>, grace: Duration) {
    gate_closed(gate).await;
    tokio::time::sleep(grace).await;
}

fn release(gate: Option<&ActivationGate>) -> bool {
    gate.map_or(false, ActivationGate::deactivate)
}

#[async_trait]
impl Worker for InputWorker {
    fn id(&self) -> WorkerId {
        self.id
    }

    fn kind(&self) -> &'static str {
        match self.transport {
            Transport::Tcp { .. } => "tcp-input",
            Transport::Udp { .. } => "udp-input",
        }
    }

    async fn init(&self) -> Result<()> {
        match &self.transport {
            Transport::Tcp { listener } => {
                let bound = self.binding.bind_tcp().await?;
                tracing::info!(
                    path = %self.key(),
                    addr = ?self.binding.local_addr(),
                    "TCP input listening"
                );
                *listener.lock().await = Some(bound);
            }
            Transport::Udp { .. } => {
                // Nothing is bound until a connection wants data
                self.binding.release();
                self.set_phase(InputPhase::Waiting);
            }
        }
        Ok(())
    }

    async fn run(self: Arc<Self>) {
        match &self.transport {
            Transport::Tcp { listener } => {
                let bound = listener.lock().await.take();
                self.run_tcp(bound).await;
            }
            Transport::Udp { gate } => self.run_udp(gate).await,
        }

        self.binding.release();
        lock(&self.state).stop();
        tracing::debug!(path = %self.key(), "Input worker stopped");
    }

    fn stop(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::Route;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    fn config() -> StreamerConfig {
        StreamerConfig::default().wait_interval(Duration::from_millis(50))
    }

    async fn wait_until(check: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_invalid_route_is_rejected() {
        let descriptor = InputDescriptor::new("/x", Route::tcp("", 0), MediaType::Text);
        assert!(InputWorker::new(descriptor, Weak::new(), &config()).is_err());
    }

    #[tokio::test]
    async fn test_fatal_header_returns_to_accepting() {
        let descriptor = InputDescriptor::new("/flv", Route::tcp("127.0.0.1", 0), MediaType::Flv);
        let worker = InputWorker::new(descriptor, Weak::new(), &config()).unwrap();
        worker.init().await.unwrap();
        let addr = worker.local_addr().unwrap();
        let task = tokio::spawn(worker.clone().run());

        wait_until(|| worker.phase() == InputPhase::Accepting).await;

        let mut source = TcpStream::connect(addr).await.unwrap();
        source
            .write_all(&[0x46, 0x4C, 0x56, 0x01, 0x05, 0, 0, 0, 0x07, 0, 0, 0, 0])
            .await
            .unwrap();

        wait_until(|| worker.session_count() == 1 && worker.phase() == InputPhase::Accepting).await;
        assert!(lock(&worker.state).last_error.is_some());
        assert_eq!(&worker.reader_shared().header()[..], &crate::media::flv::SYNTHETIC_HEADER[..]);

        // The listener is kept, so the next source is accepted
        let _next = TcpStream::connect(addr).await.unwrap();
        wait_until(|| worker.session_count() == 2).await;

        worker.stop();
        task.await.unwrap();
        assert_eq!(worker.phase(), InputPhase::Stopped);
    }
}
