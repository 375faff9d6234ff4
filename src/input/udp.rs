//! UDP input loop and datagram byte source
//!
//! A UDP input holds no socket while nobody is watching. When the first
//! connection attaches, the gate opens, the socket is bound (joining the
//! multicast group if needed) and datagrams are read as one byte stream.
//! When the last connection detaches the socket is dropped again.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use tokio::net::UdpSocket;

use crate::media::{FramingReader, ReaderShared};

use super::{ActivationGate, InputPhase, InputWorker};

/// Largest datagram accepted
pub const MAX_DATAGRAM_SIZE: usize = 65536;

/// Presents the payloads of received datagrams as a continuous stream.
///
/// Zero-length datagrams are skipped. The sender of the latest datagram is
/// recorded as the input peer.
pub struct DatagramSource {
    socket: UdpSocket,
    buf: Box<[u8]>,
    pos: usize,
    len: usize,
    last_peer: Option<SocketAddr>,
    shared: Arc<ReaderShared>,
}

impl DatagramSource {
    pub fn new(socket: UdpSocket, shared: Arc<ReaderShared>) -> Self {
        Self {
            socket,
            buf: vec![0u8; MAX_DATAGRAM_SIZE].into_boxed_slice(),
            pos: 0,
            len: 0,
            last_peer: None,
            shared,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl AsyncRead for DatagramSource {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            if this.pos < this.len {
                let n = (this.len - this.pos).min(out.remaining());
                out.put_slice(&this.buf[this.pos..this.pos + n]);
                this.pos += n;
                return Poll::Ready(Ok(()));
            }

            let mut datagram = ReadBuf::new(&mut this.buf);
            let peer = ready!(this.socket.poll_recv_from(cx, &mut datagram))?;
            let n = datagram.filled().len();
            if n == 0 {
                continue;
            }

            this.pos = 0;
            this.len = n;
            if this.last_peer != Some(peer) {
                this.last_peer = Some(peer);
                this.shared.set_peer(Some(peer));
            }
        }
    }
}

impl InputWorker {
    pub(super) async fn run_udp(self: &Arc<Self>, gate: &ActivationGate) {
        loop {
            self.set_phase(InputPhase::Waiting);
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = gate.wait_open() => {}
            }

            self.set_phase(InputPhase::Binding);
            let socket = match self.binding.bind_udp().await {
                Ok(socket) => socket,
                Err(e) => {
                    tracing::error!(path = %self.key(), error = %e, "Failed to bind UDP input");
                    if !self.pause(self.wait_interval).await {
                        return;
                    }
                    continue;
                }
            };

            tracing::info!(
                path = %self.key(),
                local = ?self.binding.local_addr(),
                connections = gate.count(),
                "UDP input bound"
            );

            let shared = self.new_session(None);
            let source = DatagramSource::new(socket, shared.clone());
            let mut reader = FramingReader::with_shared(source, shared, self.cancel.child_token());
            gate.activate();
            let end = self.read_session(&mut reader, Some(gate)).await;

            // Connections attaching from here on wait for the next bind
            gate.reset();
            // Dropping the reader closes the socket and leaves any group
            drop(reader);
            self.binding.release();

            if !self.finish_session(end).await {
                return;
            }
        }
    }
}
