//! Per-input and per-connection registry entries
//!
//! Each registered input owns a slot holding its worker and the outlets of
//! the connections attached to it. An outlet is the registry's end of a
//! connection's private queue.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::input::InputWorker;
use crate::scheduler::WorkerId;
use crate::stats::{ConnectionStats, RateSample};

use super::key::PathKey;

/// Counters and signals shared between an outlet and its connection worker
#[derive(Debug)]
pub struct OutletState {
    /// Connection (worker) id
    pub id: WorkerId,
    /// Client address
    pub peer: Option<SocketAddr>,
    buffered: AtomicUsize,
    bytes_sent: AtomicU64,
    rate: RateSample,
    overflow: CancellationToken,
    created_at: Instant,
}

impl OutletState {
    pub(crate) fn new(id: WorkerId, peer: Option<SocketAddr>) -> Self {
        Self {
            id,
            peer,
            buffered: AtomicUsize::new(0),
            bytes_sent: AtomicU64::new(0),
            rate: RateSample::new(),
            overflow: CancellationToken::new(),
            created_at: Instant::now(),
        }
    }

    /// Bytes queued but not yet written
    pub fn buffered(&self) -> usize {
        self.buffered.load(Ordering::Acquire)
    }

    /// Total bytes written to the client
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Output bytes/second since the previous call
    pub fn rate(&self) -> f64 {
        self.rate.take_rate()
    }

    /// Record that `len` queued bytes were written to the client
    pub fn written(&self, len: usize) {
        self.buffered.fetch_sub(len, Ordering::AcqRel);
        self.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
        self.rate.add(len);
    }

    /// Record that `len` queued bytes were discarded
    pub fn discarded(&self, len: usize) {
        self.buffered.fetch_sub(len, Ordering::AcqRel);
    }

    /// Resolves once the queue overflowed
    pub fn overflow(&self) -> &CancellationToken {
        &self.overflow
    }

    pub fn is_overflowed(&self) -> bool {
        self.overflow.is_cancelled()
    }

    pub(crate) fn snapshot(&self, key: &PathKey) -> ConnectionStats {
        ConnectionStats {
            id: self.id.as_uuid(),
            peer: self.peer,
            path: key.to_string(),
            bytes_sent: self.bytes_sent(),
            buffered: self.buffered(),
            duration: self.created_at.elapsed(),
        }
    }
}

/// Registry end of one connection's private queue
pub(crate) struct Outlet {
    tx: mpsc::UnboundedSender<Bytes>,
    state: Arc<OutletState>,
}

/// Outcome of offering a unit to an outlet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Offer {
    Queued,
    Overflow,
    Closed,
}

impl Outlet {
    pub(crate) fn new(state: Arc<OutletState>) -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, state }, rx)
    }

    pub(crate) fn state(&self) -> &Arc<OutletState> {
        &self.state
    }

    /// Queue `unit` unless more than `cap` bytes are already waiting
    pub(crate) fn offer(&self, unit: Bytes, cap: usize) -> Offer {
        if self.state.is_overflowed() {
            return Offer::Overflow;
        }
        if self.state.buffered() > cap {
            self.state.overflow.cancel();
            return Offer::Overflow;
        }

        let len = unit.len();
        self.state.buffered.fetch_add(len, Ordering::AcqRel);
        if self.tx.send(unit).is_err() {
            self.state.discarded(len);
            return Offer::Closed;
        }
        Offer::Queued
    }
}

/// A registered input and its attached connections
pub(crate) struct InputSlot {
    pub(crate) worker: Arc<InputWorker>,
    pub(crate) connections: HashMap<WorkerId, Outlet>,
}

impl InputSlot {
    pub(crate) fn new(worker: Arc<InputWorker>) -> Self {
        Self {
            worker,
            connections: HashMap::new(),
        }
    }

    /// Output bytes/second summed over every connection
    pub(crate) fn output_rate(&self) -> f64 {
        self.connections.values().map(|o| o.state.rate()).sum()
    }
}
