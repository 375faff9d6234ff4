//! Streamer facade
//!
//! Wires the scheduler, the stop queue consumer, the connection registry
//! and the accept worker together and exposes input registration.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::registry::ConnectionRegistry;
use crate::route::InputDescriptor;
use crate::scheduler::{Scheduler, StopQueue, Worker};
use crate::server::config::StreamerConfig;
use crate::server::listener::AcceptWorker;

/// A running relay
///
/// Call [`Streamer::stop`] before dropping it: running workers keep the
/// registry alive until they are stopped.
pub struct Streamer {
    scheduler: Arc<Scheduler>,
    registry: Arc<ConnectionRegistry>,
    accept: Mutex<Option<Arc<AcceptWorker>>>,
    stopped: AtomicBool,
}

impl Streamer {
    /// Start the stop queue consumer and listen on `config.output_addr`
    pub async fn start(config: StreamerConfig) -> Result<Self> {
        let scheduler = Arc::new(Scheduler::new());
        let (stop_queue, consumer) = StopQueue::new(&scheduler);
        scheduler.start(consumer).await?;

        let output_addr = config.output_addr;
        let registry = ConnectionRegistry::new(scheduler.clone(), stop_queue, config);

        let streamer = Self {
            scheduler,
            registry,
            accept: Mutex::new(None),
            stopped: AtomicBool::new(false),
        };

        if let Err(e) = streamer.set_output_route(output_addr).await {
            streamer.stop().await;
            return Err(e);
        }
        Ok(streamer)
    }

    /// Move the client listener to `addr`, returning the bound address.
    ///
    /// Clients already connected are not affected.
    pub async fn set_output_route(&self, addr: SocketAddr) -> Result<SocketAddr> {
        self.check_running()?;
        let mut accept = self.accept.lock().await;

        if let Some(previous) = accept.take() {
            self.scheduler.stop(previous.id()).await;
        }

        let worker = AcceptWorker::new(addr, self.registry.clone())?;
        self.scheduler.start(worker.clone()).await?;
        let local_addr = worker
            .local_addr()
            .ok_or_else(|| Error::Route(format!("output listener on {} is not bound", addr)))?;

        tracing::info!(addr = %local_addr, "Output route set");
        *accept = Some(worker);
        Ok(local_addr)
    }

    /// Register an input and start receiving it
    pub async fn register_input(&self, descriptor: InputDescriptor) -> Result<()> {
        self.check_running()?;
        self.registry.register_input(descriptor).await
    }

    /// Swap the descriptor of a registered UDP input
    pub async fn update_input(&self, descriptor: InputDescriptor) -> Result<()> {
        self.check_running()?;
        self.registry.update_input(descriptor).await
    }

    /// Stop an input and every client watching it
    pub async fn deregister_input(&self, path: &str) -> Result<()> {
        self.check_running()?;
        self.registry.deregister_input(path).await
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Address clients connect to
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.accept
            .lock()
            .await
            .as_ref()
            .and_then(|worker| worker.local_addr())
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Stop every worker. Safe to call more than once.
    pub async fn stop(&self) {
        let first = !self.stopped.swap(true, Ordering::AcqRel);

        // The accept worker goes first so it cannot start clients behind stop_all
        if let Some(accept) = self.accept.lock().await.take() {
            self.scheduler.stop(accept.id()).await;
        }
        self.scheduler.stop_all().await;
        self.registry.clear().await;

        if first {
            tracing::info!("Streamer stopped");
        }
    }

    fn check_running(&self) -> Result<()> {
        if self.is_stopped() {
            return Err(Error::Stopped);
        }
        Ok(())
    }
}
