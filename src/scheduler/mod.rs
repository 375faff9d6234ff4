//! Worker lifecycle scheduler
//!
//! Every long-running task in the relay (accept loop, input readers,
//! client connections, the stop queue consumer) is a `Worker` hosted by a
//! `Scheduler`. Starting records the worker with its task handle; stopping
//! asks the worker to stop and then awaits its task.
//!
//! A worker must never stop itself through the scheduler: awaiting its own
//! task handle would never complete. Workers that decide to end push their
//! id onto the `StopQueue` instead.

pub mod stop_queue;
pub mod worker;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

pub use stop_queue::{StopQueue, StopQueueWorker};
pub use worker::{Worker, WorkerId};

struct Entry {
    worker: Arc<dyn Worker>,
    handle: JoinHandle<()>,
}

/// Hosts workers as tokio tasks
#[derive(Default)]
pub struct Scheduler {
    workers: Mutex<HashMap<WorkerId, Entry>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize and spawn a worker
    pub async fn start(&self, worker: Arc<dyn Worker>) -> Result<()> {
        let id = worker.id();
        if self.is_started(id).await {
            return Err(Error::AlreadyStarted(id));
        }

        worker.init().await?;

        let mut workers = self.workers.lock().await;
        if workers.contains_key(&id) {
            return Err(Error::AlreadyStarted(id));
        }

        // Spawned while the map is locked so a stop request for this id
        // always finds the entry.
        let handle = tokio::spawn(Arc::clone(&worker).run());
        tracing::debug!(worker = %id, kind = worker.kind(), "Worker started");
        workers.insert(id, Entry { worker, handle });
        Ok(())
    }

    /// Stop a worker and wait for its task to finish.
    ///
    /// Stopping an unknown or already stopped worker is a no-op.
    pub async fn stop(&self, id: WorkerId) {
        let entry = self.workers.lock().await.remove(&id);
        if let Some(entry) = entry {
            Self::finish(id, entry).await;
        }
    }

    /// Stop every hosted worker. Safe to call repeatedly.
    pub async fn stop_all(&self) {
        let entries: Vec<(WorkerId, Entry)> = self.workers.lock().await.drain().collect();
        if entries.is_empty() {
            return;
        }

        tracing::debug!(count = entries.len(), "Stopping all workers");
        for (id, entry) in entries {
            Self::finish(id, entry).await;
        }
    }

    async fn finish(id: WorkerId, entry: Entry) {
        let kind = entry.worker.kind();
        entry.worker.stop();
        if let Err(e) = entry.handle.await {
            tracing::error!(worker = %id, kind = kind, error = %e, "Worker task failed");
        } else {
            tracing::debug!(worker = %id, kind = kind, "Worker stopped");
        }
    }

    /// Whether a worker is currently hosted
    pub async fn is_started(&self, id: WorkerId) -> bool {
        self.workers.lock().await.contains_key(&id)
    }

    /// Number of hosted workers
    pub async fn len(&self) -> usize {
        self.workers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
