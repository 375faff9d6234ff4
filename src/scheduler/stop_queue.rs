//! Deferred worker stop
//!
//! A worker that wants to end (client gone, hang timeout, slow consumer)
//! cannot stop itself through the scheduler. It pushes its id here instead
//! and a dedicated consumer performs the stop from its own task.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use super::{Scheduler, Worker, WorkerId};

/// Producer side of the stop queue
#[derive(Debug, Clone)]
pub struct StopQueue {
    tx: mpsc::UnboundedSender<WorkerId>,
}

impl StopQueue {
    /// Create the queue together with its consumer worker.
    ///
    /// The consumer holds a weak reference so it does not keep the
    /// scheduler alive.
    pub fn new(scheduler: &Arc<Scheduler>) -> (Self, Arc<StopQueueWorker>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Arc::new(StopQueueWorker {
            id: WorkerId::new(),
            scheduler: Arc::downgrade(scheduler),
            rx: Mutex::new(Some(rx)),
            cancel: CancellationToken::new(),
        });
        (Self { tx }, worker)
    }

    /// Ask for `id` to be stopped. Never blocks.
    pub fn push(&self, id: WorkerId) {
        if self.tx.send(id).is_err() {
            tracing::debug!(worker = %id, "Stop queue closed, dropping stop request");
        }
    }
}

/// Single consumer of the stop queue
pub struct StopQueueWorker {
    id: WorkerId,
    scheduler: Weak<Scheduler>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<WorkerId>>>,
    cancel: CancellationToken,
}

#[async_trait]
impl Worker for StopQueueWorker {
    fn id(&self) -> WorkerId {
        self.id
    }

    fn kind(&self) -> &'static str {
        "stop-queue"
    }

    async fn run(self: Arc<Self>) {
        let Some(mut rx) = self.rx.lock().await.take() else {
            tracing::warn!("Stop queue consumer started twice");
            return;
        };

        loop {
            let id = tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(id) => id,
                    None => break,
                },
            };

            // Never stop ourselves through the scheduler
            if id == self.id {
                continue;
            }

            match self.scheduler.upgrade() {
                Some(scheduler) => scheduler.stop(id).await,
                None => break,
            }
        }
    }

    fn stop(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct SelfStopping {
        id: WorkerId,
        queue: StopQueue,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl Worker for SelfStopping {
        fn id(&self) -> WorkerId {
            self.id
        }

        fn kind(&self) -> &'static str {
            "self-stopping"
        }

        async fn run(self: Arc<Self>) {
            // Decide to end right away, then wait to be stopped
            self.queue.push(self.id);
            self.cancel.cancelled().await;
        }

        fn stop(&self) {
            self.cancel.cancel();
        }
    }

    #[tokio::test]
    async fn test_worker_stops_itself_through_queue() {
        let scheduler = Arc::new(Scheduler::new());
        let (queue, consumer) = StopQueue::new(&scheduler);
        scheduler.start(consumer).await.unwrap();

        let worker = Arc::new(SelfStopping {
            id: WorkerId::new(),
            queue: queue.clone(),
            cancel: CancellationToken::new(),
        });
        scheduler.start(worker.clone()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while scheduler.is_started(worker.id).await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert!(worker.cancel.is_cancelled());
        scheduler.stop_all().await;
        assert!(scheduler.is_empty().await);
    }

    #[tokio::test]
    async fn test_push_after_shutdown_is_harmless() {
        let scheduler = Arc::new(Scheduler::new());
        let (queue, consumer) = StopQueue::new(&scheduler);
        scheduler.start(consumer).await.unwrap();
        scheduler.stop_all().await;

        queue.push(WorkerId::new());
    }
}
