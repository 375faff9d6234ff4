//! Connection registry implementation
//!
//! The central registry that owns every registered input and routes its
//! framing units to the connections attached to its path.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::{mpsc, RwLock};

use crate::error::Result;
use crate::input::InputWorker;
use crate::media::MediaType;
use crate::route::InputDescriptor;
use crate::scheduler::{Scheduler, StopQueue, Worker, WorkerId};
use crate::server::StreamerConfig;
use crate::stats::{ConnectionStats, InputStats};
use crate::sync::lock;

use super::entry::{InputSlot, Offer, Outlet, OutletState};
use super::error::RegistryError;
use super::key::PathKey;

/// What a connection receives when it attaches to a path
pub struct Attachment {
    /// Private queue; the media header is always its first item
    pub rx: mpsc::UnboundedReceiver<Bytes>,
    /// Counters and overflow signal shared with the registry
    pub state: Arc<OutletState>,
    /// Media type served on the path
    pub media_type: MediaType,
}

/// Registry of inputs and the connections attached to them
///
/// Thread-safe via `RwLock`. Dispatch takes the read lock, attach and
/// detach take the write lock, so a connection is either fully attached
/// (header queued first) or receives nothing. No lock is held while an
/// input binds its socket: the path is reserved instead.
pub struct ConnectionRegistry {
    /// Map of path to input slot
    inputs: RwLock<HashMap<PathKey, InputSlot>>,
    /// Paths whose input is being started
    reserved: Mutex<HashSet<PathKey>>,

    scheduler: Arc<Scheduler>,
    stop_queue: StopQueue,
    config: StreamerConfig,
}

impl ConnectionRegistry {
    pub fn new(scheduler: Arc<Scheduler>, stop_queue: StopQueue, config: StreamerConfig) -> Arc<Self> {
        Arc::new(Self {
            inputs: RwLock::new(HashMap::new()),
            reserved: Mutex::new(HashSet::new()),
            scheduler,
            stop_queue,
            config,
        })
    }

    pub fn config(&self) -> &StreamerConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn stop_queue(&self) -> &StopQueue {
        &self.stop_queue
    }

    /// Register an input and start its worker
    ///
    /// Fails without starting anything if the path (separator-trimmed) is
    /// already served.
    pub async fn register_input(self: &Arc<Self>, descriptor: InputDescriptor) -> Result<()> {
        descriptor.route.validate()?;
        let key = descriptor.key();
        let reservation = self.reserve(&key).await?;

        let route = descriptor.route.clone();
        let media_type = descriptor.media_type;
        let worker = InputWorker::new(descriptor, Arc::downgrade(self), &self.config)?;
        // Binding may resolve a host name; the registry stays unlocked
        self.scheduler.start(worker.clone()).await?;

        tracing::info!(
            path = %key,
            route = %route,
            media_type = %media_type,
            "Input registered"
        );
        let mut inputs = self.inputs.write().await;
        inputs.insert(key, InputSlot::new(worker));
        drop(reservation);
        Ok(())
    }

    /// Claim `key` for an input being started
    async fn reserve(&self, key: &PathKey) -> Result<Reservation<'_>> {
        let inputs = self.inputs.read().await;
        if inputs.contains_key(key) || !lock(&self.reserved).insert(key.clone()) {
            return Err(RegistryError::DuplicatePath(key.clone()).into());
        }
        Ok(Reservation {
            reserved: &self.reserved,
            key: key.clone(),
        })
    }

    fn is_reserved(&self, key: &PathKey) -> bool {
        lock(&self.reserved).contains(key)
    }

    /// Swap the descriptor of a registered input, looked up by route uuid
    pub async fn update_input(&self, descriptor: InputDescriptor) -> Result<()> {
        descriptor.route.validate()?;
        let new_key = descriptor.key();
        let mut inputs = self.inputs.write().await;

        let old_key = inputs
            .iter()
            .find(|(_, slot)| slot.worker.descriptor().route.uuid == descriptor.route.uuid)
            .map(|(key, _)| key.clone())
            .ok_or_else(|| RegistryError::InputNotFound(new_key.clone()))?;

        if new_key != old_key && (inputs.contains_key(&new_key) || self.is_reserved(&new_key)) {
            return Err(RegistryError::DuplicatePath(new_key).into());
        }

        if let Some(slot) = inputs.get(&old_key) {
            slot.worker.update_descriptor(descriptor)?;
        }
        if new_key != old_key {
            if let Some(slot) = inputs.remove(&old_key) {
                inputs.insert(new_key.clone(), slot);
            }
        }

        tracing::info!(path = %new_key, previous = %old_key, "Input updated");
        Ok(())
    }

    /// Stop an input and every connection attached to it
    pub async fn deregister_input(&self, path: &str) -> Result<()> {
        let key = PathKey::new(path);
        let slot = self
            .inputs
            .write()
            .await
            .remove(&key)
            .ok_or_else(|| RegistryError::InputNotFound(key.clone()))?;

        self.scheduler.stop(slot.worker.id()).await;

        let connections: Vec<WorkerId> = slot.connections.keys().copied().collect();
        // Dropping the outlets closes every private queue
        drop(slot);
        for id in &connections {
            self.scheduler.stop(*id).await;
        }

        tracing::info!(path = %key, connections = connections.len(), "Input deregistered");
        Ok(())
    }

    /// Queue a unit for every connection attached to `key`
    ///
    /// Returns the number of connections the unit was queued for.
    pub async fn dispatch(&self, key: &PathKey, unit: Bytes) -> usize {
        let inputs = self.inputs.read().await;
        let Some(slot) = inputs.get(key) else {
            return 0;
        };

        let mut queued = 0;
        for (id, outlet) in &slot.connections {
            match outlet.offer(unit.clone(), self.config.max_buffer_size) {
                Offer::Queued => queued += 1,
                Offer::Overflow => {
                    tracing::trace!(path = %key, connection = %id, "Unit refused, queue over cap");
                }
                Offer::Closed => {}
            }
        }
        queued
    }

    /// Attach a connection to the input serving `key`
    ///
    /// The current media header is queued before the connection becomes
    /// visible to dispatch. For UDP inputs this waits (bounded by the bind
    /// timeout) until the input has bound its socket.
    pub async fn attach(
        &self,
        key: &PathKey,
        id: WorkerId,
        peer: Option<SocketAddr>,
    ) -> Result<Attachment> {
        let (worker, attachment) = {
            let mut inputs = self.inputs.write().await;
            let slot = inputs
                .get_mut(key)
                .ok_or_else(|| RegistryError::InputNotFound(key.clone()))?;

            let state = Arc::new(OutletState::new(id, peer));
            let (outlet, rx) = Outlet::new(state.clone());

            let header = slot.worker.reader_shared().header();
            if !header.is_empty() {
                outlet.offer(header, usize::MAX);
            }
            slot.connections.insert(id, outlet);

            let attachment = Attachment {
                rx,
                state,
                media_type: slot.worker.media_type(),
            };
            (slot.worker.clone(), attachment)
        };

        worker.connection_added().await;

        let connections = self.connection_count(key.as_str()).await;
        tracing::debug!(
            path = %key,
            connection = %id,
            connections = connections,
            "Connection attached"
        );
        Ok(attachment)
    }

    /// Detach a connection and schedule its worker to be stopped.
    ///
    /// Idempotent.
    pub async fn detach(&self, key: &PathKey, id: WorkerId) {
        let worker = {
            let mut inputs = self.inputs.write().await;
            inputs.get_mut(key).and_then(|slot| {
                slot.connections
                    .remove(&id)
                    .map(|_| slot.worker.clone())
            })
        };

        if let Some(worker) = worker {
            worker.connection_removed();
            tracing::debug!(path = %key, connection = %id, "Connection detached");
        }
        self.stop_queue.push(id);
    }

    /// Stop every connection attached to `key` through the stop queue
    pub async fn drop_connections(&self, key: &PathKey) -> usize {
        let ids: Vec<WorkerId> = {
            let inputs = self.inputs.read().await;
            inputs
                .get(key)
                .map(|slot| slot.connections.keys().copied().collect())
                .unwrap_or_default()
        };

        for id in &ids {
            self.stop_queue.push(*id);
        }
        if !ids.is_empty() {
            tracing::info!(path = %key, connections = ids.len(), "Dropping connections");
        }
        ids.len()
    }

    /// Media type served on `path`, if an input is registered for it
    pub async fn resolve(&self, path: &str) -> Option<MediaType> {
        let inputs = self.inputs.read().await;
        inputs
            .get(&PathKey::new(path))
            .map(|slot| slot.worker.media_type())
    }

    /// Input worker serving `path`
    pub async fn input(&self, path: &str) -> Option<Arc<InputWorker>> {
        let inputs = self.inputs.read().await;
        inputs
            .get(&PathKey::new(path))
            .map(|slot| slot.worker.clone())
    }

    /// Number of connections attached to `path`
    pub async fn connection_count(&self, path: &str) -> usize {
        let inputs = self.inputs.read().await;
        inputs
            .get(&PathKey::new(path))
            .map_or(0, |slot| slot.connections.len())
    }

    /// Registered paths as given at registration
    pub async fn paths(&self) -> Vec<String> {
        let inputs = self.inputs.read().await;
        let mut paths: Vec<String> = inputs
            .values()
            .map(|slot| slot.worker.descriptor().path)
            .collect();
        paths.sort();
        paths
    }

    /// Statistics for one input. Resets its rate samples.
    pub async fn input_stats(&self, path: &str) -> Option<InputStats> {
        let inputs = self.inputs.read().await;
        inputs.get(&PathKey::new(path)).map(Self::stats_for)
    }

    /// Statistics for every input. Resets all rate samples.
    pub async fn snapshot(&self) -> Vec<InputStats> {
        let inputs = self.inputs.read().await;
        let mut stats: Vec<InputStats> = inputs.values().map(Self::stats_for).collect();
        stats.sort_by(|a, b| a.path.cmp(&b.path));
        stats
    }

    /// Statistics for the connections attached to `path`
    pub async fn connection_stats(&self, path: &str) -> Vec<ConnectionStats> {
        let key = PathKey::new(path);
        let inputs = self.inputs.read().await;
        inputs
            .get(&key)
            .map(|slot| {
                slot.connections
                    .values()
                    .map(|outlet| outlet.state().snapshot(&key))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn stats_for(slot: &InputSlot) -> InputStats {
        let descriptor = slot.worker.descriptor();
        let shared = slot.worker.reader_shared();

        InputStats {
            path: descriptor.path,
            uuid: descriptor.uuid,
            name: descriptor.name,
            media_type: descriptor.media_type,
            protocol: descriptor.route.protocol,
            local_addr: slot.worker.local_addr(),
            peer: shared.peer(),
            phase: slot.worker.phase(),
            broken_count: shared.broken_count(),
            input_rate: shared.rate(),
            output_rate: slot.output_rate(),
            connection_count: slot.connections.len(),
        }
    }

    /// Forget every input. Workers must already be stopped.
    pub async fn clear(&self) {
        self.inputs.write().await.clear();
    }
}

/// Releases a reserved path when dropped, including when registration
/// fails or is abandoned
struct Reservation<'a> {
    reserved: &'a Mutex<HashSet<PathKey>>,
    key: PathKey,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        lock(self.reserved).remove(&self.key);
    }
}
