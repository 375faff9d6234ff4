//! Worker abstraction hosted by the scheduler

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;

/// Stable identity of a hosted worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(Uuid);

impl WorkerId {
    /// Generate a fresh id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing uuid
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A long-running task managed by the `Scheduler`
///
/// `stop()` must be non-blocking and must make `run()` return promptly,
/// typically by cancelling a token the run loop selects on.
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    /// Worker identity
    fn id(&self) -> WorkerId;

    /// Short kind name for logs
    fn kind(&self) -> &'static str;

    /// Called once before the worker is spawned; an error aborts the start
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    /// Main loop
    async fn run(self: Arc<Self>);

    /// Request termination and unblock any pending I/O
    fn stop(&self);
}
