//! Activation gate for on-demand inputs
//!
//! Counts the connections that want data from an input and whether the
//! input currently holds a socket for them. Both live behind one watch
//! channel so an input can only give its socket up while nobody is
//! attached, and an attaching connection only proceeds on a socket that
//! will stay bound for it.

use std::time::Duration;

use tokio::sync::watch;

#[derive(Debug, Default, Clone, Copy)]
struct GateState {
    connections: usize,
    active: bool,
}

#[derive(Debug)]
pub struct ActivationGate {
    state: watch::Sender<GateState>,
}

impl ActivationGate {
    pub fn new() -> Self {
        let (state, _) = watch::channel(GateState::default());
        Self { state }
    }

    /// One more connection wants data. Returns the new count.
    pub fn open(&self) -> usize {
        let mut count = 0;
        self.state.send_modify(|s| {
            s.connections += 1;
            count = s.connections;
        });
        count
    }

    /// One connection went away. Never goes below zero.
    pub fn close(&self) -> usize {
        let mut count = 0;
        self.state.send_modify(|s| {
            s.connections = s.connections.saturating_sub(1);
            count = s.connections;
        });
        count
    }

    pub fn count(&self) -> usize {
        self.state.borrow().connections
    }

    pub fn is_open(&self) -> bool {
        self.count() > 0
    }

    /// Whether a socket is bound for the attached connections
    pub fn is_active(&self) -> bool {
        self.state.borrow().active
    }

    /// Record that a socket was bound
    pub fn activate(&self) {
        self.state.send_modify(|s| s.active = true);
    }

    /// Give the socket up if no connection is attached.
    ///
    /// Returns `false`, leaving the gate active, when a connection attached
    /// since the count last reached zero.
    pub fn deactivate(&self) -> bool {
        let mut released = false;
        self.state.send_if_modified(|s| {
            if s.connections > 0 {
                return false;
            }
            released = true;
            std::mem::replace(&mut s.active, false)
        });
        released
    }

    /// Record that the socket was dropped regardless of attached connections
    pub fn reset(&self) {
        self.state.send_if_modified(|s| std::mem::replace(&mut s.active, false));
    }

    /// Wait until at least one connection wants data
    pub async fn wait_open(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in self, so the channel cannot close here
        let _ = rx.wait_for(|s| s.connections > 0).await;
    }

    /// Wait until no connection wants data
    pub async fn wait_closed(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| s.connections == 0).await;
    }

    /// Wait until a socket is bound. Returns `false` on timeout.
    pub async fn wait_active(&self, timeout: Duration) -> bool {
        let mut rx = self.state.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|s| s.active))
            .await
            .map_or(false, |res| res.is_ok())
    }
}

impl Default for ActivationGate {
    fn default() -> Self {
        Self::new()
    }
}
