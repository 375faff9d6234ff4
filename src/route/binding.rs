//! Binding of a socket to a route
//!
//! `RouteBinding` holds the route a worker listens on and tracks whether a
//! socket is currently bound for it. The socket itself is owned by the
//! worker's task; the binding only records its lifecycle so other tasks can
//! observe it through bind counts and the local address.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::net::{TcpListener, UdpSocket};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::sync::lock;

use super::Route;

pub struct RouteBinding {
    route: Mutex<Option<Route>>,
    local_addr: Mutex<Option<SocketAddr>>,
    binds: AtomicU64,
    bound: AtomicBool,
}

impl RouteBinding {
    /// Binding without a route
    pub fn new() -> Self {
        Self {
            route: Mutex::new(None),
            local_addr: Mutex::new(None),
            binds: AtomicU64::new(0),
            bound: AtomicBool::new(false),
        }
    }

    /// Binding for `route`
    pub fn with_route(route: Route) -> Result<Self> {
        let binding = Self::new();
        binding.set_route(route)?;
        Ok(binding)
    }

    /// Set the route. Setting the same route (by uuid) twice is an error.
    pub fn set_route(&self, route: Route) -> Result<()> {
        route.validate()?;
        if self.check_route(route.uuid) {
            return Err(Error::Route(format!(
                "route has been already set: {}",
                route.uuid
            )));
        }
        *lock(&self.route) = Some(route);
        Ok(())
    }

    /// Replace the route unconditionally; used on the next bind
    pub fn replace_route(&self, route: Route) -> Result<()> {
        route.validate()?;
        *lock(&self.route) = Some(route);
        Ok(())
    }

    /// Current route
    pub fn route(&self) -> Result<Route> {
        lock(&self.route)
            .clone()
            .ok_or_else(|| Error::Route("route is not initialized".into()))
    }

    /// Whether the route with `uuid` is the one set
    pub fn check_route(&self, uuid: Uuid) -> bool {
        lock(&self.route).as_ref().map_or(false, |r| r.uuid == uuid)
    }

    /// Whether any route is set
    pub fn has_route(&self) -> bool {
        lock(&self.route).is_some()
    }

    /// Bind a TCP listener on the route
    pub async fn bind_tcp(&self) -> Result<TcpListener> {
        let route = self.route()?;
        let addr = route.resolve().await?;
        let listener = TcpListener::bind(addr).await?;
        self.mark_bound(listener.local_addr()?);
        Ok(listener)
    }

    /// Bind a UDP socket on the route, joining the group for multicast routes
    pub async fn bind_udp(&self) -> Result<UdpSocket> {
        let route = self.route()?;
        let addr = route.resolve().await?;
        let socket = UdpSocket::bind(addr).await?;
        if let Some(group) = route.multicast_group()? {
            socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)?;
            tracing::debug!(group = %group, port = route.port, "Joined multicast group");
        }
        self.mark_bound(socket.local_addr()?);
        Ok(socket)
    }

    fn mark_bound(&self, addr: SocketAddr) {
        *lock(&self.local_addr) = Some(addr);
        self.binds.fetch_add(1, Ordering::SeqCst);
        self.bound.store(true, Ordering::SeqCst);
    }

    /// Record that the socket was dropped
    pub fn release(&self) {
        *lock(&self.local_addr) = None;
        self.bound.store(false, Ordering::SeqCst);
    }

    /// Address of the bound socket
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.local_addr)
    }

    /// Number of successful binds so far
    pub fn bind_count(&self) -> u64 {
        self.binds.load(Ordering::SeqCst)
    }

    pub fn is_bound(&self) -> bool {
        self.bound.load(Ordering::SeqCst)
    }
}

impl Default for RouteBinding {
    fn default() -> Self {
        Self::new()
    }
}
