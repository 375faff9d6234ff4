//! Routes and input descriptors
//!
//! A `Route` says where bytes come from (or where clients connect to); an
//! `InputDescriptor` ties a route to the HTTP path and media type it is
//! served under.

pub mod binding;

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::media::MediaType;
use crate::registry::PathKey;

pub use binding::RouteBinding;

/// Transport protocol of a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("tcp"),
            Protocol::Udp => f.write_str("udp"),
        }
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(Error::Route(format!("unknown protocol: {}", other))),
        }
    }
}

/// Unicast or multicast reception
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CastType {
    #[default]
    Unicast,
    Multicast,
}

/// Network endpoint description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Route identity
    pub uuid: Uuid,
    /// Human readable name
    pub name: String,
    /// Host name or address
    pub host: String,
    /// Port number (0 binds an ephemeral port)
    pub port: u16,
    /// Transport protocol
    pub protocol: Protocol,
    /// Unicast or multicast
    pub cast: CastType,
}

impl Route {
    /// Create a route with a fresh uuid
    pub fn new(host: impl Into<String>, port: u16, protocol: Protocol) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: String::new(),
            host: host.into(),
            port,
            protocol,
            cast: CastType::Unicast,
        }
    }

    /// TCP route
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::new(host, port, Protocol::Tcp)
    }

    /// UDP route
    pub fn udp(host: impl Into<String>, port: u16) -> Self {
        Self::new(host, port, Protocol::Udp)
    }

    /// Set the name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Mark the route as multicast
    pub fn multicast(mut self) -> Self {
        self.cast = CastType::Multicast;
        self
    }

    /// Keep the uuid of an existing route
    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = uuid;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Route(format!("route {} has an empty host", self.uuid)));
        }
        Ok(())
    }

    /// Multicast group to join, when the route is multicast
    pub fn multicast_group(&self) -> Result<Option<Ipv4Addr>> {
        if self.cast != CastType::Multicast {
            return Ok(None);
        }
        match self.host.parse::<Ipv4Addr>() {
            Ok(group) if group.is_multicast() => Ok(Some(group)),
            _ => Err(Error::Route(format!(
                "{} is not an IPv4 multicast group",
                self.host
            ))),
        }
    }

    /// Resolve the address to bind
    pub async fn resolve(&self) -> Result<SocketAddr> {
        self.validate()?;

        if self.multicast_group()?.is_some() {
            return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.port));
        }
        if let Ok(ip) = self.host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.port));
        }

        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| Error::Route(format!("cannot resolve {}", self.host)))
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol, self.host, self.port)
    }
}

/// An input to relay: where it arrives and where it is served
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDescriptor {
    /// Input identity
    pub uuid: Uuid,
    /// Human readable name
    pub name: String,
    /// Where the input arrives
    pub route: Route,
    /// HTTP path clients request
    pub path: String,
    /// Container format of the input
    pub media_type: MediaType,
}

impl InputDescriptor {
    pub fn new(path: impl Into<String>, route: Route, media_type: MediaType) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: String::new(),
            route,
            path: path.into(),
            media_type,
        }
    }

    /// Set the name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Registry key for the path
    pub fn key(&self) -> PathKey {
        PathKey::new(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_from_str() {
        assert_eq!("TCP".parse::<Protocol>().unwrap(), Protocol::Tcp);
        assert_eq!("udp".parse::<Protocol>().unwrap(), Protocol::Udp);
        assert!("sctp".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_route_display() {
        let route = Route::udp("239.1.1.1", 5000).multicast();
        assert_eq!(route.to_string(), "udp://239.1.1.1:5000");
        assert_eq!(route.cast, CastType::Multicast);
    }

    #[test]
    fn test_multicast_group() {
        let route = Route::udp("239.1.1.1", 5000).multicast();
        assert_eq!(
            route.multicast_group().unwrap(),
            Some(Ipv4Addr::new(239, 1, 1, 1))
        );

        assert_eq!(Route::udp("127.0.0.1", 5000).multicast_group().unwrap(), None);
        assert!(Route::udp("127.0.0.1", 5000)
            .multicast()
            .multicast_group()
            .is_err());
    }

    #[tokio::test]
    async fn test_resolve() {
        let addr = Route::tcp("127.0.0.1", 8080).resolve().await.unwrap();
        assert_eq!(addr, "127.0.0.1:8080".parse().unwrap());

        let addr = Route::udp("239.1.1.1", 5000).multicast().resolve().await.unwrap();
        assert_eq!(addr, "0.0.0.0:5000".parse().unwrap());

        assert!(Route::tcp("  ", 80).resolve().await.is_err());
    }

    #[test]
    fn test_descriptor_key_is_trimmed() {
        let input = InputDescriptor::new("/live/a/", Route::tcp("127.0.0.1", 0), MediaType::Flv);
        assert_eq!(input.key().as_str(), "live/a");
    }
}
