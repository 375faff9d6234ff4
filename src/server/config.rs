//! Streamer configuration

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default HTTP output port
pub const DEFAULT_OUTPUT_PORT: u16 = 8000;

/// Streamer configuration options
#[derive(Debug, Clone)]
pub struct StreamerConfig {
    /// Address clients connect to
    pub output_addr: SocketAddr,

    /// Maximum concurrent client connections (0 = unlimited)
    pub max_connections: usize,

    /// Poll interval of input readers; an idle input is logged at this rate
    pub wait_interval: Duration,

    /// A client that receives no data, or accepts no bytes, for this long is disconnected
    pub hang_timeout: Duration,

    /// The request head must arrive within this time
    pub request_timeout: Duration,

    /// How long an attaching client waits for a UDP input to bind
    pub bind_timeout: Duration,

    /// Bytes a client may have queued before it is treated as too slow
    pub max_buffer_size: usize,

    /// Largest accepted request head
    pub max_request_size: usize,

    /// Enable TCP_NODELAY on client sockets (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            output_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_OUTPUT_PORT),
            max_connections: 0, // Unlimited
            wait_interval: Duration::from_secs(5),
            hang_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
            bind_timeout: Duration::from_secs(5),
            max_buffer_size: 8 * 1024 * 1024, // 8MB
            max_request_size: 16 * 1024,
            tcp_nodelay: true,
        }
    }
}

impl StreamerConfig {
    /// Create a new config with a custom output address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            output_addr: addr,
            ..Default::default()
        }
    }

    /// Set the output address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.output_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the input poll interval
    pub fn wait_interval(mut self, interval: Duration) -> Self {
        self.wait_interval = interval;
        self
    }

    /// Set the client hang timeout
    pub fn hang_timeout(mut self, timeout: Duration) -> Self {
        self.hang_timeout = timeout;
        self
    }

    /// Set the request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the UDP bind timeout
    pub fn bind_timeout(mut self, timeout: Duration) -> Self {
        self.bind_timeout = timeout;
        self
    }

    /// Set the per-client buffer cap
    pub fn max_buffer_size(mut self, size: usize) -> Self {
        self.max_buffer_size = size;
        self
    }

    /// Set the request head limit
    pub fn max_request_size(mut self, size: usize) -> Self {
        self.max_request_size = size;
        self
    }

    /// Enable or disable TCP_NODELAY
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StreamerConfig::default();

        assert_eq!(config.output_addr.port(), DEFAULT_OUTPUT_PORT);
        assert_eq!(config.max_connections, 0);
        assert_eq!(config.wait_interval, Duration::from_secs(5));
        assert_eq!(config.hang_timeout, Duration::from_secs(10));
        assert_eq!(config.max_buffer_size, 8 * 1024 * 1024);
        assert_eq!(config.max_request_size, 16 * 1024);
        assert!(config.tcp_nodelay);
    }

    #[test]
    fn test_with_addr() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let config = StreamerConfig::with_addr(addr);

        assert_eq!(config.output_addr, addr);
    }

    #[test]
    fn test_builder_chaining() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let config = StreamerConfig::default()
            .bind(addr)
            .max_connections(50)
            .hang_timeout(Duration::from_millis(500))
            .request_timeout(Duration::from_secs(1))
            .bind_timeout(Duration::from_secs(2))
            .wait_interval(Duration::from_millis(100))
            .max_buffer_size(4096)
            .max_request_size(1024)
            .tcp_nodelay(false);

        assert_eq!(config.output_addr, addr);
        assert_eq!(config.max_connections, 50);
        assert_eq!(config.hang_timeout, Duration::from_millis(500));
        assert_eq!(config.request_timeout, Duration::from_secs(1));
        assert_eq!(config.bind_timeout, Duration::from_secs(2));
        assert_eq!(config.wait_interval, Duration::from_millis(100));
        assert_eq!(config.max_buffer_size, 4096);
        assert_eq!(config.max_request_size, 1024);
        assert!(!config.tcp_nodelay);
    }
}
