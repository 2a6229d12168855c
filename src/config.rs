use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Primary configuration for a [`Server`](crate::Server).
///
/// `host` and `port` describe the UDP endpoint the embedder binds; they are
/// advertised in every SDP answer. The engine itself never touches a socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
    pub max_peers: usize,
    /// Capacity of the pending event ring. Must be a power of two.
    pub event_queue_capacity: usize,
    /// Size of the per-tick payload arena in bytes.
    pub arena_capacity: usize,
    /// Inactivity budget; a peer is purged once this runs out.
    pub peer_ttl_seconds: f64,
    /// Cadence of outbound SCTP heartbeats.
    pub heartbeat_seconds: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::LOCALHOST,
            port: 9555,
            max_peers: 256,
            event_queue_capacity: 1024,
            arena_capacity: 1 << 20,
            peer_ttl_seconds: 8.0,
            heartbeat_seconds: 4.0,
        }
    }
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }
}

pub struct ServerConfigBuilder {
    inner: ServerConfig,
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerConfigBuilder {
    pub fn new() -> Self {
        Self {
            inner: ServerConfig::default(),
        }
    }

    pub fn host(mut self, host: Ipv4Addr) -> Self {
        self.inner.host = host;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.inner.port = port;
        self
    }

    pub fn max_peers(mut self, max_peers: usize) -> Self {
        self.inner.max_peers = max_peers;
        self
    }

    pub fn event_queue_capacity(mut self, capacity: usize) -> Self {
        self.inner.event_queue_capacity = capacity;
        self
    }

    pub fn arena_capacity(mut self, capacity: usize) -> Self {
        self.inner.arena_capacity = capacity;
        self
    }

    pub fn peer_ttl_seconds(mut self, seconds: f64) -> Self {
        self.inner.peer_ttl_seconds = seconds;
        self
    }

    pub fn heartbeat_seconds(mut self, seconds: f64) -> Self {
        self.inner.heartbeat_seconds = seconds;
        self
    }

    pub fn build(self) -> ServerConfig {
        self.inner
    }
}

impl From<ServerConfigBuilder> for ServerConfig {
    fn from(builder: ServerConfigBuilder) -> Self {
        builder.build()
    }
}
