use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 1081;

/// Timeouts applied per connection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timeouts {
    /// Client and destination reads/writes, handshake and relay alike
    pub io: Duration,
    /// Outbound TCP connect
    pub connect: Duration,
    /// One query against one DNS server
    pub dns: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            io: Duration::from_secs(30),
            connect: Duration::from_secs(30),
            dns: Duration::from_secs(10),
        }
    }
}

/// ServerConfig is built once at startup and shared read-only by every
/// handler
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub listen_address: IpAddr,
    pub listen_port: u16,
    /// Tried in order before the system resolver
    pub dns_servers: Vec<Ipv4Addr>,
    pub timeouts: Timeouts,
}

impl ServerConfig {
    pub fn new(listen_address: IpAddr, listen_port: u16, dns_servers: Vec<Ipv4Addr>) -> Self {
        Self {
            listen_address,
            listen_port,
            dns_servers,
            timeouts: Timeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_address, self.listen_port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT, Vec::new())
    }
}
