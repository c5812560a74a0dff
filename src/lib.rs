//! A lightweight SOCKS5 proxy with split-horizon DNS
//!
//! ## SOCKS5 Implementation
//!
//! - Features:
//!     - CONNECT to IPv4 or domain-name destinations
//!     - No Authentication
//!     - Ordered list of upstream DNS servers tried before the system resolver,
//!       so names only visible inside a VPN tunnel still resolve
//!     - Async using tokio, one task per client
//!     - Paired teardown: when either side of a relay closes, both do
//!     - Connection and DNS counters with a shutdown report
//! - [SOCKS5 (RFC 1928)](https://datatracker.ietf.org/doc/html/rfc1928)
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use splitsocks::{NativeBackend, ServerConfig, Socks5Server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::new(
//!         "127.0.0.1".parse()?,
//!         1081,
//!         vec!["10.19.1.23".parse()?],
//!     );
//!     let backend = NativeBackend::new(&config.dns_servers, config.timeouts.dns);
//!     let mut server = Socks5Server::new(config, Arc::new(backend));
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod auth;
pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod relay;
pub mod resolver;
pub mod server;
pub mod stats;

// Re-export main types at crate root for convenience
pub use config::{ServerConfig, Timeouts};
pub use error::ProxyError;
pub use handler::{ConnectionHandler, Socks5Handler};
pub use protocol::{AuthMethod, Command, ReplyCode, Version};
pub use resolver::{Answer, DnsBackend, HostResolver, NativeBackend, NslookupBackend, Resolver};
pub use server::Socks5Server;
pub use stats::{ProxyStats, StatsSnapshot};
