//! Hostname resolution across an ordered list of DNS servers
//!
//! VPN tunnels often publish split-horizon DNS servers that the system
//! resolver never consults. [`Resolver`] asks each configured server in
//! turn and only then falls back to the platform resolver, so internal names
//! resolve through the tunnel while public names still resolve normally.
//!
//! How a single server is queried is pluggable through [`DnsBackend`]:
//! - [`NativeBackend`] speaks DNS directly using `hickory-resolver`
//! - [`NslookupBackend`] shells out to `nslookup` and scrapes its output

mod native;
mod nslookup;

pub use native::NativeBackend;
pub use nslookup::{NslookupBackend, parse_nslookup_output};

use crate::stats::ProxyStats;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// DnsBackend queries one specific DNS server, or the platform resolver
#[async_trait]
pub trait DnsBackend: Send + Sync {
    /// Ask `server` for an IPv4 address of `hostname`
    async fn resolve_via(&self, server: Ipv4Addr, hostname: &str, timeout: Duration)
    -> Result<Answer>;

    /// Resolve with whatever the host platform is configured to use
    async fn resolve_default(&self, hostname: &str) -> Result<Ipv4Addr> {
        tokio::net::lookup_host((hostname, 0))
            .await?
            .find_map(|addr| match addr.ip() {
                IpAddr::V4(ip) => Some(ip),
                IpAddr::V6(_) => None,
            })
            .ok_or_else(|| anyhow!("no IPv4 address found for {hostname}"))
    }
}

/// One server's answer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Answer {
    pub ip: Ipv4Addr,
    /// Recovered by a loose scan of the server's output rather than a
    /// proper answer section
    pub fallback: bool,
}

impl From<Ipv4Addr> for Answer {
    fn from(ip: Ipv4Addr) -> Self {
        Self {
            ip,
            fallback: false,
        }
    }
}

/// Where a resolved address came from
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResolvedBy {
    Server { addr: Ipv4Addr, fallback: bool },
    System,
    /// The hostname was already a dotted-quad
    Literal,
}

impl fmt::Display for ResolvedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedBy::Server {
                addr,
                fallback: false,
            } => write!(f, "{addr}"),
            ResolvedBy::Server {
                addr,
                fallback: true,
            } => write!(f, "{addr} (fallback)"),
            ResolvedBy::System => f.write_str("system DNS"),
            ResolvedBy::Literal => f.write_str("literal"),
        }
    }
}

/// A validated IPv4 address and the resolver that produced it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    pub ip: Ipv4Addr,
    pub source: ResolvedBy,
}

/// HostResolver is what a connection handler needs from name resolution.
/// `None` means every avenue failed.
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolve(&self, hostname: &str) -> Option<Resolution>;
}

/// Resolver tries each configured DNS server in order, then the system
/// resolver
pub struct Resolver {
    servers: Vec<Ipv4Addr>,
    backend: Arc<dyn DnsBackend>,
    stats: Arc<ProxyStats>,
    timeout: Duration,
}

impl Resolver {
    pub fn new(
        servers: Vec<Ipv4Addr>,
        backend: Arc<dyn DnsBackend>,
        stats: Arc<ProxyStats>,
        timeout: Duration,
    ) -> Self {
        Self {
            servers,
            backend,
            stats,
            timeout,
        }
    }
}

#[async_trait]
impl HostResolver for Resolver {
    async fn resolve(&self, hostname: &str) -> Option<Resolution> {
        // One query per lookup, however many servers get tried
        self.stats.record_dns_query();
        info!("Resolving: {hostname}");

        if let Ok(ip) = hostname.parse::<Ipv4Addr>() {
            return Some(Resolution {
                ip,
                source: ResolvedBy::Literal,
            });
        }

        for &server in &self.servers {
            let query = self.backend.resolve_via(server, hostname, self.timeout);
            match timeout(self.timeout, query).await {
                Ok(Ok(answer)) => {
                    let source = ResolvedBy::Server {
                        addr: server,
                        fallback: answer.fallback,
                    };
                    info!("SUCCESS: {hostname} -> {} via {source}", answer.ip);
                    return Some(Resolution {
                        ip: answer.ip,
                        source,
                    });
                }
                Ok(Err(e)) => warn!("DNS server {server} failed for {hostname}: {e}"),
                Err(_) => warn!("DNS server {server} timed out for {hostname}"),
            }
        }

        let fallback = timeout(self.timeout, self.backend.resolve_default(hostname)).await;
        match fallback {
            Ok(Ok(ip)) => {
                info!("SUCCESS: System DNS: {hostname} -> {ip}");
                Some(Resolution {
                    ip,
                    source: ResolvedBy::System,
                })
            }
            Ok(Err(e)) => {
                error!("All DNS resolution failed for {hostname}: {e}");
                self.stats.record_dns_failure();
                None
            }
            Err(_) => {
                error!("All DNS resolution failed for {hostname}: system resolver timed out");
                self.stats.record_dns_failure();
                None
            }
        }
    }
}
