use crate::address::{Destination, TargetHost};
use crate::auth::negotiate_auth;
use crate::commands::{handle_connect_cmd, handle_socks_request, send_failure};
use crate::config::Timeouts;
use crate::error::{ProxyError, Result};
use crate::protocol::ReplyCode;
use crate::relay::{Relay, RelayStats};
use crate::resolver::{HostResolver, Resolution, ResolvedBy};
use crate::stats::ProxyStats;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

/// ConnectionHandler owns one accepted client connection from start to
/// finish. The accept loop only decides where `handle` runs.
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    async fn handle(&self, stream: TcpStream, peer_addr: SocketAddr);
}

/// Where a connection is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingGreeting,
    AwaitingRequest,
    Resolving,
    Connecting,
    Relaying,
    Closed,
}

/// ConnectionContext tracks one client through the pipeline. The sockets
/// themselves live on the handler's stack and move into the relay.
#[derive(Debug)]
pub struct ConnectionContext {
    pub client_addr: SocketAddr,
    pub destination: Option<Destination>,
    pub resolved: Option<Resolution>,
    pub state: ConnectionState,
}

impl ConnectionContext {
    pub fn new(client_addr: SocketAddr) -> Self {
        Self {
            client_addr,
            destination: None,
            resolved: None,
            state: ConnectionState::AwaitingGreeting,
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        match self.resolved {
            Some(Resolution { ip, source }) => debug!(
                "{} [{ip} by {source}]: {:?} -> {:?}",
                self.client_addr, self.state, next
            ),
            None => debug!("{}: {:?} -> {:?}", self.client_addr, self.state, next),
        }
        self.state = next;
    }
}

/// Socks5Handler runs greeting, request, resolution, connect and relay in
/// strict sequence for each client
pub struct Socks5Handler {
    resolver: Arc<dyn HostResolver>,
    stats: Arc<ProxyStats>,
    timeouts: Timeouts,
}

impl Socks5Handler {
    pub fn new(resolver: Arc<dyn HostResolver>, stats: Arc<ProxyStats>, timeouts: Timeouts) -> Self {
        Self {
            resolver,
            stats,
            timeouts,
        }
    }

    /// serve drives one connection. Both streams are dropped, and so
    /// closed, on every return path.
    async fn serve(&self, mut stream: TcpStream, ctx: &mut ConnectionContext) -> Result<RelayStats> {
        let io_timeout = self.timeouts.io;

        negotiate_auth(&mut stream, io_timeout).await?;
        debug!("{}: handshake complete", ctx.client_addr);
        ctx.transition(ConnectionState::AwaitingRequest);

        let destination = handle_socks_request(&mut stream, io_timeout).await?;
        ctx.destination = Some(destination.clone());

        let resolution = match &destination.host {
            TargetHost::IPv4(ip) => Resolution {
                ip: *ip,
                source: ResolvedBy::Literal,
            },
            TargetHost::DomainName(name) => {
                ctx.transition(ConnectionState::Resolving);
                match self.resolver.resolve(name).await {
                    Some(resolution) => resolution,
                    None => {
                        send_failure(&mut stream, ReplyCode::HostUnreachable, io_timeout).await;
                        return Err(ProxyError::Resolution(name.clone()));
                    }
                }
            }
        };
        ctx.resolved = Some(resolution);
        let Resolution { ip, source } = resolution;

        ctx.transition(ConnectionState::Connecting);
        info!("Connecting to: {destination} (IP: {ip}, resolved by {source})");
        let outbound = handle_connect_cmd(
            &mut stream,
            ip,
            destination.port,
            self.timeouts.connect,
            io_timeout,
        )
        .await?;
        info!("SUCCESS: Connected to {destination}");

        ctx.transition(ConnectionState::Relaying);
        Ok(Relay::new(stream, outbound, io_timeout).run().await)
    }
}

#[async_trait]
impl ConnectionHandler for Socks5Handler {
    async fn handle(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let (guard, total) = self.stats.connection_opened();
        info!("Client connected: {peer_addr} (Total: {total})");

        let mut ctx = ConnectionContext::new(peer_addr);
        match self.serve(stream, &mut ctx).await {
            Ok(relayed) => info!(
                "{peer_addr}: relay closed, {} bytes from client, {} bytes from destination",
                relayed.client_to_destination, relayed.destination_to_client
            ),
            Err(e @ (ProxyError::Resolution(_) | ProxyError::Connect { .. })) => {
                error!("{peer_addr}: {e}")
            }
            Err(e) => warn!("{peer_addr}: {e} during {:?}", ctx.state),
        }
        ctx.transition(ConnectionState::Closed);

        drop(guard);
        info!(
            "Client {peer_addr} disconnected (Active: {})",
            self.stats.active_connections()
        );
    }
}
