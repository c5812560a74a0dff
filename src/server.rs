use crate::config::ServerConfig;
use crate::handler::{ConnectionHandler, Socks5Handler};
use crate::resolver::{DnsBackend, Resolver};
use crate::stats::{ProxyStats, StatsSnapshot};
use anyhow::{Result, anyhow, bail};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Socks5Server represents a SOCKS5 server and houses related
/// configuration data
pub struct Socks5Server {
    pub config: Arc<ServerConfig>,
    handler: Arc<dyn ConnectionHandler>,
    stats: Arc<ProxyStats>,
    listener: Option<TcpListener>,
}

/// Socks5Server implementation block
impl Socks5Server {
    /// new wires the default pipeline: the configured DNS servers queried
    /// through `backend`, then the SOCKS5 handler
    pub fn new(config: ServerConfig, backend: Arc<dyn DnsBackend>) -> Self {
        let stats = Arc::new(ProxyStats::new());
        let resolver = Resolver::new(
            config.dns_servers.clone(),
            backend,
            Arc::clone(&stats),
            config.timeouts.dns,
        );
        let handler = Socks5Handler::new(Arc::new(resolver), Arc::clone(&stats), config.timeouts);

        Self::with_handler(config, Arc::new(handler), stats)
    }

    /// with_handler runs any connection handler behind the accept loop
    pub fn with_handler(
        config: ServerConfig,
        handler: Arc<dyn ConnectionHandler>,
        stats: Arc<ProxyStats>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            handler,
            stats,
            listener: None,
        }
    }

    pub fn stats(&self) -> Arc<ProxyStats> {
        Arc::clone(&self.stats)
    }

    /// bind to the listen address, only once
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        if self.listener.is_some() {
            bail!("listener already bound");
        }

        let listen_addr = self.config.listen_addr();
        let listener = TcpListener::bind(listen_addr)
            .await
            .map_err(|e| anyhow!("failed to bind {listen_addr}: {e}"))?;
        let addr = listener.local_addr()?;

        info!("SOCKS5 proxy listening on {addr}");

        self.listener = Some(listener);
        Ok(addr)
    }

    /// run serves until Ctrl-C
    pub async fn run(&mut self) -> Result<StatsSnapshot> {
        self.run_until(async {
            if let Err(e) = signal::ctrl_c().await {
                error!("cannot listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// run_until accepts connections until `shutdown` completes, then waits
    /// for in-flight connections to finish on their own. A Ctrl-C during
    /// that wait aborts them.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<StatsSnapshot>
    where
        F: Future<Output = ()>,
    {
        if self.listener.is_none() {
            self.bind().await?;
        }
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow!("listener missing after bind"))?;

        let mut tasks = JoinSet::new();
        tokio::pin!(shutdown);

        // Listen for connections to proxy
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((inbound, peer_addr)) => {
                        let handler = Arc::clone(&self.handler);
                        tasks.spawn(async move { handler.handle(inbound, peer_addr).await });
                    }
                    Err(e) => error!("Accept error: {e}"),
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!("connection task failed: {e}");
                    }
                }
            }
        }

        drop(listener);

        if !tasks.is_empty() {
            info!("Waiting for {} active connection(s) to finish", tasks.len());
            let forced = tokio::select! {
                _ = async { while tasks.join_next().await.is_some() {} } => false,
                _ = signal::ctrl_c() => true,
            };
            if forced {
                warn!("Aborting {} connection(s)", tasks.len());
                tasks.shutdown().await;
            }
        }

        let snapshot = self.stats.snapshot();
        info!("\n{snapshot}");
        info!("SOCKS5 proxy stopped");
        Ok(snapshot)
    }
}
