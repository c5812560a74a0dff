use anyhow::Result;
use clap::{Parser, ValueEnum};
use splitsocks::{DnsBackend, NativeBackend, NslookupBackend, ServerConfig, Socks5Server, Timeouts};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// How each configured DNS server is queried
#[derive(ValueEnum, Clone, Copy, Debug)]
enum Backend {
    /// Speak DNS directly
    Native,
    /// Shell out to nslookup
    Nslookup,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "A lightweight SOCKS5 proxy with split-horizon DNS", long_about = None)]
struct Args {
    /// Listen address
    #[arg(long, default_value = "0.0.0.0")]
    host: IpAddr,

    /// Listen port
    #[arg(short, long, default_value_t = splitsocks::config::DEFAULT_PORT)]
    port: u16,

    /// DNS servers to try, in order, before the system resolver
    #[arg(short, long, num_args = 1..)]
    dns: Vec<Ipv4Addr>,

    /// DNS query method
    #[arg(long, value_enum, default_value_t = Backend::Native)]
    dns_backend: Backend,

    /// Outbound connect timeout in seconds
    #[arg(long, default_value_t = 30)]
    connect_timeout: u64,

    /// Client and destination read/write timeout in seconds
    #[arg(long, default_value_t = 30)]
    io_timeout: u64,

    /// Per-server DNS query timeout in seconds
    #[arg(long, default_value_t = 10)]
    dns_timeout: u64,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse args
    let args = Args::parse();

    // Initialize tracing subscriber
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(level).init();

    let timeouts = Timeouts {
        io: Duration::from_secs(args.io_timeout),
        connect: Duration::from_secs(args.connect_timeout),
        dns: Duration::from_secs(args.dns_timeout),
    };
    let config = ServerConfig::new(args.host, args.port, args.dns).with_timeouts(timeouts);

    let backend: Arc<dyn DnsBackend> = match args.dns_backend {
        Backend::Native => Arc::new(NativeBackend::new(&config.dns_servers, timeouts.dns)),
        Backend::Nslookup => Arc::new(NslookupBackend::new()),
    };

    if config.dns_servers.is_empty() {
        info!("No DNS servers given, using system DNS only");
    } else {
        let servers: Vec<String> = config.dns_servers.iter().map(|s| s.to_string()).collect();
        info!("DNS servers: {} ({:?})", servers.join(", "), args.dns_backend);
    }

    // Instantiate server
    let mut server = Socks5Server::new(config, backend);

    // Bind failures end the process with an error
    let addr = server.bind().await?;
    info!("Client configuration: SOCKS5 host {}, port {}", addr.ip(), addr.port());
    info!("Press Ctrl+C to stop");

    // Run it
    server.run().await?;
    Ok(())
}
