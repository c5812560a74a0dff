use anyhow::Result;
use clap::Parser;
use splitsocks::client::{ProbeOutcome, Socks5Probe, suggest_proxy_hosts};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::process::ExitCode;
use tokio::net::UdpSocket;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Test a SOCKS5 proxy connection", long_about = None)]
struct Args {
    /// SOCKS5 proxy host, guessed from the local network when absent
    #[arg(long)]
    proxy_host: Option<IpAddr>,

    /// SOCKS5 proxy port
    #[arg(long, default_value_t = splitsocks::config::DEFAULT_PORT)]
    proxy_port: u16,

    /// Target host to reach through the proxy
    #[arg(short, long, default_value = "google.com")]
    target: String,

    /// Target port
    #[arg(short, long, default_value_t = 443)]
    port: u16,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(level).init();

    let candidates = match args.proxy_host {
        Some(host) => vec![host],
        None => {
            let local_ip = match local_ipv4().await {
                Ok(ip) => ip,
                Err(e) => {
                    warn!("could not determine local address: {e}");
                    Ipv4Addr::UNSPECIFIED
                }
            };
            let hosts: Vec<IpAddr> = suggest_proxy_hosts(local_ip)
                .into_iter()
                .map(IpAddr::V4)
                .collect();
            info!("Auto-detecting proxy host, trying {hosts:?}");
            hosts
        }
    };

    for host in candidates {
        let proxy = SocketAddr::new(host, args.proxy_port);
        match Socks5Probe::new(proxy).run(&args.target, args.port).await {
            Ok(ProbeOutcome::Connected { first_line, .. }) => {
                match first_line {
                    Some(line) => info!("HTTP Response: {line}"),
                    None => warn!("No HTTP response received"),
                }
                info!("Found working proxy at {proxy}");
                return ExitCode::SUCCESS;
            }
            Ok(ProbeOutcome::Rejected { status, message }) => {
                error!("{proxy} refused the connection: {message} (0x{status:02x})")
            }
            Err(e) => error!("{proxy}: {e}"),
        }
    }

    error!(
        "No working proxy found. Check that the proxy is running, both devices share a network, and port {} is open",
        args.proxy_port
    );
    ExitCode::FAILURE
}

/// local_ipv4 finds the address this host would use to reach the internet.
/// Connecting a UDP socket sends nothing.
async fn local_ipv4() -> Result<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect("8.8.8.8:80").await?;
    match socket.local_addr()?.ip() {
        IpAddr::V4(ip) => Ok(ip),
        IpAddr::V6(ip) => anyhow::bail!("unexpected IPv6 local address {ip}"),
    }
}
