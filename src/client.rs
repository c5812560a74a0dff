//! Client-side connection tester
//!
//! Walks through the same exchange a browser would: greeting, CONNECT by
//! domain name, then a `HEAD /` over the tunnel. Useful for checking that a
//! proxy is reachable and that it can resolve the names you care about.

use crate::protocol::{AddressType, AuthMethod, Command, RSV, ReplyCode, Version};
use anyhow::{Result, anyhow, bail};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

/// IPv6 is only ever seen in replies from other proxies
const ATYP_IPV6: u8 = 0x04;

/// What the proxy said about the CONNECT
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// Tunnel up; the first line the target answered with, if any
    Connected {
        bound_addr: Option<SocketAddr>,
        first_line: Option<String>,
    },
    /// The proxy refused with a SOCKS5 status
    Rejected { status: u8, message: String },
}

/// describe_status maps a reply status byte to its RFC 1928 meaning
pub fn describe_status(status: u8) -> String {
    match ReplyCode::from_byte(status) {
        Some(code) => code.description().to_string(),
        None => format!("Unknown error code: 0x{status:02x}"),
    }
}

/// Socks5Probe tests one proxy against one target
#[derive(Debug, Clone)]
pub struct Socks5Probe {
    pub proxy: SocketAddr,
    pub timeout: Duration,
}

impl Socks5Probe {
    pub fn new(proxy: SocketAddr) -> Self {
        Self {
            proxy,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// run performs the full exchange against `target:port`
    pub async fn run(&self, target: &str, port: u16) -> Result<ProbeOutcome> {
        let limit = self.timeout;

        info!("1. Connecting to SOCKS proxy {}", self.proxy);
        let mut stream = timeout(limit, TcpStream::connect(self.proxy))
            .await
            .map_err(|_| anyhow!("connection timeout"))??;

        info!("2. Performing SOCKS5 handshake");
        let greeting = [Version::SOCKS5 as u8, 0x01, AuthMethod::NoAuth as u8];
        timeout(limit, stream.write_all(&greeting)).await??;

        let mut method = [0u8; 2];
        timeout(limit, stream.read_exact(&mut method)).await??;
        if method != [Version::SOCKS5 as u8, AuthMethod::NoAuth as u8] {
            bail!("handshake failed: {:02x}{:02x}", method[0], method[1]);
        }

        info!("3. Requesting connection to {target}:{port}");
        let request = connect_request(target, port)?;
        timeout(limit, stream.write_all(&request)).await??;

        info!("4. Reading connection response");
        let (status, bound_addr) = timeout(limit, read_reply(&mut stream)).await??;
        if status != ReplyCode::Succeeded as u8 {
            return Ok(ProbeOutcome::Rejected {
                status,
                message: describe_status(status),
            });
        }

        info!("5. Sending test HTTP request");
        let http = format!("HEAD / HTTP/1.1\r\nHost: {target}\r\nConnection: close\r\n\r\n");
        timeout(limit, stream.write_all(http.as_bytes())).await??;

        let mut buf = [0u8; 1024];
        let n = timeout(limit, stream.read(&mut buf)).await??;
        let first_line = (n > 0).then(|| {
            String::from_utf8_lossy(&buf[..n])
                .split("\r\n")
                .next()
                .unwrap_or_default()
                .to_string()
        });
        debug!("target answered {n} bytes");

        Ok(ProbeOutcome::Connected {
            bound_addr,
            first_line,
        })
    }
}

/// connect_request encodes a CONNECT by domain name
pub fn connect_request(target: &str, port: u16) -> Result<Vec<u8>> {
    let name = target.as_bytes();
    let len = u8::try_from(name.len()).map_err(|_| anyhow!("hostname too long: {target}"))?;
    if len == 0 {
        bail!("hostname is empty");
    }

    let mut request = vec![
        Version::SOCKS5 as u8,
        Command::Connect as u8,
        RSV,
        AddressType::DomainName as u8,
        len,
    ];
    request.extend_from_slice(name);
    request.extend_from_slice(&port.to_be_bytes());
    Ok(request)
}

/// read_reply reads a reply of any address type, returning the status and
/// the bound address when it is an IP
async fn read_reply(stream: &mut TcpStream) -> Result<(u8, Option<SocketAddr>)> {
    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    if head[0] != Version::SOCKS5 as u8 {
        bail!("invalid response from proxy: version 0x{:02x}", head[0]);
    }

    let bound_ip: Option<IpAddr> = match head[3] {
        atyp if atyp == AddressType::IPv4 as u8 => {
            let mut ip = [0u8; 4];
            stream.read_exact(&mut ip).await?;
            Some(IpAddr::V4(Ipv4Addr::from(ip)))
        }
        ATYP_IPV6 => {
            let mut ip = [0u8; 16];
            stream.read_exact(&mut ip).await?;
            Some(IpAddr::V6(Ipv6Addr::from(ip)))
        }
        atyp if atyp == AddressType::DomainName as u8 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            stream.read_exact(&mut name).await?;
            None
        }
        atyp => bail!("unknown address type in reply: 0x{atyp:02x}"),
    };

    let mut port = [0u8; 2];
    stream.read_exact(&mut port).await?;
    let port = u16::from_be_bytes(port);

    Ok((head[1], bound_ip.map(|ip| SocketAddr::new(ip, port))))
}

/// suggest_proxy_hosts guesses where a proxy might live given this
/// machine's own address
pub fn suggest_proxy_hosts(local_ip: Ipv4Addr) -> Vec<Ipv4Addr> {
    let [a, b, c, _] = local_ip.octets();
    match (a, b, c) {
        (192, 168, 1) => vec![Ipv4Addr::new(192, 168, 1, 151), Ipv4Addr::new(192, 168, 1, 1)],
        (192, 168, _) => vec![Ipv4Addr::new(192, 168, c, 1), Ipv4Addr::new(192, 168, c, 151)],
        (10, _, _) => vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 1, 1, 1)],
        _ => vec![Ipv4Addr::new(192, 168, 1, 151)],
    }
}
