use crate::address::{Destination, parse_destination};
use crate::error::{ProxyError, Result};
use crate::protocol::{
    AddressType, Command, MAX_HANDSHAKE, MIN_REQUEST, REPLY_LEN, RSV, ReplyCode, Version,
};
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// handle_socks_request reads the client's request, checks version and
/// command and returns the destination it asks for. Anything malformed or
/// unsupported is an error with no reply sent.
pub async fn handle_socks_request(stream: &mut TcpStream, io_timeout: Duration) -> Result<Destination> {
    // SOCKS5 request format
    // +----+-----+-------+------+----------+----------+
    // |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
    // +----+-----+-------+------+----------+----------+
    // | 1  |  1  | X'00' |  1   | Variable |    2     |
    // +----+-----+-------+------+----------+----------+

    let mut buf = [0u8; MAX_HANDSHAKE];
    let n = timeout(io_timeout, stream.read(&mut buf))
        .await
        .map_err(|_| ProxyError::Timeout("request"))??;

    parse_request(&buf[..n])
}

/// parse_request decodes a complete request buffer
pub fn parse_request(request: &[u8]) -> Result<Destination> {
    if request.len() < MIN_REQUEST {
        return Err(ProxyError::Protocol(format!(
            "request too short: {} bytes",
            request.len()
        )));
    }

    // Ensure version is 0x05 -> SOCKS5
    if request[0] != Version::SOCKS5 as u8 {
        return Err(ProxyError::Protocol(format!(
            "not SOCKS5: version 0x{:02x}",
            request[0]
        )));
    }

    // Not checking RSV (RESERVED) -> 0x00
    match Command::from_byte(request[1]) {
        Some(Command::Connect) => {}
        Some(cmd @ (Command::Bind | Command::UdpAssociate)) => {
            debug!("rejecting {cmd:?} request");
            return Err(ProxyError::UnsupportedCommand(request[1]));
        }
        None => return Err(ProxyError::UnsupportedCommand(request[1])),
    }

    parse_destination(request, 4, request[3])
}

/// connect_destination is the single, bounded attempt to reach the target
pub async fn connect_destination(
    ip: Ipv4Addr,
    port: u16,
    connect_timeout: Duration,
) -> io::Result<TcpStream> {
    match timeout(connect_timeout, TcpStream::connect((ip, port))).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("connect timed out after {connect_timeout:?}"),
        )),
    }
}

/// handle_connect_cmd connects to the resolved target and tells the client
/// how it went: success carries the destination as bound address, failure
/// a zeroed one
pub async fn handle_connect_cmd(
    stream: &mut TcpStream,
    ip: Ipv4Addr,
    port: u16,
    connect_timeout: Duration,
    io_timeout: Duration,
) -> Result<TcpStream> {
    match connect_destination(ip, port, connect_timeout).await {
        Ok(outbound) => {
            send_reply(
                stream,
                ReplyCode::Succeeded,
                SocketAddrV4::new(ip, port),
                io_timeout,
            )
            .await?;
            Ok(outbound)
        }
        Err(source) => {
            send_failure(stream, ReplyCode::ServerFailure, io_timeout).await;
            Err(ProxyError::Connect {
                addr: ip,
                port,
                source,
            })
        }
    }
}

/// send_failure writes a failure reply with a zeroed bound address. The
/// connection is being abandoned either way, so a write error is ignored.
pub async fn send_failure(stream: &mut TcpStream, reply_code: ReplyCode, io_timeout: Duration) {
    let unspecified = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
    if let Err(e) = send_reply(stream, reply_code, unspecified, io_timeout).await {
        debug!("could not deliver {reply_code:?} reply: {e}");
    }
}

/// send_reply handles logic for sending replies from the SOCKS server to
/// the client
pub async fn send_reply(
    stream: &mut TcpStream,
    reply_code: ReplyCode,
    bound_addr: SocketAddrV4,
    io_timeout: Duration,
) -> Result<()> {
    let reply = encode_reply(reply_code, bound_addr);
    timeout(io_timeout, stream.write_all(&reply))
        .await
        .map_err(|_| ProxyError::Timeout("reply"))??;
    Ok(())
}

/// encode_reply builds the fixed-size IPv4 reply
pub fn encode_reply(reply_code: ReplyCode, bound_addr: SocketAddrV4) -> [u8; REPLY_LEN] {
    // SOCKS5 reply format
    // +----+-----+-------+------+----------+----------+
    // |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
    // +----+-----+-------+------+----------+----------+
    // | 1  |  1  | X'00' |  1   |    4     |    2     |
    // +----+-----+-------+------+----------+----------+
    let mut reply = [0u8; REPLY_LEN];
    reply[0] = Version::SOCKS5 as u8;
    reply[1] = reply_code as u8;
    reply[2] = RSV;
    reply[3] = AddressType::IPv4 as u8;
    reply[4..8].copy_from_slice(&bound_addr.ip().octets());
    reply[8..10].copy_from_slice(&bound_addr.port().to_be_bytes());
    reply
}
