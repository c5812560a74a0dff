use crate::error::{ProxyError, Result};
use crate::protocol::{AuthMethod, MAX_HANDSHAKE, MIN_GREETING, Version};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// negotiate_auth handles the method negotiation between the SOCKS server
/// and client. Whatever the client offers, "no authentication" is selected.
pub async fn negotiate_auth(stream: &mut TcpStream, io_timeout: Duration) -> Result<()> {
    // ClientHello format
    // +----+----------+----------+
    // |VER | NMETHODS | METHODS  |
    // +----+----------+----------+
    // | 1  |    1     | 1 to 255 |
    // +----+----------+----------+

    // Greeting arrives in a single read
    let mut buf = [0u8; MAX_HANDSHAKE];
    let n = timeout(io_timeout, stream.read(&mut buf))
        .await
        .map_err(|_| ProxyError::Timeout("greeting"))??;

    validate_greeting(&buf[..n])?;

    // ServerChoice method selection reply format
    // +----+--------+
    // |VER | METHOD |
    // +----+--------+
    // | 1  |   1    |
    // +----+--------+
    let reply = [Version::SOCKS5 as u8, AuthMethod::NoAuth as u8];
    timeout(io_timeout, stream.write_all(&reply))
        .await
        .map_err(|_| ProxyError::Timeout("method selection"))??;

    Ok(())
}

/// validate_greeting checks the length and version of a client hello.
/// The offered methods themselves are not inspected.
fn validate_greeting(greeting: &[u8]) -> Result<()> {
    if greeting.len() < MIN_GREETING {
        return Err(ProxyError::Protocol(format!(
            "greeting too short: {} bytes",
            greeting.len()
        )));
    }

    // Ensure version is 0x05 -> SOCKS5
    if greeting[0] != Version::SOCKS5 as u8 {
        return Err(ProxyError::Protocol(format!(
            "not SOCKS5: version 0x{:02x}",
            greeting[0]
        )));
    }

    Ok(())
}
