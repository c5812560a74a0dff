use std::io;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Failures inside a single client connection. None of these ever leave
/// the handler that produced them.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Malformed greeting or request
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unsupported command: 0x{0:02x}")]
    UnsupportedCommand(u8),

    #[error("unsupported address type: 0x{0:02x}")]
    UnsupportedAddressType(u8),

    /// Every resolver, including the system one, came up empty
    #[error("DNS resolution failed for {0}")]
    Resolution(String),

    #[error("connection to {addr}:{port} failed: {source}")]
    Connect {
        addr: Ipv4Addr,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("timed out during {0}")]
    Timeout(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ProxyError {
    /// replied reports whether the client already received a failure reply
    /// for this error. Handshake validation failures close silently.
    pub fn replied(&self) -> bool {
        matches!(self, ProxyError::Resolution(_) | ProxyError::Connect { .. })
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
