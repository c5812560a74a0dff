// Request format (RFC 1928)
// +----+-----+-------+------+----------+----------+
// |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
// +----+-----+-------+------+----------+----------+
// | 1  |  1  | X'00' |  1   | Variable |    2     |
// +----+-----+-------+------+----------+----------+

// RSV: Fields marked RESERVED (RSV) must be set to X'00'.
pub const RSV: u8 = 0x00;

/// Largest greeting or request read in a single pass:
/// VER + NMETHODS + 255 methods, or VER/CMD/RSV/ATYP + LEN + 255 + PORT
pub const MAX_HANDSHAKE: usize = 262;

/// Smallest acceptable greeting: VER, NMETHODS, one method
pub const MIN_GREETING: usize = 3;

/// Smallest acceptable request: an IPv4 CONNECT
pub const MIN_REQUEST: usize = 10;

/// Length of every reply this server emits (IPv4 bound address)
pub const REPLY_LEN: usize = 10;

/// AddressType represents the SOCKS5 address types this server accepts.
/// IPv6 (0x04) is deliberately absent and rejected as unknown.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AddressType {
    IPv4 = 0x01,
    DomainName = 0x03,
}

/// AddressType implementation block
impl AddressType {
    /// from_byte converts a byte to its related network address type
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(AddressType::IPv4),
            0x03 => Some(AddressType::DomainName),
            _ => None,
        }
    }
}

/// Version represents available SOCKS proxy versions.
/// Only SOCKS5 is spoken here.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Version {
    SOCKS5 = 0x05,
}

/// AuthMethod represents SOCKS5 authentication methods
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AuthMethod {
    NoAuth = 0x00,
}

/// Command represents SOCKS5 protocol commands
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Connect = 0x01,
    Bind = 0x02,
    UdpAssociate = 0x03,
}

/// Command implementation block
impl Command {
    /// from_byte converts a byte to its related SOCKS5 protocol command
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Command::Connect),
            0x02 => Some(Command::Bind),
            0x03 => Some(Command::UdpAssociate),
            _ => None,
        }
    }
}

/// ReplyCode covers the full RFC 1928 reply table. The server only emits
/// Succeeded, ServerFailure and HostUnreachable, but the probe client has
/// to interpret whatever a proxy sends back.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReplyCode {
    Succeeded = 0x00,
    ServerFailure = 0x01,
    ConnectionNotAllowed = 0x02,
    NetworkUnreachable = 0x03,
    HostUnreachable = 0x04,
    ConnectionRefused = 0x05,
    TtlExpired = 0x06,
    CommandNotSupported = 0x07,
    AddrTypeUnsupported = 0x08,
    // 0x09 - 0xFF: unassigned
}

impl ReplyCode {
    /// from_byte maps a reply status byte, None for unassigned values
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(ReplyCode::Succeeded),
            0x01 => Some(ReplyCode::ServerFailure),
            0x02 => Some(ReplyCode::ConnectionNotAllowed),
            0x03 => Some(ReplyCode::NetworkUnreachable),
            0x04 => Some(ReplyCode::HostUnreachable),
            0x05 => Some(ReplyCode::ConnectionRefused),
            0x06 => Some(ReplyCode::TtlExpired),
            0x07 => Some(ReplyCode::CommandNotSupported),
            0x08 => Some(ReplyCode::AddrTypeUnsupported),
            _ => None,
        }
    }

    /// description returns the human readable meaning of the status
    pub fn description(&self) -> &'static str {
        match self {
            ReplyCode::Succeeded => "Succeeded",
            ReplyCode::ServerFailure => "General SOCKS server failure",
            ReplyCode::ConnectionNotAllowed => "Connection not allowed by ruleset",
            ReplyCode::NetworkUnreachable => "Network unreachable",
            ReplyCode::HostUnreachable => "Host unreachable",
            ReplyCode::ConnectionRefused => "Connection refused",
            ReplyCode::TtlExpired => "TTL expired",
            ReplyCode::CommandNotSupported => "Command not supported",
            ReplyCode::AddrTypeUnsupported => "Address type not supported",
        }
    }
}
