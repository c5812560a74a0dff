use crate::error::{ProxyError, Result};
use crate::protocol::AddressType;
use std::fmt;
use std::net::Ipv4Addr;

/// TargetHost is the destination as the client named it
#[derive(Debug, Clone, PartialEq)]
pub enum TargetHost {
    IPv4(Ipv4Addr),
    DomainName(String),
}

/// Destination pairs the requested host with its port
#[derive(Debug, Clone, PartialEq)]
pub struct Destination {
    pub host: TargetHost,
    pub port: u16,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            TargetHost::IPv4(ip) => write!(f, "{ip}:{}", self.port),
            TargetHost::DomainName(name) => write!(f, "{name}:{}", self.port),
        }
    }
}

/// parse_destination parses DST.ADDR and DST.PORT out of a request buffer,
/// starting at `offset` (the byte right after ATYP)
pub fn parse_destination(data: &[u8], offset: usize, atyp: u8) -> Result<Destination> {
    let mut offset = offset;

    match AddressType::from_byte(atyp) {
        Some(AddressType::IPv4) => {
            let ip = parse_ipv4_address(data, &mut offset)?;
            let port = parse_port(data, &mut offset)?;
            Ok(Destination {
                host: TargetHost::IPv4(ip),
                port,
            })
        }
        Some(AddressType::DomainName) => {
            let domain = parse_domain_address(data, &mut offset)?;
            let port = parse_port(data, &mut offset)?;
            Ok(Destination {
                host: TargetHost::DomainName(domain),
                port,
            })
        }
        None => Err(ProxyError::UnsupportedAddressType(atyp)),
    }
}

/// parse_ipv4_address parses an IPv4 address from a byte slice
pub fn parse_ipv4_address(data: &[u8], offset: &mut usize) -> Result<Ipv4Addr> {
    let ip_bytes: [u8; 4] = data
        .get(*offset..*offset + 4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| ProxyError::Protocol("not enough data for IPv4 address".into()))?;

    // Push offset past address -> 4 bytes
    *offset += 4;

    Ok(Ipv4Addr::from(ip_bytes))
}

/// parse_domain_address parses a length-prefixed domain from a byte slice
pub fn parse_domain_address(data: &[u8], offset: &mut usize) -> Result<String> {
    // First octet holds the number of octets to follow
    let domain_len = *data
        .get(*offset)
        .ok_or_else(|| ProxyError::Protocol("not enough data to read domain length".into()))?
        as usize;

    if domain_len == 0 {
        return Err(ProxyError::Protocol("domain length cannot be 0".into()));
    }

    *offset += 1;

    let domain = data
        .get(*offset..*offset + domain_len)
        .ok_or_else(|| ProxyError::Protocol("not enough data for domain".into()))?;
    let domain = String::from_utf8(domain.to_vec())
        .map_err(|e| ProxyError::Protocol(format!("invalid domain: {e}")))?;

    *offset += domain_len;

    Ok(domain)
}

/// parse_port reads a big-endian port
fn parse_port(data: &[u8], offset: &mut usize) -> Result<u16> {
    let port = data
        .get(*offset..*offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| ProxyError::Protocol("not enough data for port".into()))?;

    *offset += 2;

    Ok(port)
}
