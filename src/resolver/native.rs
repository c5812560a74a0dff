use super::{Answer, DnsBackend};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tracing::debug;

const DNS_PORT: u16 = 53;

/// NativeBackend sends DNS queries straight to the chosen server, one
/// hickory resolver per server so answers never come from anyone else
pub struct NativeBackend {
    resolvers: HashMap<Ipv4Addr, TokioAsyncResolver>,
    port: u16,
    timeout: Duration,
}

impl NativeBackend {
    /// new prepares a resolver for every server up front
    pub fn new(servers: &[Ipv4Addr], timeout: Duration) -> Self {
        Self::with_port(servers, DNS_PORT, timeout)
    }

    pub(crate) fn with_port(servers: &[Ipv4Addr], port: u16, timeout: Duration) -> Self {
        let resolvers = servers
            .iter()
            .map(|&server| (server, single_server_resolver(server, port, timeout)))
            .collect();

        Self {
            resolvers,
            port,
            timeout,
        }
    }
}

/// single_server_resolver builds a resolver that only talks to `server`,
/// with no search domains, no caching and a single attempt
fn single_server_resolver(server: Ipv4Addr, port: u16, timeout: Duration) -> TokioAsyncResolver {
    let group = NameServerConfigGroup::from_ips_clear(&[IpAddr::V4(server)], port, true);
    let config = ResolverConfig::from_parts(None, Vec::new(), group);

    let mut opts = ResolverOpts::default();
    opts.timeout = timeout;
    opts.attempts = 1;
    opts.cache_size = 0;

    TokioAsyncResolver::tokio(config, opts)
}

#[async_trait]
impl DnsBackend for NativeBackend {
    async fn resolve_via(
        &self,
        server: Ipv4Addr,
        hostname: &str,
        timeout: Duration,
    ) -> Result<Answer> {
        let lookup = match self.resolvers.get(&server) {
            Some(resolver) => resolver.ipv4_lookup(hostname).await?,
            None => {
                // Server not known at startup
                let resolver = single_server_resolver(server, self.port, timeout.min(self.timeout));
                resolver.ipv4_lookup(hostname).await?
            }
        };

        let ip = lookup
            .iter()
            .map(|a| a.0)
            .next()
            .ok_or_else(|| anyhow!("{server} returned no A record for {hostname}"))?;

        debug!("{server} answered {hostname} -> {ip}");
        Ok(Answer::from(ip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_resolver::proto::op::{Message, MessageType, ResponseCode};
    use hickory_resolver::proto::rr::rdata::A;
    use hickory_resolver::proto::rr::{RData, Record};
    use hickory_resolver::proto::serialize::binary::{BinDecodable, BinEncodable};
    use tokio::net::UdpSocket;

    /// Loopback DNS server answering every query with `answer`, or NXDOMAIN
    /// when `answer` is None. Returns its port.
    async fn dns_stub(answer: Option<Ipv4Addr>) -> u16 {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();

        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            loop {
                let Ok((n, peer)) = socket.recv_from(&mut buf).await else {
                    break;
                };
                let query = Message::from_bytes(&buf[..n]).unwrap();

                let mut response = Message::new();
                response
                    .set_id(query.id())
                    .set_message_type(MessageType::Response)
                    .set_op_code(query.op_code())
                    .set_recursion_desired(query.recursion_desired())
                    .set_recursion_available(true)
                    .add_queries(query.queries().to_vec());

                match answer {
                    Some(ip) => {
                        let name = query.queries()[0].name().clone();
                        response.add_answer(Record::from_rdata(name, 60, RData::A(A(ip))));
                    }
                    None => {
                        response.set_response_code(ResponseCode::NXDomain);
                    }
                }

                let bytes = response.to_bytes().unwrap();
                socket.send_to(&bytes, peer).await.unwrap();
            }
        });

        port
    }

    #[tokio::test]
    async fn test_queries_configured_server_for_a_record() {
        let port = dns_stub(Some(Ipv4Addr::new(10, 44, 0, 12))).await;
        let backend = NativeBackend::with_port(&[Ipv4Addr::LOCALHOST], port, Duration::from_secs(5));

        let answer = backend
            .resolve_via(Ipv4Addr::LOCALHOST, "intranet.corp", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(answer, Answer::from(Ipv4Addr::new(10, 44, 0, 12)));
    }

    #[tokio::test]
    async fn test_unlisted_server_gets_its_own_resolver() {
        let port = dns_stub(Some(Ipv4Addr::new(10, 44, 0, 13))).await;
        let backend = NativeBackend::with_port(&[], port, Duration::from_secs(5));

        let answer = backend
            .resolve_via(Ipv4Addr::LOCALHOST, "intranet.corp", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(answer.ip, Ipv4Addr::new(10, 44, 0, 13));
    }

    #[tokio::test]
    async fn test_nxdomain_is_an_error() {
        let port = dns_stub(None).await;
        let backend = NativeBackend::with_port(&[Ipv4Addr::LOCALHOST], port, Duration::from_secs(5));

        let result = backend
            .resolve_via(Ipv4Addr::LOCALHOST, "nowhere.invalid", Duration::from_secs(5))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_one_resolver_per_server() {
        let servers = [Ipv4Addr::new(10, 19, 1, 23), Ipv4Addr::new(8, 8, 8, 8)];
        let backend = NativeBackend::new(&servers, Duration::from_secs(10));

        assert_eq!(backend.resolvers.len(), 2);
        assert!(backend.resolvers.contains_key(&servers[0]));
        assert!(backend.resolvers.contains_key(&servers[1]));
    }

    #[tokio::test]
    async fn test_system_fallback_resolves_localhost() {
        let backend = NativeBackend::new(&[], Duration::from_secs(10));
        let ip = backend.resolve_default("localhost").await.unwrap();
        assert!(ip.is_loopback());
    }
}
