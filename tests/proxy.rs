use anyhow::{Result, anyhow};
use async_trait::async_trait;
use splitsocks::client::{ProbeOutcome, Socks5Probe};
use splitsocks::{Answer, DnsBackend, ServerConfig, Socks5Server, StatsSnapshot};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const TUNNEL_DNS: Ipv4Addr = Ipv4Addr::new(10, 19, 1, 23);

/// Tunnel DNS that only knows `localhost`; the system resolver knows nothing
struct TunnelOnlyDns;

#[async_trait]
impl DnsBackend for TunnelOnlyDns {
    async fn resolve_via(&self, server: Ipv4Addr, hostname: &str, _timeout: Duration) -> Result<Answer> {
        if server == TUNNEL_DNS && hostname == "localhost" {
            Ok(Answer::from(Ipv4Addr::LOCALHOST))
        } else {
            Err(anyhow!("NXDOMAIN {hostname}"))
        }
    }

    async fn resolve_default(&self, hostname: &str) -> Result<Ipv4Addr> {
        Err(anyhow!("system DNS has no {hostname}"))
    }
}

struct RunningProxy {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<StatsSnapshot>>,
}

impl RunningProxy {
    async fn start() -> Self {
        let config = ServerConfig::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0, vec![TUNNEL_DNS]);
        let mut server = Socks5Server::new(config, Arc::new(TunnelOnlyDns));
        let addr = server.bind().await.unwrap();

        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            server
                .run_until(async {
                    let _ = stopped.await;
                })
                .await
        });

        Self { addr, stop, task }
    }

    async fn shutdown(self) -> StatsSnapshot {
        self.stop.send(()).unwrap();
        self.task.await.unwrap().unwrap()
    }
}

/// A stand-in web server answering every request with a fixed status line
async fn http_stand_in() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let _ = stream
                    .write_all(b"HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n")
                    .await;
            });
        }
    });
    addr
}

#[tokio::test]
async fn test_domain_connect_end_to_end() {
    let destination = http_stand_in().await;
    let proxy = RunningProxy::start().await;

    let mut client = TcpStream::connect(proxy.addr).await.unwrap();

    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut method = [0u8; 2];
    client.read_exact(&mut method).await.unwrap();
    assert_eq!(method, [0x05, 0x00]);

    let mut request = vec![0x05, 0x01, 0x00, 0x03, 9];
    request.extend_from_slice(b"localhost");
    request.extend_from_slice(&destination.port().to_be_bytes());
    client.write_all(&request).await.unwrap();

    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).await.unwrap();
    let mut expected = vec![0x05, 0x00, 0x00, 0x01, 0x7F, 0x00, 0x00, 0x01];
    expected.extend_from_slice(&destination.port().to_be_bytes());
    assert_eq!(reply.to_vec(), expected);

    client
        .write_all(b"HEAD / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    assert_eq!(
        response,
        b"HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n".to_vec()
    );

    let snapshot = proxy.shutdown().await;
    assert_eq!(snapshot.total_connections, 1);
    assert_eq!(snapshot.active_connections, 0);
    assert_eq!(snapshot.dns_queries, 1);
    assert_eq!(snapshot.dns_failures, 0);
}

#[tokio::test]
async fn test_probe_against_running_proxy() {
    let destination = http_stand_in().await;
    let proxy = RunningProxy::start().await;

    let outcome = Socks5Probe::new(proxy.addr)
        .with_timeout(Duration::from_secs(5))
        .run("localhost", destination.port())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        ProbeOutcome::Connected {
            bound_addr: Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), destination.port())),
            first_line: Some("HTTP/1.1 204 No Content".to_string()),
        }
    );

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_unknown_name_reports_host_unreachable() {
    let proxy = RunningProxy::start().await;

    let outcome = Socks5Probe::new(proxy.addr)
        .run("intranet.invalid", 80)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ProbeOutcome::Rejected {
            status: 0x04,
            message: "Host unreachable".to_string(),
        }
    );

    let snapshot = proxy.shutdown().await;
    assert_eq!(snapshot.dns_queries, 1);
    assert_eq!(snapshot.dns_failures, 1);
}

#[tokio::test]
async fn test_concurrent_clients_are_all_counted() {
    let destination = http_stand_in().await;
    let proxy = RunningProxy::start().await;
    let n = 25;

    let mut clients = Vec::new();
    for _ in 0..n {
        let addr = proxy.addr;
        let port = destination.port();
        clients.push(tokio::spawn(async move {
            Socks5Probe::new(addr).run("localhost", port).await
        }));
    }
    for client in clients {
        assert!(matches!(
            client.await.unwrap().unwrap(),
            ProbeOutcome::Connected { .. }
        ));
    }

    let snapshot = proxy.shutdown().await;
    assert_eq!(snapshot.total_connections, n);
    assert_eq!(snapshot.active_connections, 0);
    assert_eq!(snapshot.dns_queries, n);
}

#[tokio::test]
async fn test_shutdown_lets_active_connection_finish() {
    let destination = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = destination.local_addr().unwrap().port();
    let proxy = RunningProxy::start().await;

    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut method = [0u8; 2];
    client.read_exact(&mut method).await.unwrap();

    let mut request = vec![0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1];
    request.extend_from_slice(&port.to_be_bytes());
    client.write_all(&request).await.unwrap();
    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[1], 0x00);
    let (mut upstream, _) = destination.accept().await.unwrap();

    // Stop accepting while the relay is still live
    let addr = proxy.addr;
    proxy.stop.send(()).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(TcpStream::connect(addr).await.is_err());

    // The existing tunnel still carries data
    client.write_all(b"still here").await.unwrap();
    let mut buf = [0u8; 10];
    upstream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"still here");

    drop(upstream);
    let snapshot = proxy.task.await.unwrap().unwrap();
    assert_eq!(snapshot.total_connections, 1);
    assert_eq!(snapshot.active_connections, 0);
}
