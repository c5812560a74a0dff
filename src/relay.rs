use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::debug;

/// Transfer buffer per direction
pub const RELAY_BUFFER_SIZE: usize = 4096;

/// Bytes moved in each direction over the life of a relay
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RelayStats {
    pub client_to_destination: u64,
    pub destination_to_client: u64,
}

/// Relay holds an established client/destination pair
pub struct Relay {
    pub inbound: TcpStream,
    pub outbound: TcpStream,
    pub io_timeout: Duration,
}

impl Relay {
    pub fn new(inbound: TcpStream, outbound: TcpStream, io_timeout: Duration) -> Self {
        Self {
            inbound,
            outbound,
            io_timeout,
        }
    }

    /// run copies both directions concurrently. Whichever direction stops
    /// first, for EOF, error or idle timeout, takes the other one down with
    /// it. Both sockets are closed by the time this returns.
    pub async fn run(self) -> RelayStats {
        let (client_read, client_write) = self.inbound.into_split();
        let (dest_read, dest_write) = self.outbound.into_split();

        let (closed, _) = watch::channel(false);

        let (client_to_destination, destination_to_client) = tokio::join!(
            pump(client_read, dest_write, &closed, self.io_timeout, "client->dest"),
            pump(dest_read, client_write, &closed, self.io_timeout, "dest->client"),
        );

        // All four halves were dropped inside the pumps
        RelayStats {
            client_to_destination,
            destination_to_client,
        }
    }
}

/// pump forwards `src` into `dst` until the source ends or the other
/// direction signals teardown, then signals teardown itself
async fn pump(
    mut src: OwnedReadHalf,
    mut dst: OwnedWriteHalf,
    closed: &watch::Sender<bool>,
    io_timeout: Duration,
    direction: &'static str,
) -> u64 {
    let mut peer_closed = closed.subscribe();
    let mut total = 0u64;

    let copy = async {
        let mut buf = [0u8; RELAY_BUFFER_SIZE];
        loop {
            let n = match timeout(io_timeout, src.read(&mut buf)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    debug!("{direction} read ended: {e}");
                    break;
                }
                Err(_) => {
                    debug!("{direction} idle for {io_timeout:?}");
                    break;
                }
            };

            match timeout(io_timeout, dst.write_all(&buf[..n])).await {
                Ok(Ok(())) => total += n as u64,
                Ok(Err(e)) => {
                    debug!("{direction} write ended: {e}");
                    break;
                }
                Err(_) => {
                    debug!("{direction} write stalled for {io_timeout:?}");
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = copy => {}
        _ = torn_down(&mut peer_closed) => {}
    }

    closed.send_replace(true);

    // Best effort FIN; the peer may already be gone
    let _ = dst.shutdown().await;
    drop(dst);
    drop(src);

    total
}

/// torn_down resolves once either direction has signalled teardown
async fn torn_down(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}
