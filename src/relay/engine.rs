//! Relay Engine

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::{ConnectionStats, RelaySession};
use crate::config::Config;
use crate::error::{Result, Socks5Error};
use crate::filter::{self, Identity, Transform};
use crate::protocol::Endpoint;

/// Dials targets and pumps bytes between a client and its target
pub struct RelayEngine {
    buffer_size: usize,
    connect_timeout: Duration,
    idle_timeout: Duration,
    transform: Arc<dyn Transform>,
}

impl RelayEngine {
    pub fn new(
        buffer_size: usize,
        connect_timeout: Duration,
        idle_timeout: Duration,
        transform: Arc<dyn Transform>,
    ) -> Self {
        Self {
            buffer_size,
            connect_timeout,
            idle_timeout,
            transform,
        }
    }

    /// Create a new relay engine from configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.server.buffer_size,
            config.server.connect_timeout,
            config.server.connection_timeout,
            filter::from_mode(config.filter.mode),
        )
    }

    /// Open the target-facing connection.
    ///
    /// Returns the stream and its local address, which the proxy reports
    /// as BND.ADDR/BND.PORT.
    pub async fn connect_to_target(&self, target: Endpoint) -> io::Result<(TcpStream, SocketAddr)> {
        let addr = target.to_socket_addr();
        debug!("Connecting to target {}", addr);

        let stream = match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!("Failed to connect to {}: {}", addr, e);
                return Err(e);
            }
            Err(_) => {
                warn!("Connection to {} timed out after {:?}", addr, self.connect_timeout);
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {} timed out", addr),
                ));
            }
        };

        let local_addr = stream.local_addr()?;
        info!("Connected to target {} from {}", addr, local_addr);
        Ok((stream, local_addr))
    }

    /// Relay until both directions have finished or either one fails.
    ///
    /// Client -> target bytes are forwarded verbatim; target -> client bytes
    /// pass through the configured transform. End of stream on one side is
    /// propagated as a write shutdown on the other. A relay on which no bytes
    /// move in either direction for `idle_timeout` is torn down.
    pub async fn relay<C, U>(&self, session: &RelaySession, client: C, target: U) -> Result<ConnectionStats>
    where
        C: AsyncRead + AsyncWrite + Unpin,
        U: AsyncRead + AsyncWrite + Unpin,
    {
        info!("Starting relay for session {}", session.session_id);

        let (client_read, client_write) = tokio::io::split(client);
        let (target_read, target_write) = tokio::io::split(target);

        let upstream = pump(client_read, target_write, self.buffer_size, &Identity, |n| {
            session.add_bytes_up(n)
        });
        let downstream = pump(
            target_read,
            client_write,
            self.buffer_size,
            self.transform.as_ref(),
            |n| session.add_bytes_down(n),
        );

        let watchdog = async {
            loop {
                let idle = session.idle_time();
                if idle >= self.idle_timeout {
                    break;
                }
                tokio::time::sleep(self.idle_timeout - idle).await;
            }
        };

        let result = tokio::select! {
            transfer = async { tokio::try_join!(upstream, downstream) } => Ok(transfer),
            _ = watchdog => Err(()),
        };

        session.log_stats();

        match result {
            Ok(Ok(_)) => {
                debug!(
                    "Relay session {} finished after {:?}",
                    session.session_id,
                    session.duration()
                );
                Ok(session.to_stats())
            }
            Ok(Err(e)) => {
                error!("Relay session {} failed: {}", session.session_id, e);
                Err(e.into())
            }
            Err(_) => {
                warn!(
                    "Relay session {} idle for {:?}, closing",
                    session.session_id, self.idle_timeout
                );
                Err(Socks5Error::TransportError(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "relay idle timeout",
                )))
            }
        }
    }
}

/// Copy one direction chunk by chunk, then half-close the writer.
async fn pump<R, W, F>(
    mut reader: R,
    mut writer: W,
    buffer_size: usize,
    transform: &dyn Transform,
    on_forwarded: F,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: Fn(u64),
{
    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let chunk = transform.transform(&buf[..n]);
        writer.write_all(&chunk).await?;
        writer.flush().await?;
        on_forwarded(chunk.len() as u64);
    }

    // the peer may already be gone
    if let Err(e) = writer.shutdown().await {
        debug!("Write shutdown after end of stream failed: {}", e);
    }
    Ok(())
}
