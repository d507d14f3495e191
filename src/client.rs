//! SOCKS5 Client
//!
//! Negotiates a CONNECT through the proxy, then performs a single
//! request/response exchange with the target.

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, instrument};

use crate::error::{Result, Socks5Error};
use crate::protocol::{Endpoint, Established, Handshake};

#[derive(Debug, Clone)]
pub struct Socks5Client {
    proxy_addr: SocketAddr,
    buffer_size: usize,
}

impl Socks5Client {
    pub fn new(proxy_addr: SocketAddr) -> Self {
        Self {
            proxy_addr,
            buffer_size: 1024,
        }
    }

    /// Largest answer read by [`Socks5Client::exchange`]
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Dial the proxy and negotiate a tunnel to `target`.
    ///
    /// A refusal by the proxy surfaces as [`Socks5Error::AuthenticationRejected`]
    /// or [`Socks5Error::ConnectRejected`]; local failures as transport errors.
    #[instrument(skip(self), fields(proxy = %self.proxy_addr))]
    pub async fn connect(&self, target: Endpoint) -> Result<(TcpStream, Established)> {
        debug!("Connecting to proxy {}", self.proxy_addr);
        let stream = TcpStream::connect(self.proxy_addr).await?;

        let (stream, established) = Handshake::initiator(stream).connect(target).await?;
        info!(
            "Tunnel to {} established, proxy bound {}",
            established.requested, established.bound
        );
        Ok((stream, established))
    }

    /// Send `message` and read one bounded answer.
    pub async fn exchange<S>(&self, stream: &mut S, message: &[u8]) -> Result<Vec<u8>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        stream.write_all(message).await?;
        stream.flush().await?;
        debug!("Sent {} bytes", message.len());

        let mut buf = vec![0u8; self.buffer_size];
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(Socks5Error::TransportClosed);
        }
        buf.truncate(n);
        debug!("Received {} bytes", n);
        Ok(buf)
    }
}
