//! Toy target server: answers every request with a fixed response.

use std::net::SocketAddr;

use anyhow::Context;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::Result;

pub struct TargetServer {
    listener: TcpListener,
    response: Bytes,
    buffer_size: usize,
}

impl TargetServer {
    pub async fn bind(addr: SocketAddr, response: impl Into<Bytes>, buffer_size: usize) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind target server to {}", addr))?;

        Ok(Self {
            listener,
            response: response.into(),
            buffer_size,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept forever, one task per connection
    pub async fn run(&self) -> Result<()> {
        info!("Target server listening on {}", self.local_addr()?);

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    debug!("Accepted target connection from {}", addr);
                    let response = self.response.clone();
                    let buffer_size = self.buffer_size;

                    tokio::spawn(async move {
                        if let Err(e) = serve(stream, &response, buffer_size).await {
                            warn!("Target connection from {} failed: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                }
            }
        }
    }
}

/// Read one chunk; answer it unless the peer sent nothing; then close.
pub async fn serve<S>(mut stream: S, response: &[u8], buffer_size: usize) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    let n = stream.read(&mut buf).await?;
    if n == 0 {
        debug!("Peer closed without sending data");
        return Ok(());
    }

    info!(
        "Received: {:?}",
        String::from_utf8_lossy(&buf[..n])
    );
    stream.write_all(response).await?;
    stream.shutdown().await?;
    Ok(())
}
