//! Connection Manager Implementation

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::protocol::Handshake;
use crate::relay::{RelayEngine, RelaySession};
use crate::resource::{ResourceManager, ResourceUsageStats};
use crate::Result;

/// Accepts proxy clients and runs each one on its own task
pub struct ConnectionManager {
    listener: TcpListener,
    config: Arc<Config>,
    engine: Arc<RelayEngine>,
    resource_manager: Arc<ResourceManager>,
    active_connections: Arc<AtomicUsize>,
    next_connection_id: AtomicUsize,
    shutdown_flag: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl ConnectionManager {
    /// Bind the listener on `config.server.bind_addr`
    pub async fn bind(config: Arc<Config>) -> Result<Self> {
        let bind_addr = config.server.bind_addr;
        info!("Binding TCP listener to {}", bind_addr);
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", bind_addr))?;

        let engine = Arc::new(RelayEngine::from_config(&config));
        let resource_manager = Arc::new(ResourceManager::new(config.server.max_connections));
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            listener,
            config,
            engine,
            resource_manager,
            active_connections: Arc::new(AtomicUsize::new(0)),
            next_connection_id: AtomicUsize::new(1),
            shutdown_flag: AtomicBool::new(false),
            shutdown_tx,
        })
    }

    /// Address the listener is actually bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until shutdown is initiated
    pub async fn run(&self) -> Result<()> {
        info!("Accepting SOCKS5 connections on {}", self.local_addr()?);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        // handshake deadline leaves room for a dial that runs into connect_timeout
        let handshake_deadline =
            self.config.server.handshake_timeout + self.config.server.connect_timeout;

        loop {
            if self.shutdown_flag.load(Ordering::Relaxed) {
                info!("Shutdown flag set, stopping connection acceptance");
                break;
            }

            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            debug!("Accepted connection from {}", addr);

                            let connection_slot = match self.resource_manager.acquire_connection_slot() {
                                Ok(slot) => slot,
                                Err(_) => {
                                    warn!("Connection limit reached, rejecting connection from {}", addr);
                                    continue;
                                }
                            };

                            let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
                            let engine = Arc::clone(&self.engine);
                            let active_connections = Arc::clone(&self.active_connections);
                            let mut shutdown_rx = self.shutdown_tx.subscribe();

                            active_connections.fetch_add(1, Ordering::Relaxed);
                            tokio::spawn(async move {
                                let _connection_slot = connection_slot;
                                let start_time = Instant::now();

                                let result = tokio::select! {
                                    result = Self::handle_connection(stream, addr, engine, handshake_deadline, connection_id) => result,
                                    _ = shutdown_rx.recv() => {
                                        info!("Connection {} received shutdown signal, closing", connection_id);
                                        Ok(())
                                    }
                                };

                                match result {
                                    Ok(()) => {
                                        info!("Connection {} from {} closed after {:?}", connection_id, addr, start_time.elapsed());
                                    }
                                    Err(e) => {
                                        error!("Error handling connection {}: {:#}", connection_id, e);
                                    }
                                }

                                active_connections.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!("Error accepting connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal, stopping connection acceptance");
                    self.shutdown_flag.store(true, Ordering::Relaxed);
                    break;
                }
            }
        }

        info!("Connection acceptance loop stopped");
        Ok(())
    }

    /// Negotiate as responder, dial the target, then relay
    #[instrument(skip(stream, engine, handshake_deadline), fields(connection_id = connection_id, addr = %addr))]
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        engine: Arc<RelayEngine>,
        handshake_deadline: Duration,
        connection_id: usize,
    ) -> Result<()> {
        debug!("Processing SOCKS5 connection from {}", addr);

        let handshake = Handshake::responder(stream);
        let negotiated = timeout(
            handshake_deadline,
            handshake.accept(|target| engine.connect_to_target(target)),
        )
        .await;

        let (client, target, established) = match negotiated {
            Ok(result) => result.context("SOCKS5 handshake failed")?,
            Err(_) => bail!("SOCKS5 handshake timed out after {:?}", handshake_deadline),
        };
        info!(
            "Handshake complete: {} -> {} (bound {})",
            addr, established.requested, established.bound
        );

        let target_addr = target.peer_addr().unwrap_or(established.requested.to_socket_addr());
        let session = RelaySession::new(addr, target_addr);
        let stats = engine
            .relay(&session, client, target)
            .await
            .with_context(|| format!("Relay session {} failed", session.session_id))?;
        debug!(
            "Connection {} closed after {}ms, {} bytes relayed",
            connection_id, stats.duration_ms, stats.total_bytes
        );

        Ok(())
    }

    pub fn get_active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn get_resource_stats(&self) -> ResourceUsageStats {
        self.resource_manager.get_stats()
    }

    /// Stop accepting and tell every connection task to close
    pub fn initiate_shutdown(&self) {
        info!("Initiating graceful shutdown of connection manager");
        self.shutdown_flag.store(true, Ordering::Relaxed);

        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal to connection handlers: {}", e);
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Wait up to `shutdown_timeout` for in-flight connections
    pub async fn wait_for_connections_to_close(&self) -> Result<()> {
        let shutdown_timeout = self.config.server.shutdown_timeout;
        let start_time = Instant::now();

        info!(
            "Waiting for {} active connections to close (timeout: {:?})",
            self.get_active_connections(),
            shutdown_timeout
        );

        while self.get_active_connections() > 0 && start_time.elapsed() < shutdown_timeout {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let remaining = self.get_active_connections();
        if remaining == 0 {
            info!("All connections closed gracefully in {:?}", start_time.elapsed());
        } else {
            warn!(
                "Shutdown timeout reached after {:?} with {} connections still active",
                start_time.elapsed(),
                remaining
            );
        }

        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.initiate_shutdown();
        self.wait_for_connections_to_close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_config() -> Arc<Config> {
        let mut config = Config::default();
        config.server.bind_addr = "127.0.0.1:0".parse().unwrap();
        config.server.shutdown_timeout = Duration::from_secs(1);
        Arc::new(config)
    }

    #[tokio::test]
    async fn test_bind_reports_ephemeral_port() {
        let manager = ConnectionManager::bind(loopback_config()).await.unwrap();
        let addr = manager.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(manager.get_active_connections(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_accept_loop() {
        let manager = Arc::new(ConnectionManager::bind(loopback_config()).await.unwrap());
        let runner = Arc::clone(&manager);
        let handle = tokio::spawn(async move { runner.run().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.shutdown().await.unwrap();

        let result = timeout(Duration::from_secs(1), handle).await;
        assert!(result.is_ok());
        assert!(manager.is_shutting_down());
    }

    #[tokio::test]
    async fn test_shutdown_before_run_returns_immediately() {
        let manager = ConnectionManager::bind(loopback_config()).await.unwrap();
        manager.initiate_shutdown();
        let result = timeout(Duration::from_secs(1), manager.run()).await;
        assert!(matches!(result, Ok(Ok(()))));
    }
}
