//! Resource Management
//!
//! Caps the number of connections the proxy serves at once.

use crate::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Hands out one slot per accepted connection, up to `max_connections`
pub struct ResourceManager {
    max_connections: usize,
    connection_semaphore: Arc<Semaphore>,
    peak_connections: AtomicUsize,
    total_connections_created: AtomicUsize,
    total_connections_rejected: AtomicUsize,
}

/// Snapshot of connection usage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceUsageStats {
    pub active_connections: usize,
    pub peak_connections: usize,
    pub total_connections_created: usize,
    pub total_connections_rejected: usize,
    pub max_connections: usize,
}

impl ResourceManager {
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            connection_semaphore: Arc::new(Semaphore::new(max_connections)),
            peak_connections: AtomicUsize::new(0),
            total_connections_created: AtomicUsize::new(0),
            total_connections_rejected: AtomicUsize::new(0),
        }
    }

    /// Try to acquire a connection slot without waiting
    pub fn acquire_connection_slot(&self) -> Result<ConnectionSlot> {
        match Arc::clone(&self.connection_semaphore).try_acquire_owned() {
            Ok(permit) => {
                self.total_connections_created.fetch_add(1, Ordering::Relaxed);

                let active = self.active_connections();
                self.peak_connections.fetch_max(active, Ordering::Relaxed);

                debug!("Acquired connection slot, active connections: {}", active);
                Ok(ConnectionSlot { _permit: permit })
            }
            Err(_) => {
                self.total_connections_rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Connection limit reached ({}), rejecting connection",
                    self.max_connections
                );
                Err(anyhow::anyhow!("Connection limit reached"))
            }
        }
    }

    pub fn active_connections(&self) -> usize {
        self.max_connections - self.connection_semaphore.available_permits()
    }

    pub fn get_stats(&self) -> ResourceUsageStats {
        ResourceUsageStats {
            active_connections: self.active_connections(),
            peak_connections: self.peak_connections.load(Ordering::Relaxed),
            total_connections_created: self.total_connections_created.load(Ordering::Relaxed),
            total_connections_rejected: self.total_connections_rejected.load(Ordering::Relaxed),
            max_connections: self.max_connections,
        }
    }
}

/// Connection slot that releases itself when dropped
pub struct ConnectionSlot {
    _permit: OwnedSemaphorePermit,
}
