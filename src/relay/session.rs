//! Relay Session

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info};
use uuid::Uuid;

/// Byte counters and identity of one relayed connection
#[derive(Debug)]
pub struct RelaySession {
    pub session_id: Uuid,
    pub client_addr: SocketAddr,
    pub target_addr: SocketAddr,
    pub start_time: Instant,
    bytes_up: AtomicU64,
    bytes_down: AtomicU64,
    /// Milliseconds after `start_time` at which bytes last moved
    last_activity_ms: AtomicU64,
}

/// Snapshot of a session, taken when it ends
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub session_id: Uuid,
    pub client_addr: SocketAddr,
    pub target_addr: SocketAddr,
    pub start_time: SystemTime,
    pub duration_ms: u64,
    pub bytes_up: u64,
    pub bytes_down: u64,
    pub total_bytes: u64,
}

impl RelaySession {
    pub fn new(client_addr: SocketAddr, target_addr: SocketAddr) -> Self {
        let session_id = Uuid::new_v4();
        debug!(
            "Creating relay session {} ({} -> {})",
            session_id, client_addr, target_addr
        );

        Self {
            session_id,
            client_addr,
            target_addr,
            start_time: Instant::now(),
            bytes_up: AtomicU64::new(0),
            bytes_down: AtomicU64::new(0),
            last_activity_ms: AtomicU64::new(0),
        }
    }

    /// Bytes forwarded client -> target
    pub fn bytes_up(&self) -> u64 {
        self.bytes_up.load(Ordering::Relaxed)
    }

    /// Bytes delivered target -> client, counted after the transform
    pub fn bytes_down(&self) -> u64 {
        self.bytes_down.load(Ordering::Relaxed)
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes_up() + self.bytes_down()
    }

    pub fn duration(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Time since bytes last moved in either direction
    pub fn idle_time(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed));
        self.duration().saturating_sub(last)
    }

    pub fn add_bytes_up(&self, bytes: u64) {
        self.bytes_up.fetch_add(bytes, Ordering::Relaxed);
        self.touch();
    }

    pub fn add_bytes_down(&self, bytes: u64) {
        self.bytes_down.fetch_add(bytes, Ordering::Relaxed);
        self.touch();
    }

    fn touch(&self) {
        let now_ms = self.duration().as_millis() as u64;
        self.last_activity_ms.fetch_max(now_ms, Ordering::Relaxed);
    }

    pub fn to_stats(&self) -> ConnectionStats {
        let duration = self.duration();

        ConnectionStats {
            session_id: self.session_id,
            client_addr: self.client_addr,
            target_addr: self.target_addr,
            start_time: SystemTime::now() - duration,
            duration_ms: duration.as_millis() as u64,
            bytes_up: self.bytes_up(),
            bytes_down: self.bytes_down(),
            total_bytes: self.total_bytes(),
        }
    }

    pub fn log_stats(&self) {
        info!(
            session_id = %self.session_id,
            client_addr = %self.client_addr,
            target_addr = %self.target_addr,
            duration_ms = self.duration().as_millis() as u64,
            bytes_up = self.bytes_up(),
            bytes_down = self.bytes_down(),
            total_bytes = self.total_bytes(),
            "Relay session completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let session = RelaySession::new(
            "127.0.0.1:5000".parse().unwrap(),
            "127.0.0.1:8888".parse().unwrap(),
        );
        session.add_bytes_up(5);
        session.add_bytes_up(7);
        session.add_bytes_down(19);

        let stats = session.to_stats();
        assert_eq!(stats.session_id, session.session_id);
        assert_eq!(stats.bytes_up, 12);
        assert_eq!(stats.bytes_down, 19);
        assert_eq!(stats.total_bytes, 31);
    }

    #[test]
    fn test_activity_resets_idle_time() {
        let session = RelaySession::new(
            "127.0.0.1:5000".parse().unwrap(),
            "127.0.0.1:8888".parse().unwrap(),
        );
        std::thread::sleep(Duration::from_millis(30));
        assert!(session.idle_time() >= Duration::from_millis(30));

        session.add_bytes_down(1);
        assert!(session.idle_time() < Duration::from_millis(30));
    }

    #[test]
    fn test_session_ids_are_unique() {
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let a = RelaySession::new(addr, addr);
        let b = RelaySession::new(addr, addr);
        assert_ne!(a.session_id, b.session_id);
    }
}
