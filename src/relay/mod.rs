//! Data Relay Module
//!
//! Moves bytes between client and target once the handshake is done.

pub mod engine;
pub mod session;

pub use engine::RelayEngine;
pub use session::{ConnectionStats, RelaySession};
