//! Connection Management Module
//!
//! Handles TCP connection acceptance, per-connection tasks and shutdown.

pub mod manager;

pub use manager::ConnectionManager;
