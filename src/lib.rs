//! socksrelay
//!
//! A minimal SOCKS5 (RFC 1928) relay suite: a proxy that negotiates
//! NO AUTHENTICATION + CONNECT over IPv4 and pipes bytes to the target,
//! a client for the initiating side, and a toy target server.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod filter;
pub mod logging;
pub mod protocol;
pub mod relay;
pub mod resource;
pub mod shutdown;
pub mod target;

pub use client::Socks5Client;
pub use config::Config;
pub use connection::ConnectionManager;
pub use error::Socks5Error;
pub use resource::ResourceManager;
pub use shutdown::ShutdownCoordinator;
pub use target::TargetServer;

/// Error type for the service layer; protocol code uses [`error::Result`]
pub type Result<T> = anyhow::Result<T>;
