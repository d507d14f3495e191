//! SOCKS5 Protocol Implementation
//!
//! Wire codecs and the handshake state machine shared by client and proxy.

pub mod address;
pub mod codec;
pub mod constants;
pub mod handshake;
pub mod types;

pub use constants::*;
pub use handshake::{Established, Handshake, Phase, Role, Session};
pub use types::*;
