//! SOCKS5 Error Types

use std::io;

use thiserror::Error;

use crate::protocol::types::ReplyCode;

/// Failures produced while negotiating or relaying a SOCKS5 session.
#[derive(Debug, Error)]
pub enum Socks5Error {
    #[error("unsupported SOCKS version: {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("no acceptable authentication method")]
    AuthenticationRejected,

    #[error("command not supported: {0:#04x}")]
    CommandNotSupported(u8),

    #[error("address type not supported: {0:#04x}")]
    AddressTypeNotSupported(u8),

    #[error("connect rejected by proxy: {0}")]
    ConnectRejected(ReplyCode),

    #[error("failed to connect to target: {0}")]
    UpstreamConnectFailure(#[source] io::Error),

    #[error("connection closed by peer")]
    TransportClosed,

    #[error("transport error: {0}")]
    TransportError(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, Socks5Error>;

impl Socks5Error {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Socks5Error::MalformedMessage(msg.into())
    }

    /// The peer refused the negotiation; retrying the same request will not help.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Socks5Error::AuthenticationRejected
                | Socks5Error::CommandNotSupported(_)
                | Socks5Error::AddressTypeNotSupported(_)
                | Socks5Error::ConnectRejected(_)
        )
    }

    /// A local or network failure underneath the protocol.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Socks5Error::TransportClosed
                | Socks5Error::TransportError(_)
                | Socks5Error::UpstreamConnectFailure(_)
        )
    }

    /// Reply a responder owes the client before closing, if any.
    pub fn reply_code(&self) -> Option<ReplyCode> {
        match self {
            Socks5Error::CommandNotSupported(_) => Some(ReplyCode::CommandNotSupported),
            Socks5Error::AddressTypeNotSupported(_) => Some(ReplyCode::AddressTypeNotSupported),
            Socks5Error::UpstreamConnectFailure(e) => Some(ReplyCode::from_io_error(e)),
            _ => None,
        }
    }
}

impl From<io::Error> for Socks5Error {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Socks5Error::TransportClosed
        } else {
            Socks5Error::TransportError(e)
        }
    }
}
