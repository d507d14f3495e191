//! SOCKS5 Protocol Types

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use crate::error::Socks5Error;
use crate::protocol::constants::*;

/// Authentication methods.
///
/// Only `NoAuth` is ever selected; the other codes are kept so that a peer's
/// offer can be logged and rejected precisely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    NoAuth,
    Gssapi,
    UserPass,
    NoAcceptable,
    Other(u8),
}

/// Methods this implementation is able to negotiate.
pub const SUPPORTED_METHODS: &[AuthMethod] = &[AuthMethod::NoAuth];

impl AuthMethod {
    /// Convert to method code
    pub fn method_code(&self) -> u8 {
        match self {
            AuthMethod::NoAuth => SOCKS5_AUTH_NONE,
            AuthMethod::Gssapi => SOCKS5_AUTH_GSSAPI,
            AuthMethod::UserPass => SOCKS5_AUTH_USERPASS,
            AuthMethod::NoAcceptable => SOCKS5_AUTH_UNSUPPORTED,
            AuthMethod::Other(code) => *code,
        }
    }

    /// Create from method code
    pub fn from_code(code: u8) -> Self {
        match code {
            SOCKS5_AUTH_NONE => AuthMethod::NoAuth,
            SOCKS5_AUTH_GSSAPI => AuthMethod::Gssapi,
            SOCKS5_AUTH_USERPASS => AuthMethod::UserPass,
            SOCKS5_AUTH_UNSUPPORTED => AuthMethod::NoAcceptable,
            other => AuthMethod::Other(other),
        }
    }

    pub fn is_supported(&self) -> bool {
        SUPPORTED_METHODS.contains(self)
    }
}

/// SOCKS5 commands. BIND and UDP ASSOCIATE are rejected on decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
}

impl Command {
    pub fn command_code(&self) -> u8 {
        match self {
            Command::Connect => SOCKS5_CMD_CONNECT,
        }
    }
}

impl TryFrom<u8> for Command {
    type Error = Socks5Error;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            SOCKS5_CMD_CONNECT => Ok(Command::Connect),
            other => Err(Socks5Error::CommandNotSupported(other)),
        }
    }
}

/// Address types. Domain names and IPv6 are rejected on decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    Ipv4,
}

impl AddressType {
    pub fn type_code(&self) -> u8 {
        match self {
            AddressType::Ipv4 => SOCKS5_ADDR_IPV4,
        }
    }

    /// Length of DST.ADDR/BND.ADDR plus the port for this type.
    pub fn wire_len(&self) -> usize {
        match self {
            AddressType::Ipv4 => IPV4_ADDR_LEN + PORT_LEN,
        }
    }
}

impl TryFrom<u8> for AddressType {
    type Error = Socks5Error;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            SOCKS5_ADDR_IPV4 => Ok(AddressType::Ipv4),
            other => Err(Socks5Error::AddressTypeNotSupported(other)),
        }
    }
}

/// REP field of a reply. Models the whole RFC range since a peer may send anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyCode {
    Succeeded,
    GeneralFailure,
    ConnectionNotAllowed,
    NetworkUnreachable,
    HostUnreachable,
    ConnectionRefused,
    TtlExpired,
    CommandNotSupported,
    AddressTypeNotSupported,
    Unassigned(u8),
}

impl ReplyCode {
    pub fn reply_code(&self) -> u8 {
        match self {
            ReplyCode::Succeeded => SOCKS5_REPLY_SUCCESS,
            ReplyCode::GeneralFailure => SOCKS5_REPLY_GENERAL_FAILURE,
            ReplyCode::ConnectionNotAllowed => SOCKS5_REPLY_CONNECTION_NOT_ALLOWED,
            ReplyCode::NetworkUnreachable => SOCKS5_REPLY_NETWORK_UNREACHABLE,
            ReplyCode::HostUnreachable => SOCKS5_REPLY_HOST_UNREACHABLE,
            ReplyCode::ConnectionRefused => SOCKS5_REPLY_CONNECTION_REFUSED,
            ReplyCode::TtlExpired => SOCKS5_REPLY_TTL_EXPIRED,
            ReplyCode::CommandNotSupported => SOCKS5_REPLY_COMMAND_NOT_SUPPORTED,
            ReplyCode::AddressTypeNotSupported => SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED,
            ReplyCode::Unassigned(code) => *code,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            SOCKS5_REPLY_SUCCESS => ReplyCode::Succeeded,
            SOCKS5_REPLY_GENERAL_FAILURE => ReplyCode::GeneralFailure,
            SOCKS5_REPLY_CONNECTION_NOT_ALLOWED => ReplyCode::ConnectionNotAllowed,
            SOCKS5_REPLY_NETWORK_UNREACHABLE => ReplyCode::NetworkUnreachable,
            SOCKS5_REPLY_HOST_UNREACHABLE => ReplyCode::HostUnreachable,
            SOCKS5_REPLY_CONNECTION_REFUSED => ReplyCode::ConnectionRefused,
            SOCKS5_REPLY_TTL_EXPIRED => ReplyCode::TtlExpired,
            SOCKS5_REPLY_COMMAND_NOT_SUPPORTED => ReplyCode::CommandNotSupported,
            SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED => ReplyCode::AddressTypeNotSupported,
            other => ReplyCode::Unassigned(other),
        }
    }

    /// Closest reply code for a failed dial to the target.
    pub fn from_io_error(error: &io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::ConnectionRefused => ReplyCode::ConnectionRefused,
            io::ErrorKind::NetworkUnreachable => ReplyCode::NetworkUnreachable,
            io::ErrorKind::HostUnreachable => ReplyCode::HostUnreachable,
            io::ErrorKind::TimedOut => ReplyCode::TtlExpired,
            _ => ReplyCode::GeneralFailure,
        }
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplyCode::Succeeded => write!(f, "succeeded"),
            ReplyCode::GeneralFailure => write!(f, "general SOCKS server failure"),
            ReplyCode::ConnectionNotAllowed => write!(f, "connection not allowed by ruleset"),
            ReplyCode::NetworkUnreachable => write!(f, "network unreachable"),
            ReplyCode::HostUnreachable => write!(f, "host unreachable"),
            ReplyCode::ConnectionRefused => write!(f, "connection refused"),
            ReplyCode::TtlExpired => write!(f, "TTL expired"),
            ReplyCode::CommandNotSupported => write!(f, "command not supported"),
            ReplyCode::AddressTypeNotSupported => write!(f, "address type not supported"),
            ReplyCode::Unassigned(code) => write!(f, "unassigned reply {:#04x}", code),
        }
    }
}

/// An ATYP-tagged address and port as carried in requests and replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }

    /// `0.0.0.0:0`, used in failure replies.
    pub fn unspecified() -> Self {
        Self::new(Ipv4Addr::UNSPECIFIED, 0)
    }

    pub fn address_type(&self) -> AddressType {
        AddressType::Ipv4
    }

    pub fn host_bytes(&self) -> [u8; IPV4_ADDR_LEN] {
        self.ip.octets()
    }

    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }

    /// Create from a socket address; IPv6 has no wire form here and maps to unspecified.
    pub fn from_socket_addr(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => Self::from(*v4),
            SocketAddr::V6(_) => Self::unspecified(),
        }
    }
}

impl From<SocketAddrV4> for Endpoint {
    fn from(addr: SocketAddrV4) -> Self {
        Self::new(*addr.ip(), addr.port())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// VER | NMETHODS | METHODS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GreetingMsg {
    pub version: u8,
    pub methods: Vec<AuthMethod>,
}

/// VER | METHOD
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionMsg {
    pub version: u8,
    pub method: AuthMethod,
}

/// VER | CMD | RSV | ATYP | DST.ADDR | DST.PORT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestMsg {
    pub version: u8,
    pub command: Command,
    pub address_type: AddressType,
    pub endpoint: Endpoint,
}

/// VER | REP | RSV | ATYP | BND.ADDR | BND.PORT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyMsg {
    pub version: u8,
    pub reply: ReplyCode,
    pub endpoint: Endpoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Greeting,
    Selection,
    Request,
    Reply,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Greeting => "greeting",
            MessageKind::Selection => "method selection",
            MessageKind::Request => "request",
            MessageKind::Reply => "reply",
        };
        f.write_str(name)
    }
}

/// The four handshake messages, decoded once and dispatched by phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Greeting(GreetingMsg),
    Selection(SelectionMsg),
    Request(RequestMsg),
    Reply(ReplyMsg),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Greeting(_) => MessageKind::Greeting,
            Message::Selection(_) => MessageKind::Selection,
            Message::Request(_) => MessageKind::Request,
            Message::Reply(_) => MessageKind::Reply,
        }
    }

    pub fn greeting(methods: &[AuthMethod]) -> Self {
        Message::Greeting(GreetingMsg {
            version: SOCKS5_VERSION,
            methods: methods.to_vec(),
        })
    }

    pub fn selection(method: AuthMethod) -> Self {
        Message::Selection(SelectionMsg {
            version: SOCKS5_VERSION,
            method,
        })
    }

    pub fn connect(endpoint: Endpoint) -> Self {
        Message::Request(RequestMsg {
            version: SOCKS5_VERSION,
            command: Command::Connect,
            address_type: endpoint.address_type(),
            endpoint,
        })
    }

    pub fn reply(reply: ReplyCode, endpoint: Endpoint) -> Self {
        Message::Reply(ReplyMsg {
            version: SOCKS5_VERSION,
            reply,
            endpoint,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_method_codes() {
        for code in 0..=u8::MAX {
            assert_eq!(AuthMethod::from_code(code).method_code(), code);
        }
        assert!(AuthMethod::NoAuth.is_supported());
        assert!(!AuthMethod::UserPass.is_supported());
        assert!(!AuthMethod::NoAcceptable.is_supported());
    }

    #[test]
    fn test_reply_code_full_range() {
        for code in 0..=u8::MAX {
            assert_eq!(ReplyCode::from_code(code).reply_code(), code);
        }
        assert_eq!(ReplyCode::from_code(0x09), ReplyCode::Unassigned(0x09));
    }

    #[test]
    fn test_unsupported_command_and_address_type() {
        assert_eq!(Command::try_from(0x01).unwrap(), Command::Connect);
        assert!(matches!(
            Command::try_from(0x02),
            Err(Socks5Error::CommandNotSupported(0x02))
        ));
        assert!(matches!(
            Command::try_from(0x03),
            Err(Socks5Error::CommandNotSupported(0x03))
        ));
        assert!(matches!(
            AddressType::try_from(0x04),
            Err(Socks5Error::AddressTypeNotSupported(0x04))
        ));
    }

    #[test]
    fn test_dial_error_mapping() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(ReplyCode::from_io_error(&refused), ReplyCode::ConnectionRefused);
        let timed_out = io::Error::from(io::ErrorKind::TimedOut);
        assert_eq!(ReplyCode::from_io_error(&timed_out), ReplyCode::TtlExpired);
        let other = io::Error::new(io::ErrorKind::Other, "boom");
        assert_eq!(ReplyCode::from_io_error(&other), ReplyCode::GeneralFailure);
    }

    #[test]
    fn test_endpoint_from_socket_addr() {
        let v4: SocketAddr = "10.0.0.1:8080".parse().unwrap();
        assert_eq!(
            Endpoint::from_socket_addr(&v4),
            Endpoint::new(Ipv4Addr::new(10, 0, 0, 1), 8080)
        );
        let v6: SocketAddr = "[::1]:8080".parse().unwrap();
        assert_eq!(Endpoint::from_socket_addr(&v6), Endpoint::unspecified());
        assert_eq!(Endpoint::new(Ipv4Addr::LOCALHOST, 256).to_string(), "127.0.0.1:256");
    }
}
