//! Fixed-layout encoding and decoding of the four handshake messages.
//!
//! Every decoder checks, in order: that there is a version octet to read, the
//! version itself, the structural length, then the individual fields. The
//! first violated constraint decides the error, so identical malformed input
//! always fails the same way.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::warn;

use crate::error::{Result, Socks5Error};
use crate::protocol::address::{decode_endpoint, encode_endpoint};
use crate::protocol::constants::*;
use crate::protocol::types::*;

pub fn encode_greeting(methods: &[AuthMethod]) -> Result<Bytes> {
    if methods.len() > MAX_METHODS {
        return Err(Socks5Error::malformed(format!(
            "greeting can carry at most {} methods, got {}",
            MAX_METHODS,
            methods.len()
        )));
    }

    let mut buf = BytesMut::with_capacity(GREETING_HEADER_LEN + methods.len());
    buf.put_u8(SOCKS5_VERSION);
    buf.put_u8(methods.len() as u8);
    for method in methods {
        buf.put_u8(method.method_code());
    }
    Ok(buf.freeze())
}

pub fn decode_greeting(bytes: &[u8]) -> Result<GreetingMsg> {
    let version = check_version(bytes, MessageKind::Greeting)?;
    if bytes.len() < GREETING_HEADER_LEN {
        return Err(Socks5Error::malformed(format!(
            "greeting too short: {} bytes",
            bytes.len()
        )));
    }

    let n_methods = bytes[1] as usize;
    let methods = &bytes[GREETING_HEADER_LEN..];
    if methods.len() != n_methods {
        return Err(Socks5Error::malformed(format!(
            "greeting declares {} methods but carries {}",
            n_methods,
            methods.len()
        )));
    }

    Ok(GreetingMsg {
        version,
        methods: methods.iter().copied().map(AuthMethod::from_code).collect(),
    })
}

pub fn encode_method_selection(method: AuthMethod) -> Bytes {
    Bytes::copy_from_slice(&[SOCKS5_VERSION, method.method_code()])
}

pub fn decode_method_selection(bytes: &[u8]) -> Result<SelectionMsg> {
    let version = check_version(bytes, MessageKind::Selection)?;
    if bytes.len() != SELECTION_LEN {
        return Err(Socks5Error::malformed(format!(
            "method selection must be {} bytes, got {}",
            SELECTION_LEN,
            bytes.len()
        )));
    }

    Ok(SelectionMsg {
        version,
        method: AuthMethod::from_code(bytes[1]),
    })
}

pub fn encode_request(command: Command, endpoint: &Endpoint) -> Bytes {
    encode_addressed(command.command_code(), endpoint)
}

pub fn decode_request(bytes: &[u8]) -> Result<RequestMsg> {
    let version = check_version(bytes, MessageKind::Request)?;
    check_header_len(bytes, MessageKind::Request)?;

    let command = Command::try_from(bytes[1])?;
    check_reserved(bytes[2], MessageKind::Request);
    let endpoint = decode_endpoint(bytes[3], &bytes[REQUEST_HEADER_LEN..])?;

    Ok(RequestMsg {
        version,
        command,
        address_type: endpoint.address_type(),
        endpoint,
    })
}

pub fn encode_reply(reply: ReplyCode, endpoint: &Endpoint) -> Bytes {
    encode_addressed(reply.reply_code(), endpoint)
}

pub fn decode_reply(bytes: &[u8]) -> Result<ReplyMsg> {
    let version = check_version(bytes, MessageKind::Reply)?;
    check_header_len(bytes, MessageKind::Reply)?;

    let reply = ReplyCode::from_code(bytes[1]);
    check_reserved(bytes[2], MessageKind::Reply);
    // a failure reply may carry any address family; its code is what matters
    if reply != ReplyCode::Succeeded && AddressType::try_from(bytes[3]).is_err() {
        return Err(Socks5Error::ConnectRejected(reply));
    }
    let endpoint = decode_endpoint(bytes[3], &bytes[REQUEST_HEADER_LEN..])?;

    Ok(ReplyMsg {
        version,
        reply,
        endpoint,
    })
}

pub fn encode(message: &Message) -> Result<Bytes> {
    Ok(match message {
        Message::Greeting(m) => encode_greeting(&m.methods)?,
        Message::Selection(m) => encode_method_selection(m.method),
        Message::Request(m) => encode_request(m.command, &m.endpoint),
        Message::Reply(m) => encode_reply(m.reply, &m.endpoint),
    })
}

pub fn decode(kind: MessageKind, bytes: &[u8]) -> Result<Message> {
    Ok(match kind {
        MessageKind::Greeting => Message::Greeting(decode_greeting(bytes)?),
        MessageKind::Selection => Message::Selection(decode_method_selection(bytes)?),
        MessageKind::Request => Message::Request(decode_request(bytes)?),
        MessageKind::Reply => Message::Reply(decode_reply(bytes)?),
    })
}

/// Number of leading bytes that determine a message's total length.
pub fn header_len(kind: MessageKind) -> usize {
    match kind {
        MessageKind::Greeting => GREETING_HEADER_LEN,
        MessageKind::Selection => SELECTION_LEN,
        MessageKind::Request | MessageKind::Reply => REQUEST_HEADER_LEN,
    }
}

/// Total length of a message given its header, validating what the header carries.
///
/// Lets a stream reader stop at the first bad field instead of waiting for
/// bytes that may never come.
pub fn frame_len(kind: MessageKind, header: &[u8]) -> Result<usize> {
    check_version(header, kind)?;
    check_header_len(header, kind)?;

    match kind {
        MessageKind::Greeting => Ok(GREETING_HEADER_LEN + header[1] as usize),
        MessageKind::Selection => Ok(SELECTION_LEN),
        MessageKind::Request => {
            Command::try_from(header[1])?;
            let address_type = AddressType::try_from(header[3])?;
            Ok(REQUEST_HEADER_LEN + address_type.wire_len())
        }
        MessageKind::Reply => {
            let address_type = match AddressType::try_from(header[3]) {
                Ok(address_type) => address_type,
                // the bound address of a failure reply is never read
                Err(_) if header[1] != SOCKS5_REPLY_SUCCESS => {
                    return Err(Socks5Error::ConnectRejected(ReplyCode::from_code(header[1])));
                }
                Err(e) => return Err(e),
            };
            Ok(REQUEST_HEADER_LEN + address_type.wire_len())
        }
    }
}

fn encode_addressed(code: u8, endpoint: &Endpoint) -> Bytes {
    let address = encode_endpoint(endpoint);
    let mut buf = BytesMut::with_capacity(REQUEST_HEADER_LEN + address.len());
    buf.put_u8(SOCKS5_VERSION);
    buf.put_u8(code);
    buf.put_u8(SOCKS5_RESERVED);
    buf.put_u8(endpoint.address_type().type_code());
    buf.put_slice(&address);
    buf.freeze()
}

fn check_version(bytes: &[u8], kind: MessageKind) -> Result<u8> {
    match bytes.first() {
        None => Err(Socks5Error::malformed(format!("empty {}", kind))),
        Some(&SOCKS5_VERSION) => Ok(SOCKS5_VERSION),
        Some(&other) => Err(Socks5Error::UnsupportedVersion(other)),
    }
}

fn check_header_len(bytes: &[u8], kind: MessageKind) -> Result<()> {
    if bytes.len() < header_len(kind) {
        return Err(Socks5Error::malformed(format!(
            "{} header too short: {} bytes",
            kind,
            bytes.len()
        )));
    }
    Ok(())
}

fn check_reserved(reserved: u8, kind: MessageKind) {
    if reserved != SOCKS5_RESERVED {
        warn!("Non-zero reserved field {:#04x} in {}, ignoring", reserved, kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn localhost(port: u16) -> Endpoint {
        Endpoint::new(Ipv4Addr::LOCALHOST, port)
    }

    #[test]
    fn test_greeting_layout() {
        let bytes = encode_greeting(&[AuthMethod::NoAuth]).unwrap();
        assert_eq!(&bytes[..], &[0x05, 0x01, 0x00]);

        let bytes = encode_greeting(&[AuthMethod::NoAuth, AuthMethod::UserPass]).unwrap();
        assert_eq!(&bytes[..], &[0x05, 0x02, 0x00, 0x02]);

        let greeting = decode_greeting(&[0x05, 0x02, 0x00, 0x02]).unwrap();
        assert_eq!(greeting.methods, vec![AuthMethod::NoAuth, AuthMethod::UserPass]);
    }

    #[test]
    fn test_greeting_too_many_methods() {
        let methods = vec![AuthMethod::NoAuth; 256];
        assert!(matches!(
            encode_greeting(&methods),
            Err(Socks5Error::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_greeting_method_count_mismatch() {
        // declared more than present
        assert!(matches!(
            decode_greeting(&[0x05, 0x02, 0x00]),
            Err(Socks5Error::MalformedMessage(_))
        ));
        // declared fewer than present
        assert!(matches!(
            decode_greeting(&[0x05, 0x01, 0x00, 0x02]),
            Err(Socks5Error::MalformedMessage(_))
        ));
        assert!(matches!(
            decode_greeting(&[0x05]),
            Err(Socks5Error::MalformedMessage(_))
        ));
        assert!(matches!(
            decode_greeting(&[]),
            Err(Socks5Error::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_empty_method_list_is_well_formed() {
        let greeting = decode_greeting(&[0x05, 0x00]).unwrap();
        assert!(greeting.methods.is_empty());
    }

    #[test]
    fn test_version_checked_before_length() {
        assert!(matches!(
            decode_greeting(&[0x04, 0x09]),
            Err(Socks5Error::UnsupportedVersion(0x04))
        ));
        assert!(matches!(
            decode_method_selection(&[0x04, 0x00, 0x00]),
            Err(Socks5Error::UnsupportedVersion(0x04))
        ));
        assert!(matches!(
            decode_request(&[0x04, 0x02, 0x00, 0x03]),
            Err(Socks5Error::UnsupportedVersion(0x04))
        ));
        assert!(matches!(
            decode_reply(&[0x00]),
            Err(Socks5Error::UnsupportedVersion(0x00))
        ));
    }

    #[test]
    fn test_method_selection() {
        assert_eq!(&encode_method_selection(AuthMethod::NoAuth)[..], &[0x05, 0x00]);
        assert_eq!(&encode_method_selection(AuthMethod::NoAcceptable)[..], &[0x05, 0xFF]);

        let selection = decode_method_selection(&[0x05, 0xFF]).unwrap();
        assert_eq!(selection.method, AuthMethod::NoAcceptable);

        assert!(matches!(
            decode_method_selection(&[0x05]),
            Err(Socks5Error::MalformedMessage(_))
        ));
        assert!(matches!(
            decode_method_selection(&[0x05, 0x00, 0x00]),
            Err(Socks5Error::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_connect_request_layout() {
        let bytes = encode_request(Command::Connect, &localhost(256));
        assert_eq!(
            &bytes[..],
            &[0x05, 0x01, 0x00, 0x01, 0x7F, 0x00, 0x00, 0x01, 0x01, 0x00]
        );

        let request = decode_request(&bytes).unwrap();
        assert_eq!(request.command, Command::Connect);
        assert_eq!(request.address_type, AddressType::Ipv4);
        assert_eq!(request.endpoint, localhost(256));
    }

    #[test]
    fn test_request_field_order() {
        // bad command wins over bad address type
        assert!(matches!(
            decode_request(&[0x05, 0x02, 0x00, 0x04]),
            Err(Socks5Error::CommandNotSupported(0x02))
        ));
        assert!(matches!(
            decode_request(&[0x05, 0x01, 0x00, 0x03, 0x03, b'a', b'b', b'c', 0x00, 0x50]),
            Err(Socks5Error::AddressTypeNotSupported(0x03))
        ));
        assert!(matches!(
            decode_request(&[0x05, 0x01, 0x00]),
            Err(Socks5Error::MalformedMessage(_))
        ));
        assert!(matches!(
            decode_request(&[0x05, 0x01, 0x00, 0x01, 0x7F, 0x00, 0x00, 0x01, 0x01]),
            Err(Socks5Error::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_request_nonzero_reserved_is_tolerated() {
        let request =
            decode_request(&[0x05, 0x01, 0x7A, 0x01, 0x0A, 0x00, 0x00, 0x02, 0x00, 0x50]).unwrap();
        assert_eq!(request.endpoint, Endpoint::new(Ipv4Addr::new(10, 0, 0, 2), 80));
    }

    #[test]
    fn test_reply_nonzero_reserved_is_tolerated() {
        let reply = decode_reply(&[0x05, 0x00, 0xFF, 0x01, 10, 0, 0, 1, 0x9C, 0x40]).unwrap();
        assert_eq!(reply.reply, ReplyCode::Succeeded);
        assert_eq!(reply.endpoint, Endpoint::new(Ipv4Addr::new(10, 0, 0, 1), 40000));
    }

    #[test]
    fn test_failure_reply_with_foreign_address_type() {
        let mut bytes = vec![0x05, 0x04, 0x00, 0x04];
        bytes.extend_from_slice(&[0u8; 18]);
        assert!(matches!(
            decode_reply(&bytes),
            Err(Socks5Error::ConnectRejected(ReplyCode::HostUnreachable))
        ));
        // a success must still bind an IPv4 address
        bytes[1] = 0x00;
        assert!(matches!(
            decode_reply(&bytes),
            Err(Socks5Error::AddressTypeNotSupported(0x04))
        ));
    }

    #[test]
    fn test_reply_layout() {
        let bound = Endpoint::new(Ipv4Addr::new(192, 168, 0, 1), 40000);
        let bytes = encode_reply(ReplyCode::Succeeded, &bound);
        assert_eq!(
            &bytes[..],
            &[0x05, 0x00, 0x00, 0x01, 192, 168, 0, 1, 0x9C, 0x40]
        );

        let reply = decode_reply(&bytes).unwrap();
        assert_eq!(reply.reply, ReplyCode::Succeeded);
        assert_eq!(reply.endpoint, bound);

        let refused = decode_reply(&[0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(refused.reply, ReplyCode::ConnectionRefused);

        let unassigned = decode_reply(&[0x05, 0x42, 0x00, 0x01, 0, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(unassigned.reply, ReplyCode::Unassigned(0x42));
    }

    #[test]
    fn test_frame_len() {
        assert_eq!(frame_len(MessageKind::Greeting, &[0x05, 0x03]).unwrap(), 5);
        assert_eq!(frame_len(MessageKind::Selection, &[0x05, 0x00]).unwrap(), 2);
        assert_eq!(
            frame_len(MessageKind::Request, &[0x05, 0x01, 0x00, 0x01]).unwrap(),
            10
        );
        assert_eq!(
            frame_len(MessageKind::Reply, &[0x05, 0x00, 0x00, 0x01]).unwrap(),
            10
        );
        assert_eq!(
            frame_len(MessageKind::Reply, &[0x05, 0x07, 0x00, 0x01]).unwrap(),
            10
        );
        // failure code wins over an address type it cannot size
        assert!(matches!(
            frame_len(MessageKind::Reply, &[0x05, 0x05, 0x00, 0x04]),
            Err(Socks5Error::ConnectRejected(ReplyCode::ConnectionRefused))
        ));
        assert!(matches!(
            frame_len(MessageKind::Request, &[0x05, 0x03, 0x00, 0x01]),
            Err(Socks5Error::CommandNotSupported(0x03))
        ));
        assert!(matches!(
            frame_len(MessageKind::Reply, &[0x05, 0x00, 0x00, 0x04]),
            Err(Socks5Error::AddressTypeNotSupported(0x04))
        ));
        assert!(matches!(
            frame_len(MessageKind::Greeting, &[0x06, 0x01]),
            Err(Socks5Error::UnsupportedVersion(0x06))
        ));
    }

    #[test]
    fn test_message_dispatch() {
        let message = Message::connect(localhost(8888));
        let bytes = encode(&message).unwrap();
        assert_eq!(decode(MessageKind::Request, &bytes).unwrap(), message);

        let message = Message::selection(AuthMethod::NoAuth);
        let bytes = encode(&message).unwrap();
        assert_eq!(decode(MessageKind::Selection, &bytes).unwrap(), message);
    }
}
