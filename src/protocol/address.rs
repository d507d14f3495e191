//! Address encoding between textual host/port pairs and the wire form.

use std::net::Ipv4Addr;

use crate::error::{Result, Socks5Error};
use crate::protocol::constants::{IPV4_ADDR_LEN, PORT_LEN};
use crate::protocol::types::{AddressType, Endpoint};

/// Encode a dotted-quad host and port as 4 address octets followed by a big-endian port.
pub fn encode_ipv4(host: &str, port: u16) -> Result<[u8; IPV4_ADDR_LEN + PORT_LEN]> {
    let ip: Ipv4Addr = host
        .parse()
        .map_err(|_| Socks5Error::InvalidAddress(host.to_string()))?;
    Ok(encode_endpoint(&Endpoint::new(ip, port)))
}

/// Inverse of [`encode_ipv4`]. Input must be exactly 6 bytes.
pub fn decode_ipv4(bytes: &[u8]) -> Result<(String, u16)> {
    let endpoint = decode_endpoint(AddressType::Ipv4.type_code(), bytes)?;
    Ok((endpoint.ip.to_string(), endpoint.port))
}

pub fn encode_endpoint(endpoint: &Endpoint) -> [u8; IPV4_ADDR_LEN + PORT_LEN] {
    let mut out = [0u8; IPV4_ADDR_LEN + PORT_LEN];
    out[..IPV4_ADDR_LEN].copy_from_slice(&endpoint.host_bytes());
    out[IPV4_ADDR_LEN..].copy_from_slice(&endpoint.port.to_be_bytes());
    out
}

/// Decode DST.ADDR/BND.ADDR plus port for the given ATYP code.
pub fn decode_endpoint(address_type: u8, bytes: &[u8]) -> Result<Endpoint> {
    let address_type = AddressType::try_from(address_type)?;
    if bytes.len() != address_type.wire_len() {
        return Err(Socks5Error::malformed(format!(
            "IPv4 address must be {} bytes, got {}",
            address_type.wire_len(),
            bytes.len()
        )));
    }

    let mut octets = [0u8; IPV4_ADDR_LEN];
    octets.copy_from_slice(&bytes[..IPV4_ADDR_LEN]);
    let port = u16::from_be_bytes([bytes[IPV4_ADDR_LEN], bytes[IPV4_ADDR_LEN + 1]]);

    Ok(Endpoint::new(Ipv4Addr::from(octets), port))
}
