//! Tagged network endpoint.
//!
//! A [`NetIp`] carries an address family, a port and up to 16 raw address
//! bytes. It travels inside the handshake payload using a fixed 20-byte
//! big-endian layout:
//!
//! ```text
//! [Type(2)] [Port(2)] [Address(16)]
//! ```
//!
//! IPv4 addresses occupy the first four address bytes, the rest is zero.

use bytes::{Buf, BufMut};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};

use crate::error::{constants, ProtocolError, Result};

/// Serialized size of a netip on the wire
pub const NETIP_SERIALIZED_SIZE: usize = 20;

/// Address family of a [`NetIp`]. Discriminants are the wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u16)]
pub enum NetIpKind {
    #[default]
    None = 0,
    V4 = 4,
    V6 = 16,
}

impl NetIpKind {
    /// Number of meaningful address bytes for this family
    pub fn address_len(self) -> usize {
        self as usize
    }
}

impl TryFrom<u16> for NetIpKind {
    type Error = ProtocolError;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            0 => Ok(NetIpKind::None),
            4 => Ok(NetIpKind::V4),
            16 => Ok(NetIpKind::V6),
            other => Err(ProtocolError::InvalidNetIp(other)),
        }
    }
}

/// Network endpoint: family, port and raw address bytes
///
/// Address bytes past the family length are always zero, so derived equality
/// compares only the meaningful bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NetIp {
    kind: NetIpKind,
    port: u16,
    ip: [u8; 16],
}

impl NetIp {
    pub const NONE: NetIp = NetIp {
        kind: NetIpKind::None,
        port: 0,
        ip: [0u8; 16],
    };

    pub fn v4(octets: [u8; 4], port: u16) -> Self {
        let mut ip = [0u8; 16];
        ip[..4].copy_from_slice(&octets);
        Self {
            kind: NetIpKind::V4,
            port,
            ip,
        }
    }

    pub fn v6(octets: [u8; 16], port: u16) -> Self {
        Self {
            kind: NetIpKind::V6,
            port,
            ip: octets,
        }
    }

    pub fn kind(&self) -> NetIpKind {
        self.kind
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn set_port(&mut self, port: u16) {
        self.port = port;
    }

    /// Meaningful address bytes (4 for IPv4, 16 for IPv6, none otherwise)
    pub fn address_bytes(&self) -> &[u8] {
        &self.ip[..self.kind.address_len()]
    }

    pub fn is_none(&self) -> bool {
        self.kind == NetIpKind::None
    }

    /// True when the address is the wildcard (`0.0.0.0` / `::`) or absent
    pub fn is_unspecified(&self) -> bool {
        self.to_socket_addr()
            .map(|addr| addr.ip().is_unspecified())
            .unwrap_or(true)
    }

    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        match self.kind {
            NetIpKind::None => None,
            NetIpKind::V4 => {
                let octets = [self.ip[0], self.ip[1], self.ip[2], self.ip[3]];
                Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), self.port))
            }
            NetIpKind::V6 => Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(self.ip)), self.port)),
        }
    }

    /// Write the 20-byte wire form
    pub fn write_to<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16(self.kind as u16);
        buf.put_u16(self.port);
        buf.put_slice(&self.ip);
    }

    /// Read the 20-byte wire form
    ///
    /// # Errors
    /// `HandshakeError` if fewer than 20 bytes remain, `InvalidNetIp` for an
    /// unknown family.
    pub fn read_from<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < NETIP_SERIALIZED_SIZE {
            return Err(ProtocolError::HandshakeError(
                constants::ERR_HANDSHAKE_SIZE.into(),
            ));
        }
        let kind = NetIpKind::try_from(buf.get_u16())?;
        let port = buf.get_u16();
        let mut ip = [0u8; 16];
        buf.copy_to_slice(&mut ip);
        // Bytes past the family length are not significant
        ip[kind.address_len()..].fill(0);
        Ok(Self { kind, port, ip })
    }

    /// Resolve `host:port`, preferring an IPv4 result.
    pub fn resolve(host: &str, port: u16) -> Result<Self> {
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| ProtocolError::AddressResolution(format!("{host}:{port}: {e}")))?
            .collect();

        addrs
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| addrs.first())
            .map(|addr| NetIp::from(*addr))
            .ok_or_else(|| {
                ProtocolError::AddressResolution(format!(
                    "{host}:{port}: {}",
                    constants::ERR_UNRESOLVED
                ))
            })
    }
}

impl From<SocketAddr> for NetIp {
    fn from(addr: SocketAddr) -> Self {
        match addr.ip() {
            IpAddr::V4(ip) => NetIp::v4(ip.octets(), addr.port()),
            IpAddr::V6(ip) => NetIp::v6(ip.octets(), addr.port()),
        }
    }
}

impl fmt::Display for NetIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            NetIpKind::None => write!(f, "<none>"),
            NetIpKind::V4 => write!(
                f,
                "{}.{}.{}.{}:{}",
                self.ip[0], self.ip[1], self.ip[2], self.ip[3], self.port
            ),
            NetIpKind::V6 => {
                write!(f, "[")?;
                for (i, pair) in self.ip.chunks(2).enumerate() {
                    if i > 0 {
                        write!(f, ":")?;
                    }
                    write!(f, "{:04x}", u16::from_be_bytes([pair[0], pair[1]]))?;
                }
                write!(f, "]:{}", self.port)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_layout_is_big_endian() {
        let ip = NetIp::v4([10, 0, 22, 76], 3823);
        let mut buf = Vec::new();
        ip.write_to(&mut buf);

        assert_eq!(buf.len(), NETIP_SERIALIZED_SIZE);
        assert_eq!(&buf[0..2], &[0x00, 0x04]);
        assert_eq!(&buf[2..4], &3823u16.to_be_bytes());
        assert_eq!(&buf[4..8], &[10, 0, 22, 76]);
        assert!(buf[8..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_read_back() {
        let ip = NetIp::v6([0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1], 443);
        let mut buf = Vec::new();
        ip.write_to(&mut buf);
        let decoded = NetIp::read_from(&mut buf.as_slice()).expect("valid netip");
        assert_eq!(decoded, ip);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let mut raw = [0u8; NETIP_SERIALIZED_SIZE];
        raw[1] = 7;
        assert!(matches!(
            NetIp::read_from(&mut &raw[..]),
            Err(ProtocolError::InvalidNetIp(7))
        ));
    }

    #[test]
    fn test_short_buffer_rejected() {
        let raw = [0u8; 10];
        assert!(NetIp::read_from(&mut &raw[..]).is_err());
    }

    #[test]
    fn test_display_formats() {
        assert_eq!(NetIp::v4([127, 0, 0, 1], 80).to_string(), "127.0.0.1:80");
        let v6 = NetIp::v6([0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1], 443);
        assert_eq!(v6.to_string(), "[0000:0000:0000:0000:0000:0000:0000:0001]:443");
        assert_eq!(NetIp::NONE.to_string(), "<none>");
    }

    #[test]
    fn test_socket_addr_conversion() {
        let addr: SocketAddr = "192.168.1.20:9000".parse().expect("addr");
        let ip = NetIp::from(addr);
        assert_eq!(ip.kind(), NetIpKind::V4);
        assert_eq!(ip.to_socket_addr(), Some(addr));
        assert!(NetIp::NONE.to_socket_addr().is_none());
    }

    #[test]
    fn test_unspecified() {
        assert!(NetIp::v4([0, 0, 0, 0], 5000).is_unspecified());
        assert!(NetIp::NONE.is_unspecified());
        assert!(!NetIp::v4([127, 0, 0, 1], 5000).is_unspecified());
    }

    #[test]
    fn test_resolve_localhost_prefers_ipv4() {
        let ip = NetIp::resolve("127.0.0.1", 4000).expect("resolves");
        assert_eq!(ip, NetIp::v4([127, 0, 0, 1], 4000));
    }
}
