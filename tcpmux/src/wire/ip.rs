//! Internetworking addresses and the shared checksum arithmetic.
//!
//! The bridge never routes, it only needs addresses to tag segments and to compute the TCP
//! pseudo header. Both families are supported since the engine contract is family agnostic.
use core::fmt;
use std::net;

use super::{Error, Result};

enum_with_unknown! {
    /// IP datagram encapsulated protocol.
    pub doc enum Protocol(u8) {
        /// Internet control message protocol.
        Icmp      = 0x01,
        /// Transmission control protocol.
        Tcp       = 0x06,
        /// User datagram protocol.
        Udp       = 0x11,
        /// Internet control message protocol for IPv6.
        Icmpv6    = 0x3a,
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Protocol::Icmp        => write!(f, "ICMP"),
            Protocol::Tcp         => write!(f, "TCP"),
            Protocol::Udp         => write!(f, "UDP"),
            Protocol::Icmpv6      => write!(f, "ICMPv6"),
            Protocol::Unknown(id) => write!(f, "0x{:02x}", id)
        }
    }
}

/// A four-octet IPv4 address.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct Ipv4Address(pub [u8; 4]);

/// A sixteen-octet IPv6 address.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct Ipv6Address(pub [u8; 16]);

/// An internetworking address.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum Address {
    /// An unspecified address.
    ///
    /// Used as a placeholder while the engine has not resolved the address yet.
    Unspecified,

    /// An IPv4 address.
    Ipv4(Ipv4Address),

    /// An IPv6 address.
    Ipv6(Ipv6Address),
}

impl Ipv4Address {
    /// An unspecified address.
    pub const UNSPECIFIED: Ipv4Address = Ipv4Address([0x00; 4]);

    /// Construct an IPv4 address from parts.
    pub const fn new(a0: u8, a1: u8, a2: u8, a3: u8) -> Ipv4Address {
        Ipv4Address([a0, a1, a2, a3])
    }

    /// Return an IPv4 address as a sequence of octets, in big-endian.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Ipv6Address {
    /// An unspecified address.
    pub const UNSPECIFIED: Ipv6Address = Ipv6Address([0x00; 16]);

    /// Return an IPv6 address as a sequence of octets, in big-endian.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Address {
    /// Create an address wrapping an IPv4 address with the given octets.
    pub const fn v4(a0: u8, a1: u8, a2: u8, a3: u8) -> Address {
        Address::Ipv4(Ipv4Address::new(a0, a1, a2, a3))
    }

    /// Return an address as a sequence of octets, in big-endian.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Address::Unspecified     => &[],
            Address::Ipv4(addr)      => addr.as_bytes(),
            Address::Ipv6(addr)      => addr.as_bytes(),
        }
    }

    /// Query whether the address is unspecified.
    ///
    /// The all-zero address of either family counts as unspecified as well.
    pub fn is_unspecified(&self) -> bool {
        match self {
            Address::Unspecified => true,
            Address::Ipv4(addr) => *addr == Ipv4Address::UNSPECIFIED,
            Address::Ipv6(addr) => *addr == Ipv6Address::UNSPECIFIED,
        }
    }
}

impl Default for Address {
    fn default() -> Self {
        Address::Unspecified
    }
}

impl From<Ipv4Address> for Address {
    fn from(addr: Ipv4Address) -> Self {
        Address::Ipv4(addr)
    }
}

impl From<Ipv6Address> for Address {
    fn from(addr: Ipv6Address) -> Self {
        Address::Ipv6(addr)
    }
}

impl From<net::Ipv4Addr> for Address {
    fn from(addr: net::Ipv4Addr) -> Self {
        Address::Ipv4(Ipv4Address(addr.octets()))
    }
}

impl From<net::Ipv6Addr> for Address {
    fn from(addr: net::Ipv6Addr) -> Self {
        Address::Ipv6(Ipv6Address(addr.octets()))
    }
}

impl From<net::IpAddr> for Address {
    fn from(addr: net::IpAddr) -> Self {
        match addr {
            net::IpAddr::V4(addr) => addr.into(),
            net::IpAddr::V6(addr) => addr.into(),
        }
    }
}

impl fmt::Display for Ipv4Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        net::Ipv4Addr::from(self.0).fmt(f)
    }
}

impl fmt::Display for Ipv6Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        net::Ipv6Addr::from(self.0).fmt(f)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Address::Unspecified => write!(f, "*"),
            Address::Ipv4(addr) => addr.fmt(f),
            Address::Ipv6(addr) => addr.fmt(f),
        }
    }
}

pub(crate) mod checksum {
    use byteorder::{ByteOrder, NetworkEndian};

    use super::*;

    fn propagate_carries(word: u32) -> u16 {
        let sum = (word >> 16) + (word & 0xffff);
        ((sum >> 16) as u16) + (sum as u16)
    }

    /// Compute an RFC 1071 compliant checksum (without the final complement).
    pub(crate) fn data(mut data: &[u8]) -> u16 {
        let mut accum = 0;

        // For each 32-byte chunk...
        const CHUNK_SIZE: usize = 32;
        while data.len() >= CHUNK_SIZE {
            let mut d = &data[..CHUNK_SIZE];
            // ... take by 2 bytes and sum them.
            while d.len() >= 2 {
                accum += NetworkEndian::read_u16(d) as u32;
                d = &d[2..];
            }

            data = &data[CHUNK_SIZE..];
        }

        // Sum the rest that does not fit the last 32-byte chunk,
        // taking by 2 bytes.
        while data.len() >= 2 {
            accum += NetworkEndian::read_u16(data) as u32;
            data = &data[2..];
        }

        // Add the last remaining odd byte, if any.
        if let Some(&value) = data.first() {
            accum += (value as u32) << 8;
        }

        propagate_carries(accum)
    }

    /// Combine several RFC 1071 compliant checksums.
    pub(crate) fn combine(checksums: &[u16]) -> u16 {
        let mut accum: u32 = 0;
        for &word in checksums {
            accum += word as u32;
        }
        propagate_carries(accum)
    }

    /// Compute an IP pseudo header checksum.
    ///
    /// Fails with `Unsupported` unless both addresses are of the same, specified family.
    pub(crate) fn pseudo_header(src_addr: &Address, dst_addr: &Address,
                         protocol: Protocol, length: u32) -> Result<u16> {
        match (src_addr, dst_addr) {
            (Address::Ipv4(src_addr), Address::Ipv4(dst_addr)) => {
                let mut proto_len = [0u8; 4];
                proto_len[1] = protocol.into();
                NetworkEndian::write_u16(&mut proto_len[2..4], length as u16);

                Ok(combine(&[
                    data(src_addr.as_bytes()),
                    data(dst_addr.as_bytes()),
                    data(&proto_len[..])
                ]))
            },

            (Address::Ipv6(src_addr), Address::Ipv6(dst_addr)) => {
                let mut proto_len = [0u8; 8];
                proto_len[7] = protocol.into();
                NetworkEndian::write_u32(&mut proto_len[0..4], length);
                Ok(combine(&[
                    data(src_addr.as_bytes()),
                    data(dst_addr.as_bytes()),
                    data(&proto_len[..])
                ]))
            }

            _ => Err(Error::Unsupported),
        }
    }
}
