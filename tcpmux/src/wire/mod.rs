//! Low-level segment access and construction.
//!
//! The `wire` module deals with the TCP segment format and the pieces of the internet layer the
//! segment depends on: addresses, the protocol number and the pseudo header checksum. Like the
//! rest of the crate it does not own any socket state.
//!
//! The [`Packet`] wrapper gives field access to a borrowed buffer. [`Repr`] is the parsed, high
//! level header. [`Segment`] owns a buffer together with its header and applies the checksum
//! trust model of the inbound path.
//!
//! [`Packet`]: tcp/struct.Packet.html
//! [`Repr`]: tcp/struct.Repr.html
//! [`Segment`]: segment/struct.Segment.html
mod field {
    pub(crate) type Field = ::core::ops::Range<usize>;
}

mod error;
pub mod ip;
pub mod segment;
pub mod tcp;

pub use self::error::{Error, Result};

pub use self::ip::{
    Address as IpAddress,
    Ipv4Address,
    Ipv6Address,
    Protocol as IpProtocol};

pub use self::tcp::{
    Checksum as TcpChecksum,
    Flags as TcpFlags,
    Packet as TcpPacket,
    Repr as TcpRepr,
    SeqNumber as TcpSeqNumber,
    TcpOption};

pub use self::segment::{CrcMode, Segment};
