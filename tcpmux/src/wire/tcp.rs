//! The TCP header.
//!
//! Sequence number arithmetic, the control flags, field access to a segment buffer with
//! [`Packet`] and the parsed header with its options in [`Repr`].
//!
//! [`Packet`]: struct.Packet.html
//! [`Repr`]: struct.Repr.html
use core::{cmp, fmt, ops};
use byteorder::{ByteOrder, NetworkEndian};

use super::{Error, IpProtocol, IpAddress, Result};
use super::ip::checksum;

/// A TCP sequence number.
///
/// A sequence number is a monotonically advancing integer modulo 2<sup>32</sup>. Comparison is
/// done pairwise across the wrap, so `SeqNumber(i32::MAX) < SeqNumber(i32::MIN)`.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Hash)]
pub struct SeqNumber(pub i32);

impl SeqNumber {
    /// The signed distance from `other` to `self`.
    pub fn distance(self, other: SeqNumber) -> i32 {
        self.0.wrapping_sub(other.0)
    }
}

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0 as u32)
    }
}

impl ops::Add<usize> for SeqNumber {
    type Output = SeqNumber;

    fn add(self, rhs: usize) -> SeqNumber {
        // Sequence space is modular, truncation is the intended arithmetic.
        SeqNumber(self.0.wrapping_add(rhs as u32 as i32))
    }
}

impl ops::AddAssign<usize> for SeqNumber {
    fn add_assign(&mut self, rhs: usize) {
        *self = *self + rhs;
    }
}

impl cmp::PartialOrd for SeqNumber {
    fn partial_cmp(&self, other: &SeqNumber) -> Option<cmp::Ordering> {
        self.distance(*other).partial_cmp(&0)
    }
}

/// The nine control bits of a TCP header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Flags(pub u16);

/// A read/write wrapper around a Transmission Control Protocol segment buffer.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Packet<T> {
    buffer: T,
}

mod field {
    #![allow(non_snake_case)]

    use crate::wire::field::Field;

    pub(crate) const SRC_PORT: Field = 0..2;
    pub(crate) const DST_PORT: Field = 2..4;
    pub(crate) const SEQ_NUM:  Field = 4..8;
    pub(crate) const ACK_NUM:  Field = 8..12;
    pub(crate) const FLAGS:    Field = 12..14;
    pub(crate) const WIN_SIZE: Field = 14..16;
    pub(crate) const CHECKSUM: Field = 16..18;
    pub(crate) const URGENT:   Field = 18..20;

    pub(crate) fn OPTIONS(length: u8) -> Field {
        URGENT.end..(length as usize)
    }

    pub(crate) const FLG_FIN: u16 = 0x001;
    pub(crate) const FLG_SYN: u16 = 0x002;
    pub(crate) const FLG_RST: u16 = 0x004;
    pub(crate) const FLG_PSH: u16 = 0x008;
    pub(crate) const FLG_ACK: u16 = 0x010;
    pub(crate) const FLG_URG: u16 = 0x020;
    pub(crate) const FLG_ECE: u16 = 0x040;
    pub(crate) const FLG_CWR: u16 = 0x080;
    pub(crate) const FLG_NS:  u16 = 0x100;
    pub(crate) const FLG_ALL: u16 = 0x1ff;

    pub(crate) const OPT_END: u8 = 0x00;
    pub(crate) const OPT_NOP: u8 = 0x01;
    pub(crate) const OPT_MSS: u8 = 0x02;
    pub(crate) const OPT_WS:  u8 = 0x03;
    pub(crate) const OPT_SACKPERM: u8 = 0x04;
}

impl<T: AsRef<[u8]>> Packet<T> {
    /// Imbue a raw octet buffer with TCP segment structure.
    pub fn new_unchecked(buffer: T) -> Packet<T> {
        Packet { buffer }
    }

    /// Shorthand for a combination of [new_unchecked] and [check_len].
    ///
    /// [new_unchecked]: #method.new_unchecked
    /// [check_len]: #method.check_len
    pub fn new_checked(buffer: T) -> Result<Packet<T>> {
        let packet = Self::new_unchecked(buffer);
        packet.check_len()?;
        Ok(packet)
    }

    /// Ensure that no header accessor method will panic if called.
    ///
    /// Returns `Err(Error::Truncated)` if the buffer is too short and `Err(Error::Malformed)` if
    /// the header length field has a value smaller than the minimal header length.
    ///
    /// The result of this check is invalidated by calling [set_header_len].
    ///
    /// [set_header_len]: #method.set_header_len
    pub fn check_len(&self) -> Result<()> {
        let len = self.buffer.as_ref().len();
        if len < field::URGENT.end {
            return Err(Error::Truncated);
        }

        let header_len = usize::from(self.header_len());
        if len < header_len {
            Err(Error::Truncated)
        } else if header_len < field::URGENT.end {
            Err(Error::Malformed)
        } else {
            Ok(())
        }
    }

    /// Consume the packet, returning the underlying buffer.
    pub fn into_inner(self) -> T {
        self.buffer
    }

    fn data(&self) -> &[u8] {
        self.buffer.as_ref()
    }

    /// Return the source port field.
    #[inline]
    pub fn src_port(&self) -> u16 {
        NetworkEndian::read_u16(&self.data()[field::SRC_PORT])
    }

    /// Return the destination port field.
    #[inline]
    pub fn dst_port(&self) -> u16 {
        NetworkEndian::read_u16(&self.data()[field::DST_PORT])
    }

    /// Return the sequence number field.
    #[inline]
    pub fn seq_number(&self) -> SeqNumber {
        SeqNumber(NetworkEndian::read_i32(&self.data()[field::SEQ_NUM]))
    }

    /// Return the acknowledgement number field.
    #[inline]
    pub fn ack_number(&self) -> SeqNumber {
        SeqNumber(NetworkEndian::read_i32(&self.data()[field::ACK_NUM]))
    }

    /// Read all flags at once.
    #[inline]
    pub fn flags(&self) -> Flags {
        Flags(NetworkEndian::read_u16(&self.data()[field::FLAGS]) & field::FLG_ALL)
    }

    /// Return the header length, in octets.
    #[inline]
    pub fn header_len(&self) -> u8 {
        let raw = NetworkEndian::read_u16(&self.data()[field::FLAGS]);
        ((raw >> 12) * 4) as u8
    }

    /// Return the window size field.
    #[inline]
    pub fn window_len(&self) -> u16 {
        NetworkEndian::read_u16(&self.data()[field::WIN_SIZE])
    }

    /// Return the checksum field.
    #[inline]
    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.data()[field::CHECKSUM])
    }

    /// Return the urgent pointer field.
    #[inline]
    pub fn urgent_at(&self) -> u16 {
        NetworkEndian::read_u16(&self.data()[field::URGENT])
    }

    /// Return the options.
    #[inline]
    pub fn options(&self) -> &[u8] {
        &self.data()[field::OPTIONS(self.header_len())]
    }

    /// Return the payload.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.data()[usize::from(self.header_len())..]
    }

    /// Return the length of the segment, in terms of sequence space.
    pub fn sequence_len(&self) -> usize {
        self.payload().len() + self.flags().sequence_len()
    }

    /// Validate the segment checksum against the pseudo header of `src_addr` and `dst_addr`.
    ///
    /// Returns `Err(Error::Unsupported)` unless both addresses belong to the same family.
    pub fn verify_checksum(&self, src_addr: IpAddress, dst_addr: IpAddress) -> Result<bool> {
        let data = self.data();
        let pseudo = checksum::pseudo_header(&src_addr, &dst_addr, IpProtocol::Tcp,
                                             data.len() as u32)?;
        Ok(checksum::combine(&[pseudo, checksum::data(data)]) == !0)
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    fn data_mut(&mut self) -> &mut [u8] {
        self.buffer.as_mut()
    }

    /// Set the source port field.
    #[inline]
    pub fn set_src_port(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.data_mut()[field::SRC_PORT], value)
    }

    /// Set the destination port field.
    #[inline]
    pub fn set_dst_port(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.data_mut()[field::DST_PORT], value)
    }

    /// Set the sequence number field.
    #[inline]
    pub fn set_seq_number(&mut self, value: SeqNumber) {
        NetworkEndian::write_i32(&mut self.data_mut()[field::SEQ_NUM], value.0)
    }

    /// Set the acknowledgement number field.
    #[inline]
    pub fn set_ack_number(&mut self, value: SeqNumber) {
        NetworkEndian::write_i32(&mut self.data_mut()[field::ACK_NUM], value.0)
    }

    /// Set a combination of flags, keeping the data offset.
    #[inline]
    pub fn set_flags(&mut self, Flags(flags): Flags) {
        let data = self.data_mut();
        let offset = NetworkEndian::read_u16(&data[field::FLAGS]) & 0xf000;
        NetworkEndian::write_u16(&mut data[field::FLAGS], offset | (flags & field::FLG_ALL))
    }

    /// Set the header length, in octets.
    #[inline]
    pub fn set_header_len(&mut self, value: u8) {
        let data = self.data_mut();
        let raw = NetworkEndian::read_u16(&data[field::FLAGS]);
        let raw = (raw & !0xf000) | ((value as u16) / 4) << 12;
        NetworkEndian::write_u16(&mut data[field::FLAGS], raw)
    }

    /// Set the window size field.
    #[inline]
    pub fn set_window_len(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.data_mut()[field::WIN_SIZE], value)
    }

    /// Set the checksum field.
    #[inline]
    pub fn set_checksum(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.data_mut()[field::CHECKSUM], value)
    }

    /// Set the urgent pointer field.
    #[inline]
    pub fn set_urgent_at(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.data_mut()[field::URGENT], value)
    }

    /// Compute and fill in the header checksum.
    ///
    /// Returns `Err(Error::Unsupported)` unless both addresses belong to the same family, the
    /// checksum field is left cleared in that case.
    pub fn fill_checksum(&mut self, src_addr: IpAddress, dst_addr: IpAddress) -> Result<()> {
        self.set_checksum(0);
        let checksum = {
            let data = self.data_mut();
            let pseudo = checksum::pseudo_header(&src_addr, &dst_addr, IpProtocol::Tcp,
                                                 data.len() as u32)?;
            !checksum::combine(&[pseudo, checksum::data(data)])
        };
        self.set_checksum(checksum);
        Ok(())
    }

    /// Return a mutable pointer to the options.
    #[inline]
    pub fn options_mut(&mut self) -> &mut [u8] {
        let header_len = self.header_len();
        &mut self.data_mut()[field::OPTIONS(header_len)]
    }

    /// Return a mutable pointer to the payload.
    #[inline]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let header_len = usize::from(self.header_len());
        &mut self.data_mut()[header_len..]
    }
}

impl<T: AsRef<[u8]>> AsRef<[u8]> for Packet<T> {
    fn as_ref(&self) -> &[u8] {
        self.data()
    }
}

macro_rules! flag_accessors {
    ($( $(#[$doc:meta])* $get:ident / $set:ident = $mask:path; )*) => {
        $(
            $(#[$doc])*
            #[inline]
            pub fn $get(self) -> bool {
                self.0 & $mask != 0
            }

            #[allow(missing_docs)]
            #[inline]
            pub fn $set(&mut self, value: bool) {
                if value {
                    self.0 |= $mask;
                } else {
                    self.0 &= !$mask;
                }
            }
        )*
    }
}

impl Flags {
    flag_accessors! {
        /// The FIN flag.
        fin / set_fin = field::FLG_FIN;
        /// The SYN flag.
        syn / set_syn = field::FLG_SYN;
        /// The RST flag.
        rst / set_rst = field::FLG_RST;
        /// The PSH flag.
        psh / set_psh = field::FLG_PSH;
        /// The ACK flag.
        ack / set_ack = field::FLG_ACK;
        /// The URG flag.
        urg / set_urg = field::FLG_URG;
        /// The ECE flag.
        ece / set_ece = field::FLG_ECE;
        /// The CWR flag.
        cwr / set_cwr = field::FLG_CWR;
        /// The NS flag.
        ns / set_ns = field::FLG_NS;
    }

    /// Return the length of the control flags, in terms of sequence space.
    pub fn sequence_len(self) -> usize {
        usize::from(self.syn()) + usize::from(self.fin())
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let names = [
            (self.syn(), "SYN"), (self.ack(), "ACK"), (self.fin(), "FIN"),
            (self.rst(), "RST"), (self.psh(), "PSH"), (self.urg(), "URG"),
            (self.ece(), "ECE"), (self.cwr(), "CWR"), (self.ns(), "NS"),
        ];
        let mut first = true;
        for (_, name) in names.iter().filter(|(set, _)| *set) {
            if !first {
                f.write_str("|")?;
            }
            f.write_str(name)?;
            first = false;
        }
        if first {
            f.write_str("-")?;
        }
        Ok(())
    }
}

/// A representation of a single TCP option.
///
/// Selective acknowledgement ranges are not interpreted and surface as `Unknown`, the engine
/// consumes them on its own.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[allow(missing_docs)]
pub enum TcpOption<'a> {
    EndOfList,
    NoOperation,
    MaxSegmentSize(u16),
    WindowScale(u8),
    SackPermitted,
    Unknown { kind: u8, data: &'a [u8] }
}

impl<'a> TcpOption<'a> {
    /// Parse the first option in `buffer`, returning it and the rest of the buffer.
    pub fn parse(buffer: &'a [u8]) -> Result<(&'a [u8], TcpOption<'a>)> {
        let kind = *buffer.first().ok_or(Error::Truncated)?;
        let (length, option) = match kind {
            field::OPT_END => (1, TcpOption::EndOfList),
            field::OPT_NOP => (1, TcpOption::NoOperation),
            kind => {
                let length = usize::from(*buffer.get(1).ok_or(Error::Truncated)?);
                let data = buffer.get(2..length).ok_or(Error::Truncated)?;
                let option = match (kind, length) {
                    (field::OPT_MSS, 4) => TcpOption::MaxSegmentSize(NetworkEndian::read_u16(data)),
                    (field::OPT_WS, 3) => TcpOption::WindowScale(data[0]),
                    (field::OPT_SACKPERM, 2) => TcpOption::SackPermitted,
                    (field::OPT_MSS, _) | (field::OPT_WS, _) | (field::OPT_SACKPERM, _) =>
                        return Err(Error::Malformed),
                    (kind, _) => TcpOption::Unknown { kind, data },
                };
                (length, option)
            }
        };
        Ok((&buffer[length..], option))
    }

    /// The number of octets the option occupies when emitted.
    pub fn buffer_len(&self) -> usize {
        match self {
            TcpOption::EndOfList => 1,
            TcpOption::NoOperation => 1,
            TcpOption::MaxSegmentSize(_) => 4,
            TcpOption::WindowScale(_) => 3,
            TcpOption::SackPermitted => 2,
            TcpOption::Unknown { data, .. } => 2 + data.len()
        }
    }

    /// Write the option to the front of `buffer` and return the remainder.
    ///
    /// The end of list marker fills all of the remaining buffer, so padding is initialized.
    pub fn emit<'b>(&self, buffer: &'b mut [u8]) -> &'b mut [u8] {
        let length = self.buffer_len();
        match *self {
            TcpOption::EndOfList => {
                buffer.iter_mut().for_each(|p| *p = field::OPT_END);
            }
            TcpOption::NoOperation => {
                buffer[0] = field::OPT_NOP;
            }
            TcpOption::MaxSegmentSize(value) => {
                buffer[..2].copy_from_slice(&[field::OPT_MSS, length as u8]);
                NetworkEndian::write_u16(&mut buffer[2..4], value)
            }
            TcpOption::WindowScale(value) => {
                buffer[..3].copy_from_slice(&[field::OPT_WS, length as u8, value]);
            }
            TcpOption::SackPermitted => {
                buffer[..2].copy_from_slice(&[field::OPT_SACKPERM, length as u8]);
            }
            TcpOption::Unknown { kind, data } => {
                buffer[..2].copy_from_slice(&[kind, length as u8]);
                buffer[2..length].copy_from_slice(data)
            }
        }
        &mut buffer[length..]
    }
}

/// A high-level representation of a Transmission Control Protocol segment header.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Repr {
    /// The source port.
    pub src_port:     u16,
    /// The destination port.
    pub dst_port:     u16,
    /// Control bits. The ACK bit mirrors `ack_number` on emission.
    pub flags:        Flags,
    /// The sequence number of the first octet.
    pub seq_number:   SeqNumber,
    /// The acknowledgement number, if the ACK bit is set.
    pub ack_number:   Option<SeqNumber>,
    /// The unscaled receive window.
    pub window_len:   u16,
    /// The window scale option.
    pub window_scale: Option<u8>,
    /// The maximum segment size option.
    pub max_seg_size: Option<u16>,
    /// Whether the selective acknowledgement permitted option is present.
    pub sack_permitted: bool,
    /// The number of payload octets following the header.
    pub payload_len:  u16,
}

/// Abstraction for checksum behaviour while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checksum {
    /// Verify the checksum over the pseudo header of these addresses.
    Manual {
        /// The source address of the carrying datagram.
        src_addr: IpAddress,
        /// The destination address of the carrying datagram.
        dst_addr: IpAddress,
    },

    /// Never inspect the checksum.
    ///
    /// This assumes that some layer below has already performed the necessary checks.
    Ignored,
}

impl Repr {
    /// Parse a Transmission Control Protocol segment and return a high-level representation.
    pub fn parse<T: AsRef<[u8]>>(packet: &Packet<T>, checksum: Checksum) -> Result<Repr> {
        packet.check_len()?;
        // Source and destination ports must be present.
        if packet.src_port() == 0 { return Err(Error::Malformed) }
        if packet.dst_port() == 0 { return Err(Error::Malformed) }

        if let Checksum::Manual { src_addr, dst_addr } = checksum {
            if !packet.verify_checksum(src_addr, dst_addr)? {
                return Err(Error::WrongChecksum)
            }
        }

        let flags = packet.flags();
        let ack_number = if flags.ack() {
            Some(packet.ack_number())
        } else {
            None
        };

        let payload_len = u16::try_from(packet.payload().len())
            .map_err(|_| Error::Malformed)?;

        let mut repr = Repr {
            src_port: packet.src_port(),
            dst_port: packet.dst_port(),
            flags,
            seq_number: packet.seq_number(),
            ack_number,
            window_len: packet.window_len(),
            window_scale: None,
            max_seg_size: None,
            sack_permitted: false,
            payload_len,
        };

        let mut options = packet.options();
        while !options.is_empty() {
            let (next_options, option) = TcpOption::parse(options)?;
            match option {
                TcpOption::EndOfList => break,
                TcpOption::NoOperation => (),
                TcpOption::MaxSegmentSize(value) => repr.max_seg_size = Some(value),
                TcpOption::WindowScale(value) => {
                    // RFC 1323: a shift count above 14 is logged and treated as 14.
                    if value > 14 {
                        net_debug!("window scale {} exceeds 14, clamping", value);
                    }
                    repr.window_scale = Some(value.min(14));
                },
                TcpOption::SackPermitted => repr.sack_permitted = true,
                TcpOption::Unknown { .. } => (),
            }
            options = next_options;
        }

        Ok(repr)
    }

    /// Return the length of a header that will be emitted from this high-level representation.
    ///
    /// The TCP header length is a multiple of 4.
    pub fn header_len(&self) -> usize {
        let mut length = field::URGENT.end;
        if self.max_seg_size.is_some() {
            length += 4
        }
        if self.window_scale.is_some() {
            length += 3
        }
        if self.sack_permitted {
            length += 2;
        }
        (length + 3) & !3
    }

    /// Return the length of a segment that will be emitted from this high-level representation.
    pub fn buffer_len(&self) -> usize {
        self.header_len() + usize::from(self.payload_len)
    }

    /// Emit the header into a segment buffer of at least `header_len` octets.
    ///
    /// The checksum is cleared, fill it once the payload is in place.
    pub fn emit<T: AsRef<[u8]> + AsMut<[u8]>>(&self, packet: &mut Packet<T>) {
        packet.set_src_port(self.src_port);
        packet.set_dst_port(self.dst_port);
        packet.set_seq_number(self.seq_number);
        packet.set_ack_number(self.ack_number.unwrap_or_default());
        packet.set_window_len(self.window_len);
        packet.set_header_len(self.header_len() as u8);
        let mut flags = self.flags;
        flags.set_ack(self.ack_number.is_some());
        packet.set_flags(flags);
        packet.set_checksum(0);
        packet.set_urgent_at(0);

        let mut options = packet.options_mut();
        if let Some(value) = self.max_seg_size {
            let tmp = options; options = TcpOption::MaxSegmentSize(value).emit(tmp);
        }
        if let Some(value) = self.window_scale {
            let tmp = options; options = TcpOption::WindowScale(value).emit(tmp);
        }
        if self.sack_permitted {
            let tmp = options; options = TcpOption::SackPermitted.emit(tmp);
        }
        if !options.is_empty() {
            TcpOption::EndOfList.emit(options);
        }
    }

    /// Return the length of the segment, in terms of sequence space.
    pub fn sequence_len(&self) -> usize {
        usize::from(self.payload_len) + self.flags.sequence_len()
    }

    /// Return whether the segment carries neither data nor any of SYN, FIN and RST.
    pub fn is_empty(&self) -> bool {
        self.payload_len == 0 && !(self.flags.syn() || self.flags.fin() || self.flags.rst())
    }
}

impl fmt::Display for Repr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TCP src={} dst={} [{}] seq={}",
               self.src_port, self.dst_port, self.flags, self.seq_number)?;
        if let Some(ack_number) = self.ack_number {
            write!(f, " ack={}", ack_number)?;
        }
        write!(f, " win={} len={}", self.window_len, self.payload_len)?;
        if let Some(max_seg_size) = self.max_seg_size {
            write!(f, " mss={}", max_seg_size)?;
        }
        Ok(())
    }
}
