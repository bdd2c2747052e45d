//! The owned segment crossing the boundary between host and engine.
//!
//! A segment arrives from the network layer as opaque bytes together with a declaration of how
//! far its checksum can be trusted. After decoding, every [`Segment`] is in the computed
//! checksum state, with a checksum field that is valid for the addresses it was decoded with.
//!
//! [`Segment`]: struct.Segment.html
use super::{Error, IpAddress, Result};
use super::tcp::{Checksum, Packet, Repr};

/// The declared trust level of a segment checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrcMode {
    /// Integrity was established out of band, the checksum field is not inspected.
    ///
    /// The segment is rewritten into the computed state on decoding.
    DeclaredCorrect,

    /// The segment is known to be corrupt and must never reach the engine.
    DeclaredIncorrect,

    /// The checksum field is authoritative and verified over the pseudo header.
    Computed,
}

/// A TCP segment in an owned buffer, with its parsed header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    buffer: Vec<u8>,
    repr: Repr,
    crc_mode: CrcMode,
}

impl Segment {
    /// Decode a segment received from `src_addr` for `dst_addr`.
    ///
    /// Fails with `WrongChecksum` for a declared-incorrect segment or one whose computed
    /// checksum does not verify. A declared-correct segment comes back in computed mode with a
    /// freshly filled checksum.
    pub fn decode(bytes: &[u8], src_addr: IpAddress, dst_addr: IpAddress, mode: CrcMode)
        -> Result<Segment>
    {
        let checksum = match mode {
            CrcMode::DeclaredIncorrect => return Err(Error::WrongChecksum),
            CrcMode::DeclaredCorrect => Checksum::Ignored,
            CrcMode::Computed => Checksum::Manual { src_addr, dst_addr },
        };

        let repr = Repr::parse(&Packet::new_unchecked(bytes), checksum)?;
        let mut buffer = bytes.to_vec();
        if mode == CrcMode::DeclaredCorrect {
            Packet::new_unchecked(&mut buffer[..]).fill_checksum(src_addr, dst_addr)?;
        }

        Ok(Segment { buffer, repr, crc_mode: CrcMode::Computed })
    }

    /// Take ownership of a segment produced by the engine and fill in its checksum.
    ///
    /// The engine's own checksum field is not trusted.
    pub fn seal(bytes: &[u8], src_addr: IpAddress, dst_addr: IpAddress) -> Result<Segment> {
        Segment::decode(bytes, src_addr, dst_addr, CrcMode::DeclaredCorrect)
    }

    /// Build a segment from a header and payload.
    ///
    /// The `payload_len` of `repr` is replaced by the actual payload length. The checksum field
    /// stays cleared until the segment is encoded for a pair of addresses.
    pub fn from_repr(mut repr: Repr, payload: &[u8]) -> Result<Segment> {
        repr.payload_len = u16::try_from(payload.len()).map_err(|_| Error::Malformed)?;
        let mut buffer = vec![0; repr.buffer_len()];
        let mut packet = Packet::new_unchecked(&mut buffer[..]);
        repr.emit(&mut packet);
        packet.payload_mut().copy_from_slice(payload);
        Ok(Segment { buffer, repr, crc_mode: CrcMode::Computed })
    }

    /// Write the segment into `buffer` with a checksum over `src_addr` and `dst_addr`.
    ///
    /// Returns the number of octets written.
    pub fn encode(&self, buffer: &mut [u8], src_addr: IpAddress, dst_addr: IpAddress)
        -> Result<usize>
    {
        let len = self.buffer.len();
        let target = buffer.get_mut(..len).ok_or(Error::Truncated)?;
        target.copy_from_slice(&self.buffer);
        Packet::new_unchecked(target).fill_checksum(src_addr, dst_addr)?;
        Ok(len)
    }

    /// Encode into a fresh buffer.
    pub fn emit(&self, src_addr: IpAddress, dst_addr: IpAddress) -> Result<Vec<u8>> {
        let mut buffer = vec![0; self.buffer.len()];
        self.encode(&mut buffer, src_addr, dst_addr)?;
        Ok(buffer)
    }

    /// The parsed header.
    pub fn repr(&self) -> &Repr {
        &self.repr
    }

    /// The payload octets.
    pub fn payload(&self) -> &[u8] {
        let header_len = Packet::new_unchecked(&self.buffer[..]).header_len();
        &self.buffer[usize::from(header_len)..]
    }

    /// The complete segment, header and payload.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// The checksum field as currently stored.
    pub fn checksum(&self) -> u16 {
        Packet::new_unchecked(&self.buffer[..]).checksum()
    }

    /// The checksum state. Always `Computed` once constructed.
    pub fn crc_mode(&self) -> CrcMode {
        self.crc_mode
    }

    /// The total length in octets.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the segment occupies no sequence space.
    pub fn is_empty(&self) -> bool {
        self.repr.is_empty()
    }
}
