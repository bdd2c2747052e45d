//! Send and receive buffering per transfer mode.
//!
//! The engine only ever sees octets. How those octets relate to what the application handed in
//! depends on the transfer mode the connection was opened with:
//!
//! * `ByteStream` carries the application bytes unchanged.
//! * `ByteCount` carries only lengths. The wire is filled with zeros and the receiver learns how
//!   many octets arrived.
//! * `Object` frames every message with a four octet big-endian length, the receiver reassembles
//!   whole messages no matter how the stream was segmented.
use std::collections::VecDeque;

use byteorder::{ByteOrder, NetworkEndian};

use crate::layer::{Error, Result};

/// How application payload maps onto the byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferMode {
    /// Raw application bytes.
    ByteStream,
    /// Octet counts, zero-filled on the wire.
    ByteCount,
    /// Length-prefixed messages.
    Object,
}

/// Payload exchanged with the application.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Payload {
    /// Bytes of a `ByteStream` connection.
    Bytes(Vec<u8>),
    /// A number of octets of a `ByteCount` connection.
    Count(usize),
    /// One message of an `Object` connection.
    Object(Vec<u8>),
}

const RECORD_HEADER: usize = 4;

fn record_header(len: usize) -> Result<[u8; RECORD_HEADER]> {
    let len = u32::try_from(len).map_err(|_| Error::ObjectTooLong(len))?;
    let mut header = [0; RECORD_HEADER];
    NetworkEndian::write_u32(&mut header, len);
    Ok(header)
}

impl Default for TransferMode {
    fn default() -> Self {
        TransferMode::ByteStream
    }
}

impl Payload {
    /// The transfer mode this payload belongs to.
    pub fn mode(&self) -> TransferMode {
        match self {
            Payload::Bytes(_) => TransferMode::ByteStream,
            Payload::Count(_) => TransferMode::ByteCount,
            Payload::Object(_) => TransferMode::Object,
        }
    }

    /// The number of application octets.
    pub fn len(&self) -> usize {
        match self {
            Payload::Bytes(bytes) | Payload::Object(bytes) => bytes.len(),
            Payload::Count(count) => *count,
        }
    }

    /// Whether the payload has no octets.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Octets accepted from the application but not yet written to the engine.
#[derive(Debug, Default)]
pub(crate) struct SendQueue {
    mode: TransferMode,
    queued: VecDeque<u8>,
}

/// Octets received from the engine but not yet delivered to the application.
#[derive(Debug, Default)]
pub(crate) struct ReceiveQueue {
    mode: TransferMode,
    buffered: VecDeque<u8>,
    /// Octets counted but not yet reported, for `ByteCount`.
    counted: usize,
}

impl SendQueue {
    pub(crate) fn new(mode: TransferMode) -> Self {
        SendQueue { mode, queued: VecDeque::new() }
    }

    /// Append a payload in its wire form.
    ///
    /// Nothing is queued if the payload does not match the transfer mode or an object is too long
    /// for its length prefix.
    pub(crate) fn enqueue(&mut self, payload: Payload) -> Result<()> {
        match (self.mode, payload) {
            (TransferMode::ByteStream, Payload::Bytes(bytes)) => {
                self.queued.extend(bytes);
            },
            (TransferMode::ByteCount, Payload::Count(count)) => {
                self.queued.extend(core::iter::repeat(0).take(count));
            },
            (TransferMode::Object, Payload::Object(bytes)) => {
                self.queued.extend(record_header(bytes.len())?);
                self.queued.extend(bytes);
            },
            (mode, _) => return Err(Error::TransferMode(mode)),
        }
        Ok(())
    }

    /// Remove up to `max` octets from the front.
    pub(crate) fn take(&mut self, max: usize) -> Vec<u8> {
        let len = max.min(self.queued.len());
        self.queued.drain(..len).collect()
    }

    /// Put octets that could not be written back at the front, keeping their order.
    pub(crate) fn restore(&mut self, octets: Vec<u8>) {
        for octet in octets.into_iter().rev() {
            self.queued.push_front(octet);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.queued.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }
}

impl ReceiveQueue {
    pub(crate) fn new(mode: TransferMode) -> Self {
        ReceiveQueue { mode, buffered: VecDeque::new(), counted: 0 }
    }

    /// Accept octets from the engine.
    pub(crate) fn enqueue(&mut self, octets: &[u8]) {
        match self.mode {
            TransferMode::ByteCount => self.counted += octets.len(),
            TransferMode::ByteStream | TransferMode::Object => self.buffered.extend(octets),
        }
    }

    /// Take the next deliverable payload, if any is complete.
    pub(crate) fn extract(&mut self) -> Option<Payload> {
        match self.mode {
            TransferMode::ByteStream => {
                if self.buffered.is_empty() {
                    return None;
                }
                Some(Payload::Bytes(self.buffered.drain(..).collect()))
            },
            TransferMode::ByteCount => {
                if self.counted == 0 {
                    return None;
                }
                Some(Payload::Count(core::mem::take(&mut self.counted)))
            },
            TransferMode::Object => {
                if self.buffered.len() < RECORD_HEADER {
                    return None;
                }
                let mut header = [0; RECORD_HEADER];
                for (dst, src) in header.iter_mut().zip(self.buffered.iter()) {
                    *dst = *src;
                }
                let len = NetworkEndian::read_u32(&header) as usize;
                if self.buffered.len() < RECORD_HEADER + len {
                    return None;
                }
                self.buffered.drain(..RECORD_HEADER);
                Some(Payload::Object(self.buffered.drain(..len).collect()))
            },
        }
    }

    /// Octets held back, including partial messages.
    pub(crate) fn len(&self) -> usize {
        match self.mode {
            TransferMode::ByteCount => self.counted,
            TransferMode::ByteStream | TransferMode::Object => self.buffered.len(),
        }
    }
}
