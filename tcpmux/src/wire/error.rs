/// The error type for parsing and emitting segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum Error {
    /// An incoming packet could not be parsed because it was shorter than assumed.
    ///
    /// The packet may be shorter than the minimum length specified, a size longer than the actual
    /// payload. For variable length packets, this may be because some of its fields were out of
    /// bounds of the received data. Also used when a target buffer is too short for emission.
    #[error("truncated packet")]
    Truncated,

    /// An incoming packet had an incorrect checksum and was dropped.
    ///
    /// This includes segments whose checksum was declared incorrect by the layer below, they are
    /// never inspected any further.
    #[error("checksum error")]
    WrongChecksum,

    /// An incoming packet could not be recognized and was dropped.
    #[error("unrecognized packet")]
    Unrecognized,

    /// An incoming packet was recognized but was self-contradictory.
    ///
    /// Examples: a TCP packet with a zero port; a header length smaller than the fixed header.
    #[error("malformed packet")]
    Malformed,

    /// Parsing depends on information derived from a non-implemented feature.
    ///
    /// For example a pseudo header over addresses of different families.
    #[error("unsupported option")]
    Unsupported,
}

/// The result type for the wire module.
pub type Result<T> = core::result::Result<T, Error>;
