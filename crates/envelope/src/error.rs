use thiserror::Error;

/// Result type for envelope operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from framing and sequencing.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// Fewer bytes than a header.
    #[error("frame truncated: need {needed} bytes, have {have}")]
    Truncated {
        /// Minimum frame length.
        needed: usize,
        /// Received frame length.
        have: usize,
    },

    /// The frame was corrupted in transit.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum carried in the header.
        expected: u32,
        /// Checksum computed over the received bytes.
        actual: u32,
    },

    /// Sequence numbers start at 1.
    #[error("sequence number zero is reserved")]
    ZeroSequence,

    /// A sender ran out of sequence numbers.
    #[error("sequence space exhausted")]
    SequenceExhausted,
}
