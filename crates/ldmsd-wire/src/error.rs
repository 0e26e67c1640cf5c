//! Errors raised while decoding or encoding wire records.

use thiserror::Error;

/// Failures surfaced by the record codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum WireError {
    /// Fewer bytes were available than the structure requires.
    #[error("truncated input: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes required to decode the structure.
        needed: usize,
        /// Bytes actually available.
        available: usize,
    },

    /// The header carried a message type outside the known set.
    #[error("unknown message type {0}")]
    UnknownMessageType(u32),

    /// The declared record length is shorter than the header itself.
    #[error("record length {rec_len} is shorter than the record header")]
    RecordTooShort {
        /// Declared record length.
        rec_len: u32,
    },

    /// The declared record length runs past the received bytes.
    #[error("record length {rec_len} exceeds the {available} bytes received")]
    RecordOverrun {
        /// Declared record length.
        rec_len: u32,
        /// Bytes actually received.
        available: usize,
    },

    /// A record length cannot be represented in the 32-bit header field.
    #[error("record of {len} bytes cannot be framed")]
    RecordTooLarge {
        /// Length that failed to fit.
        len: usize,
    },

    /// The writer was configured with a record size that leaves no room for payload.
    #[error("maximum record size {max_record} leaves no room for payload")]
    RecordCapacity {
        /// Configured maximum record size.
        max_record: usize,
    },

    /// A stream attribute was malformed.
    #[error("malformed stream attribute: {message}")]
    MalformedAttribute {
        /// Description of the problem.
        message: String,
    },
}

impl WireError {
    /// Creates a malformed attribute error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedAttribute {
            message: message.into(),
        }
    }
}
