//! Record header encoding.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use bytes::{Buf, BufMut};

use crate::error::WireError;

/// Size of the fixed record header in bytes.
pub const HEADER_LEN: usize = 24;

/// Logical message category carried by every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Request addressed to the receiving daemon.
    Request,
    /// Reply to a request previously sent by the receiver.
    Response,
    /// Stream publication; never answered.
    Stream,
}

impl MessageType {
    /// Numeric code written to the wire.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::Request => 1,
            Self::Response => 2,
            Self::Stream => 3,
        }
    }

    /// Maps a wire code back to a message type.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::UnknownMessageType`] for codes outside `1..=3`.
    pub const fn from_code(code: u32) -> Result<Self, WireError> {
        match code {
            1 => Ok(Self::Request),
            2 => Ok(Self::Response),
            3 => Ok(Self::Stream),
            other => Err(WireError::UnknownMessageType(other)),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Stream => "stream",
        };
        formatter.write_str(label)
    }
}

/// Start/end-of-message flag set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RecordFlags(u32);

impl RecordFlags {
    /// Continuation record in the middle of a message.
    pub const NONE: Self = Self(0);
    /// First record of a message.
    pub const SOM: Self = Self(1);
    /// Last record of a message.
    pub const EOM: Self = Self(1 << 1);

    /// Wraps raw flag bits as received from the wire.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw flag bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether the record opens a message.
    #[must_use]
    pub const fn is_start(self) -> bool {
        self.0 & Self::SOM.0 != 0
    }

    /// Whether the record closes a message.
    #[must_use]
    pub const fn is_end(self) -> bool {
        self.0 & Self::EOM.0 != 0
    }
}

impl BitOr for RecordFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for RecordFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Pair naming one in-flight logical message.
///
/// Message numbers are only unique per connection, so the two halves are
/// always compared together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationKey {
    /// Connection identity the message belongs to.
    pub conn_id: u64,
    /// Message number assigned by the sender.
    pub msg_no: u32,
}

impl CorrelationKey {
    /// Builds a key from its parts.
    #[must_use]
    pub const fn new(conn_id: u64, msg_no: u32) -> Self {
        Self { conn_id, msg_no }
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.conn_id, self.msg_no)
    }
}

/// Decoded record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Category of the message the record belongs to.
    pub msg_type: MessageType,
    /// Start/end-of-message flags.
    pub flags: RecordFlags,
    /// Correlation key written by the sender.
    pub key: CorrelationKey,
    /// Header plus payload length.
    pub rec_len: u32,
}

impl RecordHeader {
    /// Appends the header in network byte order.
    pub fn encode(&self, buffer: &mut impl BufMut) {
        buffer.put_u32(self.msg_type.code());
        buffer.put_u32(self.flags.bits());
        buffer.put_u32(self.key.msg_no);
        buffer.put_u64(self.key.conn_id);
        buffer.put_u32(self.rec_len);
    }

    /// Decodes a header from the front of `bytes`.
    ///
    /// Only the header is validated here; [`Record::parse`] additionally
    /// checks the declared length against the bytes received.
    ///
    /// # Errors
    ///
    /// Fails when fewer than [`HEADER_LEN`] bytes are available, the type is
    /// unknown, or the declared length is shorter than the header.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < HEADER_LEN {
            return Err(WireError::Truncated {
                needed: HEADER_LEN,
                available: bytes.len(),
            });
        }
        let mut cursor = bytes;
        let msg_type = MessageType::from_code(cursor.get_u32())?;
        let flags = RecordFlags::from_bits(cursor.get_u32());
        let msg_no = cursor.get_u32();
        let conn_id = cursor.get_u64();
        let rec_len = cursor.get_u32();
        if usize::try_from(rec_len).is_ok_and(|len| len < HEADER_LEN) {
            return Err(WireError::RecordTooShort { rec_len });
        }
        Ok(Self {
            msg_type,
            flags,
            key: CorrelationKey::new(conn_id, msg_no),
            rec_len,
        })
    }

    /// Declared record length as a `usize`.
    #[must_use]
    pub fn record_len(&self) -> usize {
        usize::try_from(self.rec_len).unwrap_or(usize::MAX)
    }

    /// Number of payload bytes following the header.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.record_len().saturating_sub(HEADER_LEN)
    }
}

/// A header together with the payload slice it frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<'a> {
    /// Decoded header.
    pub header: RecordHeader,
    /// Payload bytes, exactly `rec_len - HEADER_LEN` long.
    pub payload: &'a [u8],
}

impl<'a> Record<'a> {
    /// Parses one record from the front of `bytes`.
    ///
    /// Trailing bytes beyond `rec_len` are ignored so callers can parse
    /// several records out of one read buffer.
    ///
    /// # Errors
    ///
    /// Propagates header errors and rejects a declared length that runs past
    /// the supplied bytes.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, WireError> {
        let header = RecordHeader::decode(bytes)?;
        let payload = bytes
            .get(HEADER_LEN..header.record_len())
            .ok_or(WireError::RecordOverrun {
                rec_len: header.rec_len,
                available: bytes.len(),
            })?;
        Ok(Self { header, payload })
    }
}
