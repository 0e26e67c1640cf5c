//! Attribute layout of a stream publication.
//!
//! A publication is a sequence of attributes, each introduced by
//! `{discrim: u32, attr_id: u32, attr_len: u32}` in network byte order:
//!
//! 1. a [`ATTR_NAME`] attribute holding the NUL-terminated stream name;
//! 2. a [`ATTR_STRING`] or [`ATTR_JSON`] attribute holding the data;
//! 3. a lone zero `discrim` terminating the list.

use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

use crate::error::WireError;

/// Attribute id of the stream name.
pub const ATTR_NAME: u32 = 1;
/// Attribute id of a plain string payload.
pub const ATTR_STRING: u32 = 16;
/// Attribute id of a JSON payload.
pub const ATTR_JSON: u32 = 22;
/// Size of one attribute header.
pub const ATTR_HEADER_LEN: usize = 12;

const TERMINATOR_LEN: usize = 4;

/// Payload kind of a stream publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    /// Opaque text delivered as received.
    String,
    /// JSON text that subscribers may ask to receive parsed.
    Json,
}

impl StreamType {
    const fn attr_id(self) -> u32 {
        match self {
            Self::String => ATTR_STRING,
            Self::Json => ATTR_JSON,
        }
    }

    fn from_attr_id(attr_id: u32) -> Result<Self, WireError> {
        match attr_id {
            ATTR_STRING => Ok(Self::String),
            ATTR_JSON => Ok(Self::Json),
            other => Err(WireError::malformed(format!(
                "unexpected data attribute id {other}"
            ))),
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => formatter.write_str("string"),
            Self::Json => formatter.write_str("json"),
        }
    }
}

/// Error returned when a stream type label is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown stream type '{0}'")]
pub struct StreamTypeParseError(pub String);

impl FromStr for StreamType {
    type Err = StreamTypeParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_ascii_lowercase().as_str() {
            "string" | "raw" => Ok(Self::String),
            "json" => Ok(Self::Json),
            _ => Err(StreamTypeParseError(input.to_owned())),
        }
    }
}

/// A decoded stream publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    /// Stream the data is published on.
    pub name: String,
    /// Payload kind.
    pub stream_type: StreamType,
    /// Payload bytes, without any terminator.
    pub data: Vec<u8>,
}

impl StreamMessage {
    /// Builds a publication.
    pub fn new(name: impl Into<String>, stream_type: StreamType, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            stream_type,
            data: data.into(),
        }
    }

    /// Encodes the attribute list ready for framing into records.
    ///
    /// # Errors
    ///
    /// Fails with [`WireError::RecordTooLarge`] when the name or data length
    /// cannot be expressed in an attribute header.
    pub fn encode(&self) -> Result<BytesMut, WireError> {
        let name_len = self.name.len() + 1;
        let mut buffer = BytesMut::with_capacity(
            ATTR_HEADER_LEN * 2 + name_len + self.data.len() + TERMINATOR_LEN,
        );
        put_attr_header(&mut buffer, ATTR_NAME, name_len)?;
        buffer.put_slice(self.name.as_bytes());
        buffer.put_u8(0);
        put_attr_header(&mut buffer, self.stream_type.attr_id(), self.data.len())?;
        buffer.put_slice(&self.data);
        buffer.put_u32(0);
        Ok(buffer)
    }

    /// Decodes a reassembled publication.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::MalformedAttribute`] when the attribute sequence
    /// deviates from name, data, terminator, and [`WireError::Truncated`]
    /// when an attribute runs past the input.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut cursor = bytes;

        let (name_id, name_bytes) = take_attr(&mut cursor)?;
        if name_id != ATTR_NAME {
            return Err(WireError::malformed(format!(
                "expected stream name attribute, found id {name_id}"
            )));
        }
        let trimmed = name_bytes.strip_suffix(&[0]).unwrap_or(name_bytes);
        let name = std::str::from_utf8(trimmed)
            .map_err(|error| WireError::malformed(format!("stream name is not UTF-8: {error}")))?
            .to_owned();

        let (data_id, data) = take_attr(&mut cursor)?;
        let stream_type = StreamType::from_attr_id(data_id)?;

        ensure_remaining(cursor, TERMINATOR_LEN)?;
        let discrim = cursor.get_u32();
        if discrim != 0 {
            return Err(WireError::malformed("missing attribute list terminator"));
        }

        Ok(Self {
            name,
            stream_type,
            data: data.to_vec(),
        })
    }
}

fn put_attr_header(buffer: &mut BytesMut, attr_id: u32, len: usize) -> Result<(), WireError> {
    let attr_len = u32::try_from(len).map_err(|_| WireError::RecordTooLarge { len })?;
    buffer.put_u32(1);
    buffer.put_u32(attr_id);
    buffer.put_u32(attr_len);
    Ok(())
}

fn take_attr<'a>(cursor: &mut &'a [u8]) -> Result<(u32, &'a [u8]), WireError> {
    ensure_remaining(*cursor, ATTR_HEADER_LEN)?;
    let discrim = cursor.get_u32();
    if discrim == 0 {
        return Err(WireError::malformed("attribute list ended early"));
    }
    let attr_id = cursor.get_u32();
    let attr_len = usize::try_from(cursor.get_u32()).unwrap_or(usize::MAX);
    let current: &'a [u8] = *cursor;
    ensure_remaining(current, attr_len)?;
    let (value, rest) = current.split_at(attr_len);
    *cursor = rest;
    Ok((attr_id, value))
}

fn ensure_remaining(cursor: &[u8], needed: usize) -> Result<(), WireError> {
    if cursor.len() < needed {
        return Err(WireError::Truncated {
            needed,
            available: cursor.len(),
        });
    }
    Ok(())
}
