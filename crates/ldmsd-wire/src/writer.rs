//! Splits a logical message into framed records.

use bytes::BytesMut;

use crate::error::WireError;
use crate::header::{CorrelationKey, HEADER_LEN, MessageType, RecordFlags, RecordHeader};

/// Chunks message payloads into records no larger than a transport maximum.
///
/// One writer owns a single scratch buffer that is reused for every record it
/// emits, so a long reply does not allocate per record.
#[derive(Debug)]
pub struct RecordWriter {
    max_record: usize,
    buffer: BytesMut,
}

impl RecordWriter {
    /// Builds a writer for records of at most `max_record` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::RecordCapacity`] when `max_record` leaves no room
    /// for payload, or [`WireError::RecordTooLarge`] when it cannot be
    /// expressed in the header's length field.
    pub fn new(max_record: usize) -> Result<Self, WireError> {
        if max_record <= HEADER_LEN {
            return Err(WireError::RecordCapacity { max_record });
        }
        if u32::try_from(max_record).is_err() {
            return Err(WireError::RecordTooLarge { len: max_record });
        }
        Ok(Self {
            max_record,
            buffer: BytesMut::with_capacity(max_record),
        })
    }

    /// Largest record this writer emits.
    #[must_use]
    pub const fn max_record(&self) -> usize {
        self.max_record
    }

    /// Payload bytes carried by a full record.
    #[must_use]
    pub const fn max_payload(&self) -> usize {
        self.max_record.saturating_sub(HEADER_LEN)
    }

    /// Frames `payload` and hands each record to `emit` in order.
    ///
    /// The first record carries SOM and the last carries EOM; a message that
    /// fits in one record carries both. An empty payload still produces one
    /// SOM|EOM record so the peer observes a complete message. Returns the
    /// number of records emitted.
    ///
    /// # Errors
    ///
    /// Stops at the first error returned by `emit` and propagates it.
    pub fn write_message<F, E>(
        &mut self,
        msg_type: MessageType,
        key: CorrelationKey,
        payload: &[u8],
        mut emit: F,
    ) -> Result<usize, E>
    where
        F: FnMut(&[u8]) -> Result<(), E>,
        E: From<WireError>,
    {
        let chunk_len = self.max_payload();
        let mut chunks = payload.chunks(chunk_len).peekable();
        let mut flags = RecordFlags::SOM;
        let mut emitted = 0_usize;

        if chunks.peek().is_none() {
            self.frame(msg_type, flags | RecordFlags::EOM, key, &[])?;
            emit(&self.buffer)?;
            return Ok(1);
        }

        while let Some(chunk) = chunks.next() {
            if chunks.peek().is_none() {
                flags |= RecordFlags::EOM;
            }
            self.frame(msg_type, flags, key, chunk)?;
            emit(&self.buffer)?;
            emitted += 1;
            flags = RecordFlags::NONE;
        }
        Ok(emitted)
    }

    fn frame(
        &mut self,
        msg_type: MessageType,
        flags: RecordFlags,
        key: CorrelationKey,
        chunk: &[u8],
    ) -> Result<(), WireError> {
        let len = HEADER_LEN + chunk.len();
        let rec_len = u32::try_from(len).map_err(|_| WireError::RecordTooLarge { len })?;
        self.buffer.clear();
        RecordHeader {
            msg_type,
            flags,
            key,
            rec_len,
        }
        .encode(&mut self.buffer);
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }
}
