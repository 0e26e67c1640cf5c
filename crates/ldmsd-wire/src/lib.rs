//! Record framing for the ldmsd control protocol.
//!
//! Logical messages travel between daemons as a sequence of records. Each
//! record starts with a fixed 24-byte header in network byte order:
//!
//! | field     | width | meaning                                   |
//! |-----------|-------|-------------------------------------------|
//! | `type`    | u32   | 1 = request, 2 = response, 3 = stream     |
//! | `flags`   | u32   | bit 0 start-of-message, bit 1 end-of-message |
//! | `msg_no`  | u32   | message number assigned by the sender     |
//! | `conn_id` | u64   | sender's connection identity              |
//! | `rec_len` | u32   | header plus payload length in bytes       |
//!
//! This crate is stateless: it encodes and validates headers, splits message
//! payloads into records bounded by a transport's maximum size, and encodes
//! the attribute layout used by stream publications. Reassembly and dispatch
//! live in the `ldmsd` crate.
//!
//! # Example
//!
//! ```
//! use ldmsd_wire::{CorrelationKey, MessageType, Record, RecordWriter};
//!
//! let mut writer = RecordWriter::new(32)?;
//! let key = CorrelationKey::new(7, 1);
//! let mut records = Vec::new();
//! writer.write_message(MessageType::Request, key, b"{\"request\":\"version\"}", |bytes| {
//!     records.push(bytes.to_vec());
//!     Ok::<(), ldmsd_wire::WireError>(())
//! })?;
//!
//! let first = Record::parse(&records[0])?;
//! assert!(first.header.flags.is_start());
//! # Ok::<(), ldmsd_wire::WireError>(())
//! ```

mod error;
mod header;
mod msg_no;
mod stream;
mod writer;

pub use error::WireError;
pub use header::{CorrelationKey, HEADER_LEN, MessageType, Record, RecordFlags, RecordHeader};
pub use msg_no::MessageNumbers;
pub use stream::{
    ATTR_HEADER_LEN, ATTR_JSON, ATTR_NAME, ATTR_STRING, StreamMessage, StreamType,
    StreamTypeParseError,
};
pub use writer::RecordWriter;

/// Version of the record protocol implementation.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
