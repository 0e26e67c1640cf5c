//! Peer transports and the socket listener.
//!
//! The engine only sees the [`Transport`] trait: a record-send primitive, the
//! largest record the peer accepts, a connection identity, and the peer's
//! credentials. [`SocketListener`] accepts TCP or Unix connections and runs a
//! [`RecordConnectionHandler`] per stream; the loopback transport wires
//! engines together in-process for tests.

mod errors;
mod handler;
mod listener;
#[cfg(any(test, feature = "test-support"))]
pub mod loopback;
mod socket;

use std::sync::atomic::{AtomicU64, Ordering};

use ldmsd_wire::{CorrelationKey, MessageType, RecordWriter};
use nix::unistd::{getegid, geteuid};

pub use self::errors::{ListenerError, TransportError};
pub(crate) use self::handler::{ConnectionHandler, ConnectionStream};
pub use self::listener::{ListenerHandle, SocketListener};
pub use self::socket::{RecordConnectionHandler, SocketTransport};

pub(crate) const TRANSPORT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");

/// Credentials presented by the peer on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityContext {
    /// Peer user id.
    pub uid: u32,
    /// Peer group id.
    pub gid: u32,
}

impl SecurityContext {
    /// Builds a context from explicit ids.
    #[must_use]
    pub const fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }

    /// Effective credentials of this process.
    #[must_use]
    pub fn current() -> Self {
        Self {
            uid: geteuid().as_raw(),
            gid: getegid().as_raw(),
        }
    }

    /// Whether the context carries root privileges.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.uid == 0
    }
}

/// Byte-delivery primitive the engine sends records through.
pub trait Transport: Send + Sync {
    /// Sends one encoded record.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the peer is gone or the write fails.
    fn send(&self, record: &[u8]) -> Result<(), TransportError>;

    /// Largest record, header included, the peer accepts.
    fn max_message_size(&self) -> usize;

    /// Identity of this connection, unique within the process.
    fn connection_id(&self) -> u64;

    /// Credentials of the peer.
    fn security_context(&self) -> SecurityContext;
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a process-unique connection identity.
pub fn next_connection_id() -> u64 {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Chunks `payload` into records on `key` and sends them through `transport`.
///
/// Builds a writer sized to the transport. Contexts keep their own writer and
/// call [`send_with`] instead.
///
/// # Errors
///
/// Fails when the transport maximum cannot hold a header or a send fails.
pub fn send_message(
    transport: &dyn Transport,
    msg_type: MessageType,
    key: CorrelationKey,
    payload: &[u8],
) -> Result<usize, TransportError> {
    let mut writer = RecordWriter::new(transport.max_message_size())?;
    send_with(&mut writer, transport, msg_type, key, payload)
}

/// Sends `payload` using an existing writer.
///
/// # Errors
///
/// Propagates the first failed record send.
pub fn send_with(
    writer: &mut RecordWriter,
    transport: &dyn Transport,
    msg_type: MessageType,
    key: CorrelationKey,
    payload: &[u8],
) -> Result<usize, TransportError> {
    writer.write_message(msg_type, key, payload, |record| transport.send(record))
}
